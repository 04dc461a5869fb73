//! Free-Rectangle List
//!
//! The flat free-space representation: one ordered list of regions per ULD. Regions may
//! overlap each other; only their union matters. A commit walks the whole list and replaces
//! every region the parcel box touches with the residual slabs of the six-slab decomposition.
//! Simple and duplicative, this is the debugging ground truth for the space tree.
//!

use super::free_space::*;
use super::util::*;

pub struct FreeSpaceList {
    /// the whole ULD interior
    uld_region: Region,
    /// slabs thinner than this in any axis are unpackable and dropped
    min_dimension: Length,
    /// the current free regions; their union covers exactly the packable free volume
    pub regions: Vec<Region>,
    /// boxes committed so far, in commit order
    committed: Vec<Region>,
}

impl FreeSpaceImpl for FreeSpaceList {
    type Handle = usize;

    fn new_uld(dimensions: Dims, min_dimension: Length) -> Self {
        assert!(min_dimension > 0, "non-positive minimum dimension {}", min_dimension);
        let uld_region = Region::from_dimensions(dimensions);
        Self {
            uld_region,
            min_dimension,
            regions: vec![uld_region],
            committed: vec![],
        }
    }

    fn clear(&mut self) {
        self.regions.clear();
        self.regions.push(self.uld_region);
        self.committed.clear();
    }

    fn find_fit(&self, natural: &Dims, config: &FitConfig) -> Option<FitChoice<usize>> {
        let mut selector = FitSelector::new(natural, config);
        for (index, region) in self.regions.iter().enumerate() {
            if selector.offer(*region, index) {
                break;
            }
        }
        selector.finish()
    }

    fn commit(&mut self, fit: &FitChoice<usize>) {
        let hole = Region::new(fit.anchor, fit.oriented);
        let chosen = self
            .regions
            .get(fit.handle)
            .unwrap_or_else(|| panic!("stale fit handle {} on a list of {} regions", fit.handle, self.regions.len()));
        assert!(
            chosen.contains(&hole),
            "parcel box {:?} escapes its chosen region {:?} (handle {})",
            hole,
            chosen,
            fit.handle
        );
        let mut updated = Vec::with_capacity(self.regions.len() + 5);
        for region in self.regions.iter() {
            if region.is_disjoint(&hole) {
                updated.push(*region);
            } else {
                updated.extend(region.subtract(&hole, self.min_dimension));
            }
        }
        self.regions = updated;
        self.committed.push(hole);
    }

    fn free_regions(&self) -> Vec<Region> {
        self.regions.clone()
    }

    fn committed_regions(&self) -> &[Region] {
        &self.committed
    }

    fn sanity_check(&self) -> Result<(), String> {
        for region in self.regions.iter() {
            if !self.uld_region.contains(region) {
                return Err(format!("free region {:?} escapes the ULD {:?}", region, self.uld_region));
            }
            if region.extent.iter().any(|&e| e < self.min_dimension) {
                return Err(format!(
                    "free region {:?} thinner than the minimum dimension {}",
                    region, self.min_dimension
                ));
            }
            for committed in self.committed.iter() {
                if !region.is_disjoint(committed) {
                    return Err(format!("free region {:?} intersects committed box {:?}", region, committed));
                }
            }
        }
        for committed in self.committed.iter() {
            if !self.uld_region.contains(committed) {
                return Err(format!(
                    "committed box {:?} escapes the ULD {:?}",
                    committed, self.uld_region
                ));
            }
        }
        Ok(())
    }

    fn generate_profiler_report(&self) -> serde_json::Value {
        json!({
            "region_num": self.regions.len(),
            "committed_num": self.committed.len(),
        })
    }
}
