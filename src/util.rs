//! Basic Utilities
//!
//! Shared data model of the packing engine: integer geometry (regions and orientations),
//! manifest entries, the pack initializer, placement records and the output plan.
//!

use super::pack_solver::PackSolver;
use super::rand_xoshiro;
use crate::rand_xoshiro::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::prelude::*;
use std::time::Instant;

cfg_if::cfg_if! {
    if #[cfg(feature="i32_length")] {
        /// use i32 to store lengths, to be compatible with compact wire formats
        pub type Length = i32;
    } else {
        pub type Length = isize;
    }
}

/// volumes and surface areas share the length type; all inputs are integer centimeters
pub type Volume = Length;
pub type Weight = isize;
pub type Cost = isize;

cfg_if::cfg_if! {
    if #[cfg(feature="u32_index")] {
        // use u32 to store index, for less memory usage
        pub type NodeIndex = u32;
        pub type UldIndex = u32;
        pub type ParcelIndex = u32;
        pub type NodeNum = NodeIndex;
    } else {
        pub type NodeIndex = usize;
        pub type UldIndex = usize;
        pub type ParcelIndex = usize;
        pub type NodeNum = NodeIndex;
    }
}

/// a lattice point in a ULD, in integer centimeters
pub type Point = [Length; 3];
/// axis-aligned extents, one per axis
pub type Dims = [Length; 3];

/// an axis-aligned box `[corner, corner + extent)`; the unit of both free space and committed cargo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// minimum corner of the box
    pub corner: Point,
    /// extent along each axis, all positive for a non-degenerate region
    pub extent: Dims,
}

impl Region {
    pub fn new(corner: Point, extent: Dims) -> Self {
        debug_assert!(
            extent.iter().all(|&e| e > 0),
            "degenerate region at {:?} with extent {:?}",
            corner,
            extent
        );
        Self { corner, extent }
    }

    /// the whole interior of a ULD with the given dimensions
    pub fn from_dimensions(dimensions: Dims) -> Self {
        Self::new([0, 0, 0], dimensions)
    }

    pub fn end_corner(&self) -> Point {
        [
            self.corner[0] + self.extent[0],
            self.corner[1] + self.extent[1],
            self.corner[2] + self.extent[2],
        ]
    }

    pub fn volume(&self) -> Volume {
        self.extent[0] * self.extent[1] * self.extent[2]
    }

    /// `al·aw + aw·ah + ah·al`, the tie-break key of the surface-area policies
    pub fn half_surface_area(&self) -> Volume {
        self.extent[0] * self.extent[1] + self.extent[1] * self.extent[2] + self.extent[2] * self.extent[0]
    }

    /// whether a box with the given oriented extents fits when anchored at this region's corner
    pub fn admits(&self, dims: &Dims) -> bool {
        dims[0] <= self.extent[0] && dims[1] <= self.extent[1] && dims[2] <= self.extent[2]
    }

    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let mut corner = [0; 3];
        let mut extent = [0; 3];
        let self_end = self.end_corner();
        let other_end = other.end_corner();
        for axis in 0..3 {
            let start = Length::max(self.corner[axis], other.corner[axis]);
            let end = Length::min(self_end[axis], other_end[axis]);
            if start >= end {
                return None;
            }
            corner[axis] = start;
            extent[axis] = end - start;
        }
        Some(Region::new(corner, extent))
    }

    pub fn is_disjoint(&self, other: &Region) -> bool {
        self.intersection(other).is_none()
    }

    /// whether `other` lies completely inside this region
    pub fn contains(&self, other: &Region) -> bool {
        let self_end = self.end_corner();
        let other_end = other.end_corner();
        (0..3).all(|axis| other.corner[axis] >= self.corner[axis] && other_end[axis] <= self_end[axis])
    }

    pub fn contains_point(&self, point: &Point) -> bool {
        let end = self.end_corner();
        (0..3).all(|axis| point[axis] >= self.corner[axis] && point[axis] < end[axis])
    }

    /// decompose `self − hole` into up to six overlapping slabs, keeping only those whose
    /// extents are all at least `min_dimension`; the caller guarantees the hole intersects self
    pub fn subtract(&self, hole: &Region, min_dimension: Length) -> Vec<Region> {
        let [ax, ay, az] = self.corner;
        let [al, aw, ah] = self.extent;
        let [x, y, z] = hole.corner;
        let [ol, ow, oh] = hole.extent;
        // convention: stand at the origin and look towards +x
        let slabs = [
            Region {
                corner: [ax, y + ow, az],
                extent: [al, aw - (y + ow - ay), ah],
            },
            Region {
                corner: [ax, ay, az],
                extent: [al, y - ay, ah],
            },
            Region {
                corner: [ax, ay, az],
                extent: [x - ax, aw, ah],
            },
            Region {
                corner: [x + ol, ay, az],
                extent: [al - (x + ol - ax), aw, ah],
            },
            Region {
                corner: [ax, ay, az],
                extent: [al, aw, z - az],
            },
            Region {
                corner: [ax, ay, z + oh],
                extent: [al, aw, ah - (z + oh - az)],
            },
        ];
        slabs
            .into_iter()
            .filter(|slab| slab.extent.iter().all(|&e| e >= min_dimension))
            .collect()
    }
}

/// the up-to-six axis-aligned permutations of a parcel's natural dimensions, deduplicated
/// preserving first occurrence so first-fit orientation selection stays deterministic
pub fn orientations_of(dims: &Dims) -> Vec<Dims> {
    let permutations = [
        [dims[0], dims[1], dims[2]],
        [dims[0], dims[2], dims[1]],
        [dims[1], dims[0], dims[2]],
        [dims[1], dims[2], dims[0]],
        [dims[2], dims[0], dims[1]],
        [dims[2], dims[1], dims[0]],
    ];
    let mut orientations: Vec<Dims> = Vec::with_capacity(6);
    for permutation in permutations.into_iter() {
        if !orientations.contains(&permutation) {
            orientations.push(permutation);
        }
    }
    orientations
}

/// one entry of the ULD manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UldSpec {
    /// the unique identifier of this container
    pub id: String,
    /// interior dimensions (L, W, H) in centimeters
    pub dimensions: Dims,
    /// weight capacity in kilograms
    pub weight_limit: Weight,
}

impl UldSpec {
    pub fn new(id: impl Into<String>, dimensions: Dims, weight_limit: Weight) -> Self {
        Self {
            id: id.into(),
            dimensions,
            weight_limit,
        }
    }

    pub fn volume(&self) -> Volume {
        self.dimensions[0] * self.dimensions[1] * self.dimensions[2]
    }
}

/// one entry of the parcel manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelSpec {
    /// the unique identifier of this parcel
    pub id: String,
    /// natural dimensions (l, w, h) in centimeters; the committed orientation may permute them
    pub dimensions: Dims,
    /// weight in kilograms
    pub weight: Weight,
    /// priority parcels must all ship; leaving one behind invalidates the plan
    pub priority: bool,
    /// cost of not shipping this parcel; meaningful only for economy parcels
    #[serde(default)]
    pub delay_cost: Cost,
}

impl ParcelSpec {
    pub fn new(id: impl Into<String>, dimensions: Dims, weight: Weight, priority: bool, delay_cost: Cost) -> Self {
        Self {
            id: id.into(),
            dimensions,
            weight,
            priority,
            delay_cost,
        }
    }

    pub fn volume(&self) -> Volume {
        self.dimensions[0] * self.dimensions[1] * self.dimensions[2]
    }

    pub fn min_dimension(&self) -> Length {
        *self.dimensions.iter().min().unwrap()
    }
}

/// everything a pack run needs to know up front: the fleet, the catalogue and the spread penalty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackInitializer {
    /// the available containers
    pub ulds: Vec<UldSpec>,
    /// the full parcel catalogue; there are no online arrivals
    pub parcels: Vec<ParcelSpec>,
    /// fixed penalty charged once per ULD that ends up holding any priority parcel
    pub spread_penalty: Cost,
}

impl PackInitializer {
    pub fn new(ulds: Vec<UldSpec>, parcels: Vec<ParcelSpec>, spread_penalty: Cost) -> Self {
        Self {
            ulds,
            parcels,
            spread_penalty,
        }
    }

    /// the smallest side among all parcels; free regions thinner than this are unpackable
    /// and the representations are allowed to discard them
    pub fn minimum_dimension(&self) -> Length {
        self.parcels.iter().map(|parcel| parcel.min_dimension()).min().unwrap_or(1)
    }

    pub fn sanity_check(&self) -> Result<(), String> {
        if self.ulds.is_empty() {
            return Err("at least one ULD required".to_string());
        }
        if self.spread_penalty < 0 {
            return Err(format!("negative spread penalty {}", self.spread_penalty));
        }
        let mut uld_ids = std::collections::HashSet::new();
        for uld in self.ulds.iter() {
            if uld.dimensions.iter().any(|&d| d <= 0) {
                return Err(format!("ULD {} has non-positive dimensions {:?}", uld.id, uld.dimensions));
            }
            if uld.weight_limit < 0 {
                return Err(format!("ULD {} has negative weight limit {}", uld.id, uld.weight_limit));
            }
            if !uld_ids.insert(uld.id.as_str()) {
                return Err(format!("duplicate ULD identifier {}", uld.id));
            }
        }
        let mut parcel_ids = std::collections::HashSet::new();
        for parcel in self.parcels.iter() {
            if parcel.dimensions.iter().any(|&d| d <= 0) {
                return Err(format!(
                    "parcel {} has non-positive dimensions {:?}",
                    parcel.id, parcel.dimensions
                ));
            }
            if parcel.weight < 0 {
                return Err(format!("parcel {} has negative weight {}", parcel.id, parcel.weight));
            }
            if !parcel.priority && parcel.delay_cost < 0 {
                return Err(format!("parcel {} has negative delay cost {}", parcel.id, parcel.delay_cost));
            }
            if !parcel_ids.insert(parcel.id.as_str()) {
                return Err(format!("duplicate parcel identifier {}", parcel.id));
            }
        }
        Ok(())
    }
}

/// a committed placement: where one parcel sits inside one ULD, in which orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// index into [`PackInitializer::parcels`]
    pub parcel_index: ParcelIndex,
    /// index into [`PackInitializer::ulds`]
    pub uld_index: UldIndex,
    /// minimum corner of the oriented parcel box
    pub anchor: Point,
    /// the committed orientation, a permutation of the parcel's natural dimensions
    pub oriented: Dims,
}

impl Placement {
    /// the volume occupied by this placement
    pub fn region(&self) -> Region {
        Region::new(self.anchor, self.oriented)
    }
}

/// the outcome of a pack run, ready to be written as the output ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackPlan {
    /// sum of unshipped economy delay costs plus the priority spread penalty
    pub total_cost: Cost,
    /// one entry per parcel, in catalogue order; `None` for unpacked parcels
    pub placements: Vec<Option<Placement>>,
    /// the number of ULDs holding at least one priority parcel
    pub priority_uld_num: usize,
    /// false iff some priority parcel could not be packed, which invalidates the plan
    pub priority_complete: bool,
}

impl PackPlan {
    pub fn num_packed(&self) -> usize {
        self.placements.iter().filter(|placement| placement.is_some()).count()
    }
}

/// use Xoshiro256StarStar for deterministic random number generator
pub type DeterministicRng = rand_xoshiro::Xoshiro256StarStar;

pub trait F64Rng {
    fn next_f64(&mut self) -> f64;
}

impl F64Rng for DeterministicRng {
    fn next_f64(&mut self) -> f64 {
        f64::from_bits(0x3FF << 52 | self.next_u64() >> 12) - 1.
    }
}

/// record the packing time of multiple problem instances
pub struct BenchmarkProfiler {
    /// each record corresponds to a different instance
    pub records: Vec<BenchmarkProfilerEntry>,
    /// summation of all packing time
    pub sum_round_time: f64,
    /// total number of parcels across rounds
    pub sum_parcel_num: usize,
    /// the file to output the profiler results
    pub benchmark_profiler_output: Option<File>,
}

impl BenchmarkProfiler {
    pub fn new(detail_log_file: Option<String>) -> Self {
        let benchmark_profiler_output = detail_log_file.map(|filename| File::create(filename).unwrap());
        Self {
            records: vec![],
            sum_round_time: 0.,
            sum_parcel_num: 0,
            benchmark_profiler_output,
        }
    }
    /// record the beginning of a pack run
    pub fn begin(&mut self, initializer: &PackInitializer) {
        // sanity check last entry, if exists, is complete
        if let Some(last_entry) = self.records.last() {
            assert!(
                last_entry.is_complete(),
                "the last benchmark profiler entry is not complete, make sure to call `begin` and `end` in pairs"
            );
        }
        let entry = BenchmarkProfilerEntry::new(initializer);
        self.records.push(entry);
        self.records.last_mut().unwrap().record_begin();
    }
    pub fn event(&mut self, event_name: String) {
        let last_entry = self
            .records
            .last_mut()
            .expect("last entry not exists, call `begin` before `end`");
        last_entry.record_event(event_name);
    }
    /// record the ending of a pack run
    pub fn end(&mut self, solver: Option<&dyn PackSolver>) {
        let last_entry = self
            .records
            .last_mut()
            .expect("last entry not exists, call `begin` before `end`");
        last_entry.record_end();
        self.sum_round_time += last_entry.round_time.unwrap();
        self.sum_parcel_num += last_entry.parcel_num;
        if let Some(file) = self.benchmark_profiler_output.as_mut() {
            let mut events = serde_json::Map::new();
            for (event_name, time) in last_entry.events.iter() {
                events.insert(event_name.clone(), json!(time));
            }
            let mut value = json!({
                "round_time": last_entry.round_time.unwrap(),
                "parcel_num": last_entry.parcel_num,
                "events": events,
            });
            if let Some(solver) = solver {
                let solver_profile = solver.generate_profiler_report();
                value
                    .as_object_mut()
                    .unwrap()
                    .insert("solver_profile".to_string(), solver_profile);
            }
            file.write_all(serde_json::to_string(&value).unwrap().as_bytes()).unwrap();
            file.write_all(b"\n").unwrap();
        }
    }
    /// print out a brief one-line statistics
    pub fn brief(&self) -> String {
        let total = self.sum_round_time / (self.records.len() as f64);
        let per_parcel = self.sum_round_time / (self.sum_parcel_num as f64);
        format!("total: {total:.3e}, parcel: {per_parcel:.3e},")
    }
}

pub struct BenchmarkProfilerEntry {
    /// the number of parcels in this instance
    pub parcel_num: usize,
    /// the time of beginning a pack run
    begin_time: Option<Instant>,
    /// record additional events
    pub events: Vec<(String, f64)>,
    /// interval between calling [`Self::record_begin`] to calling [`Self::record_end`]
    pub round_time: Option<f64>,
}

impl BenchmarkProfilerEntry {
    pub fn new(initializer: &PackInitializer) -> Self {
        Self {
            parcel_num: initializer.parcels.len(),
            begin_time: None,
            events: vec![],
            round_time: None,
        }
    }
    /// record the beginning of a pack run
    pub fn record_begin(&mut self) {
        assert_eq!(self.begin_time, None, "do not call `record_begin` twice on the same entry");
        self.begin_time = Some(Instant::now());
    }
    /// record the ending of a pack run
    pub fn record_end(&mut self) {
        let begin_time = self
            .begin_time
            .as_ref()
            .expect("make sure to call `record_begin` before calling `record_end`");
        self.round_time = Some(begin_time.elapsed().as_secs_f64());
    }
    pub fn record_event(&mut self, event_name: String) {
        let begin_time = self
            .begin_time
            .as_ref()
            .expect("make sure to call `record_begin` before calling `record_end`");
        self.events.push((event_name, begin_time.elapsed().as_secs_f64()));
    }
    pub fn is_complete(&self) -> bool {
        self.round_time.is_some()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn util_region_intersection_1() {
        // cargo test util_region_intersection_1 -- --nocapture
        let a = Region::new([0, 0, 0], [10, 10, 10]);
        let b = Region::new([5, 5, 5], [10, 10, 10]);
        assert_eq!(a.intersection(&b), Some(Region::new([5, 5, 5], [5, 5, 5])));
        let c = Region::new([10, 0, 0], [5, 5, 5]);
        assert!(a.is_disjoint(&c)); // face contact is not an intersection
        assert!(a.contains(&Region::new([2, 3, 4], [1, 1, 1])));
        assert!(!a.contains(&b));
    }

    #[test]
    fn util_region_subtract_center_hole() {
        // cargo test util_region_subtract_center_hole -- --nocapture
        let region = Region::new([0, 0, 0], [30, 30, 30]);
        let hole = Region::new([10, 10, 10], [10, 10, 10]);
        let slabs = region.subtract(&hole, 1);
        assert_eq!(slabs.len(), 6);
        // every slab avoids the hole and stays within the region
        for slab in slabs.iter() {
            assert!(region.contains(slab));
            assert!(slab.is_disjoint(&hole));
        }
        // the union covers every unit cell outside the hole
        for x in 0..30 {
            for y in 0..30 {
                for z in 0..30 {
                    let cell = Region::new([x, y, z], [1, 1, 1]);
                    let covered = slabs.iter().any(|slab| slab.contains(&cell));
                    assert_eq!(covered, hole.intersection(&cell).is_none(), "cell {:?}", cell);
                }
            }
        }
    }

    #[test]
    fn util_region_subtract_minimum_dimension() {
        // cargo test util_region_subtract_minimum_dimension -- --nocapture
        let region = Region::new([0, 0, 0], [10, 10, 10]);
        let hole = Region::new([0, 0, 0], [6, 6, 6]);
        // every residual slab is thinner than 5 in some axis
        let slabs = region.subtract(&hole, 5);
        assert!(slabs.is_empty(), "kept {slabs:?}");
        let slabs = region.subtract(&hole, 4);
        assert_eq!(slabs.len(), 3);
    }

    #[test]
    fn util_region_subtract_corner_hole() {
        // cargo test util_region_subtract_corner_hole -- --nocapture
        let region = Region::new([0, 0, 0], [10, 10, 10]);
        let hole = Region::new([0, 0, 0], [5, 5, 5]);
        let slabs = region.subtract(&hole, 1);
        // the three degenerate slabs on the -x/-y/-z sides must not appear
        assert_eq!(slabs.len(), 3);
        assert!(slabs.contains(&Region::new([0, 5, 0], [10, 5, 10])));
        assert!(slabs.contains(&Region::new([5, 0, 0], [5, 10, 10])));
        assert!(slabs.contains(&Region::new([0, 0, 5], [10, 10, 5])));
    }

    #[test]
    fn util_orientations_dedup() {
        // cargo test util_orientations_dedup -- --nocapture
        assert_eq!(orientations_of(&[1, 2, 3]).len(), 6);
        assert_eq!(orientations_of(&[2, 2, 3]).len(), 3);
        assert_eq!(orientations_of(&[5, 5, 5]), vec![[5, 5, 5]]);
        // natural orientation always comes first
        assert_eq!(orientations_of(&[4, 9, 4])[0], [4, 9, 4]);
    }

    #[test]
    fn util_initializer_sanity_check() {
        // cargo test util_initializer_sanity_check -- --nocapture
        let uld = UldSpec::new("U1", [100, 100, 100], 2000);
        let parcel = ParcelSpec::new("P-1", [40, 50, 60], 80, false, 120);
        let initializer = PackInitializer::new(vec![uld.clone()], vec![parcel.clone()], 40);
        initializer.sanity_check().unwrap();
        assert_eq!(initializer.minimum_dimension(), 40);
        let mut duplicated = initializer.clone();
        duplicated.ulds.push(uld);
        assert!(duplicated.sanity_check().is_err());
        let mut negative = PackInitializer::new(vec![UldSpec::new("U1", [100, 100, 100], 2000)], vec![parcel], 40);
        negative.parcels[0].delay_cost = -1;
        assert!(negative.sanity_check().is_err());
    }
}
