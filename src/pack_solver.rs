//! Pack Solver
//!
//! The driver that turns a [`PackInitializer`] into a [`PackPlan`]: it orders parcels
//! (priority first, then economy by value density), orders candidate ULDs per parcel, runs the
//! placement query of a free-space representation and commits successful fits. Both
//! representations plug in behind the same [`PackSolver`] trait, even interchangeably.
//!

use std::cmp::Ordering;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::free_space::*;
use super::free_space_list::FreeSpaceList;
use super::free_space_tree::FreeSpaceTree;
use super::util::*;
use super::visualize::*;

/// how to order candidate ULDs for an economy parcel
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize, Debug)]
pub enum EconomyUldOrder {
    /// least volume-utilized ULD first, so a ULD keeps concentrating parcels once it starts
    VolumeUtilization,
    /// largest remaining weight capacity first
    RemainingWeight,
}

/// the tunables of a pack run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PackConfig {
    /// placement policies of the priority pass
    pub priority_fit: FitConfig,
    /// placement policies of the economy pass
    pub economy_fit: FitConfig,
    /// candidate ULD ordering of the economy pass; the priority pass always goes biggest first
    pub economy_uld_order: EconomyUldOrder,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            priority_fit: FitConfig::default(),
            economy_fit: FitConfig::default(),
            economy_uld_order: EconomyUldOrder::VolumeUtilization,
        }
    }
}

/// the mutable state of one ULD, exclusively owned by the driver for the whole run
pub struct UldState<FreeSpace: FreeSpaceImpl> {
    pub spec: UldSpec,
    pub free_space: FreeSpace,
    /// cumulative weight of committed parcels, never above the weight limit
    pub committed_weight: Weight,
    /// cumulative volume of committed parcels, never above the interior volume
    pub committed_volume: Volume,
    /// whether any priority parcel has been committed here
    pub has_priority: bool,
}

/// a single-pass greedy pack driver over any free-space representation
pub struct PackDriver<FreeSpace: FreeSpaceImpl> {
    pub initializer: PackInitializer,
    pub config: PackConfig,
    pub ulds: Vec<UldState<FreeSpace>>,
    /// one slot per parcel, filled on commit
    pub placements: Vec<Option<Placement>>,
    /// parcels no ULD accepted, in processing order
    pub unpacked: Vec<ParcelIndex>,
    solved: bool,
}

/// a serial driver over the flat free-rectangle list
pub type SolverList = PackDriver<FreeSpaceList>;
/// a serial driver over the space tree
pub type SolverTree = PackDriver<FreeSpaceTree>;

/// descending value density `delay_cost / volume`, then descending weight density
/// `weight / volume`; fractions are compared by exact cross-multiplication so equal keys can
/// never flip from floating-point rounding
fn economy_order(a: &ParcelSpec, b: &ParcelSpec) -> Ordering {
    let value = (b.delay_cost as i128 * a.volume() as i128).cmp(&(a.delay_cost as i128 * b.volume() as i128));
    value.then((b.weight as i128 * a.volume() as i128).cmp(&(a.weight as i128 * b.volume() as i128)))
}

impl<FreeSpace: FreeSpaceImpl> PackDriver<FreeSpace> {
    pub fn new(initializer: &PackInitializer) -> Self {
        Self::new_config(initializer, &PackConfig::default())
    }

    pub fn new_config(initializer: &PackInitializer, config: &PackConfig) -> Self {
        let minimum_dimension = initializer.minimum_dimension();
        let ulds = initializer
            .ulds
            .iter()
            .map(|spec| UldState {
                spec: spec.clone(),
                free_space: FreeSpace::new_uld(spec.dimensions, minimum_dimension),
                committed_weight: 0,
                committed_volume: 0,
                has_priority: false,
            })
            .collect();
        Self {
            initializer: initializer.clone(),
            config: *config,
            ulds,
            placements: vec![None; initializer.parcels.len()],
            unpacked: vec![],
            solved: false,
        }
    }

    /// candidate ULD order of the priority pass: pack into the biggest containers first
    fn priority_uld_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.ulds.len()).collect();
        order.sort_by(|&a, &b| self.ulds[b].spec.volume().cmp(&self.ulds[a].spec.volume()));
        order
    }

    /// candidate ULD order of the economy pass, re-derived per parcel from the current state
    fn economy_uld_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.ulds.len()).collect();
        match self.config.economy_uld_order {
            EconomyUldOrder::VolumeUtilization => {
                // ascending committed_volume / interior volume, exact comparison
                order.sort_by(|&a, &b| {
                    let left = self.ulds[a].committed_volume as i128 * self.ulds[b].spec.volume() as i128;
                    let right = self.ulds[b].committed_volume as i128 * self.ulds[a].spec.volume() as i128;
                    left.cmp(&right)
                });
            }
            EconomyUldOrder::RemainingWeight => {
                order.sort_by(|&a, &b| {
                    let left = self.ulds[b].spec.weight_limit - self.ulds[b].committed_weight;
                    let right = self.ulds[a].spec.weight_limit - self.ulds[a].committed_weight;
                    left.cmp(&right)
                });
            }
        }
        order
    }

    /// offer one parcel to the candidate ULDs in order; commits into the first that takes it
    #[allow(clippy::unnecessary_cast)]
    fn try_pack_parcel(&mut self, parcel_index: usize, uld_order: &[usize], fit_config: &FitConfig) -> bool {
        for &uld_index in uld_order.iter() {
            let parcel = &self.initializer.parcels[parcel_index];
            let uld = &mut self.ulds[uld_index];
            // weight admissibility gate, checked before the placement query
            if parcel.weight + uld.committed_weight > uld.spec.weight_limit {
                continue;
            }
            if let Some(fit) = uld.free_space.find_fit(&parcel.dimensions, fit_config) {
                uld.free_space.commit(&fit);
                uld.committed_weight += parcel.weight;
                uld.committed_volume += parcel.volume();
                uld.has_priority |= parcel.priority;
                self.placements[parcel_index] = Some(Placement {
                    parcel_index: parcel_index as ParcelIndex,
                    uld_index: uld_index as UldIndex,
                    anchor: fit.anchor,
                    oriented: fit.oriented,
                });
                return true;
            }
        }
        false
    }

    #[allow(clippy::unnecessary_cast)]
    fn run(&mut self, mut visualizer: Option<&mut Visualizer>) {
        assert!(!self.solved, "driver already ran; call `clear` before solving again");
        self.solved = true;
        // priority parcels by volume descending
        let mut priority_parcels: Vec<usize> = (0..self.initializer.parcels.len())
            .filter(|&index| self.initializer.parcels[index].priority)
            .collect();
        priority_parcels.sort_by(|&a, &b| {
            self.initializer.parcels[b]
                .volume()
                .cmp(&self.initializer.parcels[a].volume())
        });
        // economy parcels by value density descending
        let mut economy_parcels: Vec<usize> = (0..self.initializer.parcels.len())
            .filter(|&index| !self.initializer.parcels[index].priority)
            .collect();
        economy_parcels
            .sort_by(|&a, &b| economy_order(&self.initializer.parcels[a], &self.initializer.parcels[b]));
        // the priority-before-economy barrier is what makes priority dominance hold: no economy
        // parcel is offered space before every priority parcel had its chance
        let priority_order = self.priority_uld_order();
        let priority_fit = self.config.priority_fit;
        for parcel_index in priority_parcels {
            if !self.try_pack_parcel(parcel_index, &priority_order, &priority_fit) {
                self.unpacked.push(parcel_index as ParcelIndex);
            }
        }
        if let Some(visualizer) = visualizer.as_mut() {
            visualizer.snapshot("priority pass".to_string(), self).unwrap();
        }
        let economy_fit = self.config.economy_fit;
        for parcel_index in economy_parcels {
            let economy_order = self.economy_uld_order();
            if !self.try_pack_parcel(parcel_index, &economy_order, &economy_fit) {
                self.unpacked.push(parcel_index as ParcelIndex);
            }
        }
        if let Some(visualizer) = visualizer.as_mut() {
            visualizer.snapshot("economy pass".to_string(), self).unwrap();
        }
    }

    #[allow(clippy::unnecessary_cast)]
    pub fn priority_complete(&self) -> bool {
        self.unpacked
            .iter()
            .all(|&parcel_index| !self.initializer.parcels[parcel_index as usize].priority)
    }

    /// re-derive every representation invariant plus the weight and volume feasibility of each ULD
    pub fn sanity_check(&self) -> Result<(), String> {
        for uld in self.ulds.iter() {
            uld.free_space.sanity_check()?;
            if uld.committed_weight > uld.spec.weight_limit {
                return Err(format!(
                    "ULD {} carries {} kg over its limit {}",
                    uld.spec.id, uld.committed_weight, uld.spec.weight_limit
                ));
            }
            if uld.committed_volume > uld.spec.volume() {
                return Err(format!("ULD {} commits more volume than it has", uld.spec.id));
            }
        }
        Ok(())
    }
}

/// the common solver interface of all drivers
pub trait PackSolver {
    fn clear(&mut self);
    fn solve_visualizer(&mut self, visualizer: Option<&mut Visualizer>);
    fn solve(&mut self) {
        self.solve_visualizer(None)
    }
    fn plan_visualizer(&mut self, visualizer: Option<&mut Visualizer>) -> PackPlan;
    fn plan(&mut self) -> PackPlan {
        self.plan_visualizer(None)
    }
    fn total_cost(&self) -> Cost;
    fn generate_profiler_report(&self) -> serde_json::Value;
}

impl<FreeSpace: FreeSpaceImpl> PackSolver for PackDriver<FreeSpace> {
    fn clear(&mut self) {
        for uld in self.ulds.iter_mut() {
            uld.free_space.clear();
            uld.committed_weight = 0;
            uld.committed_volume = 0;
            uld.has_priority = false;
        }
        self.placements = vec![None; self.initializer.parcels.len()];
        self.unpacked.clear();
        self.solved = false;
    }

    fn solve_visualizer(&mut self, visualizer: Option<&mut Visualizer>) {
        self.run(visualizer);
    }

    fn plan_visualizer(&mut self, visualizer: Option<&mut Visualizer>) -> PackPlan {
        assert!(self.solved, "call `solve` before asking for the plan");
        let plan = PackPlan {
            total_cost: self.total_cost(),
            placements: self.placements.clone(),
            priority_uld_num: self.ulds.iter().filter(|uld| uld.has_priority).count(),
            priority_complete: self.priority_complete(),
        };
        if let Some(visualizer) = visualizer {
            visualizer.snapshot("final plan".to_string(), self).unwrap();
        }
        plan
    }

    #[allow(clippy::unnecessary_cast)]
    fn total_cost(&self) -> Cost {
        let delay_cost: Cost = self
            .unpacked
            .iter()
            .map(|&parcel_index| &self.initializer.parcels[parcel_index as usize])
            .filter(|parcel| !parcel.priority)
            .map(|parcel| parcel.delay_cost)
            .sum();
        let spread_cost =
            self.initializer.spread_penalty * self.ulds.iter().filter(|uld| uld.has_priority).count() as Cost;
        delay_cost + spread_cost
    }

    fn generate_profiler_report(&self) -> serde_json::Value {
        json!({
            "uld_num": self.ulds.len(),
            "parcel_num": self.initializer.parcels.len(),
            "packed_num": self.placements.iter().filter(|placement| placement.is_some()).count(),
            "unpacked_num": self.unpacked.len(),
            "total_cost": self.total_cost(),
            "priority_uld_num": self.ulds.iter().filter(|uld| uld.has_priority).count(),
            "priority_complete": self.priority_complete(),
            "free_space": self.ulds.iter().map(|uld| uld.free_space.generate_profiler_report()).collect::<Vec<_>>(),
        })
    }
}

impl<FreeSpace: FreeSpaceImpl> PackVisualizer for PackDriver<FreeSpace> {
    #[allow(clippy::unnecessary_cast)]
    fn snapshot(&self, abbrev: bool) -> serde_json::Value {
        let mut ulds = Vec::<serde_json::Value>::new();
        for uld in self.ulds.iter() {
            ulds.push(json!({
                (if abbrev { "i" } else { "id" }): uld.spec.id.clone(),
                (if abbrev { "d" } else { "dimensions" }): uld.spec.dimensions,
                (if abbrev { "w" } else { "committed_weight" }): uld.committed_weight,
                (if abbrev { "v" } else { "committed_volume" }): uld.committed_volume,
                (if abbrev { "p" } else { "has_priority" }): uld.has_priority,
                (if abbrev { "f" } else { "free_regions" }): uld.free_space.free_regions(),
            }));
        }
        let placements: Vec<serde_json::Value> = self
            .placements
            .iter()
            .map(|placement| match placement {
                Some(placement) => json!({
                    (if abbrev { "u" } else { "uld_index" }): placement.uld_index,
                    (if abbrev { "a" } else { "anchor" }): placement.anchor,
                    (if abbrev { "o" } else { "oriented" }): placement.oriented,
                }),
                None => serde_json::Value::Null,
            })
            .collect();
        json!({
            "ulds": ulds,
            "placements": placements,
            "unpacked": self.unpacked.clone(),
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn single_uld_initializer(dimensions: Dims, weight_limit: Weight, parcels: Vec<ParcelSpec>) -> PackInitializer {
        PackInitializer::new(vec![UldSpec::new("U1", dimensions, weight_limit)], parcels, 40)
    }

    fn solve_both(initializer: &PackInitializer) -> (PackPlan, PackPlan) {
        let mut list_solver = SolverList::new(initializer);
        list_solver.solve();
        list_solver.sanity_check().unwrap();
        let mut tree_solver = SolverTree::new(initializer);
        tree_solver.solve();
        tree_solver.sanity_check().unwrap();
        (list_solver.plan(), tree_solver.plan())
    }

    #[test]
    fn pack_solver_single_priority_parcel() {
        // cargo test pack_solver_single_priority_parcel -- --nocapture
        let initializer = single_uld_initializer(
            [100, 100, 100],
            1000,
            vec![ParcelSpec::new("P-1", [60, 60, 60], 100, true, 0)],
        );
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.priority_complete);
            assert_eq!(plan.num_packed(), 1);
            let placement = plan.placements[0].unwrap();
            assert_eq!(placement.anchor, [0, 0, 0]);
            // the only cost is the spread penalty of the single priority ULD
            assert_eq!(plan.total_cost, 40);
            assert_eq!(plan.priority_uld_num, 1);
        }
    }

    #[test]
    fn pack_solver_two_priority_parcels() {
        // cargo test pack_solver_two_priority_parcels -- --nocapture
        let initializer = single_uld_initializer(
            [100, 100, 100],
            1000,
            vec![
                ParcelSpec::new("P-1", [60, 60, 60], 100, true, 0),
                ParcelSpec::new("P-2", [40, 40, 40], 100, true, 0),
            ],
        );
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.priority_complete);
            assert_eq!(plan.num_packed(), 2);
            // the bigger parcel goes first and sits at the origin
            assert_eq!(plan.placements[0].unwrap().anchor, [0, 0, 0]);
            // the smaller one lands flush against it, on exactly one axis
            let anchor = plan.placements[1].unwrap().anchor;
            assert_eq!(anchor.iter().filter(|&&c| c == 60).count(), 1, "anchor {:?}", anchor);
            assert_eq!(anchor.iter().filter(|&&c| c == 0).count(), 2, "anchor {:?}", anchor);
            assert_eq!(plan.total_cost, 40);
        }
    }

    #[test]
    fn pack_solver_eight_octants() {
        // cargo test pack_solver_eight_octants -- --nocapture
        let parcels: Vec<ParcelSpec> = (0..8)
            .map(|index| ParcelSpec::new(format!("P-{index}"), [5, 5, 5], 10, true, 0))
            .collect();
        let initializer = single_uld_initializer([10, 10, 10], 1000, parcels);
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.priority_complete);
            assert_eq!(plan.num_packed(), 8);
            let mut anchors: Vec<Point> = plan.placements.iter().map(|p| p.unwrap().anchor).collect();
            anchors.sort();
            anchors.dedup();
            assert_eq!(anchors.len(), 8, "anchors must be the eight octant corners");
            for anchor in anchors {
                assert!(anchor.iter().all(|&c| c == 0 || c == 5), "anchor {:?}", anchor);
            }
        }
    }

    #[test]
    fn pack_solver_ninth_octant_is_fatal() {
        // cargo test pack_solver_ninth_octant_is_fatal -- --nocapture
        let parcels: Vec<ParcelSpec> = (0..9)
            .map(|index| ParcelSpec::new(format!("P-{index}"), [5, 5, 5], 10, true, 0))
            .collect();
        let initializer = single_uld_initializer([10, 10, 10], 1000, parcels);
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(!plan.priority_complete, "nine octants cannot fit in eight slots");
            assert_eq!(plan.num_packed(), 8);
            // an unpacked priority parcel carries no delay cost, the plan is invalid instead
            assert_eq!(plan.total_cost, 40);
        }
    }

    #[test]
    fn pack_solver_economy_concentrates_in_second_uld() {
        // cargo test pack_solver_economy_concentrates_in_second_uld -- --nocapture
        let initializer = PackInitializer::new(
            vec![
                UldSpec::new("U1", [10, 10, 10], 1000),
                UldSpec::new("U2", [10, 10, 10], 1000),
            ],
            vec![
                ParcelSpec::new("P-1", [6, 6, 6], 10, true, 0),
                ParcelSpec::new("E-1", [5, 5, 5], 10, false, 200),
                ParcelSpec::new("E-2", [5, 5, 5], 10, false, 100),
                ParcelSpec::new("E-3", [5, 5, 5], 10, false, 50),
            ],
            40,
        );
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.priority_complete);
            assert_eq!(plan.num_packed(), 4);
            // priority goes into the first ULD, all economy into the emptier second one
            assert_eq!(plan.placements[0].unwrap().uld_index, 0);
            for economy_index in 1..4 {
                assert_eq!(plan.placements[economy_index].unwrap().uld_index, 1);
            }
            assert_eq!(plan.total_cost, 40);
            assert_eq!(plan.priority_uld_num, 1);
        }
    }

    #[test]
    fn pack_solver_rotates_into_flat_uld() {
        // cargo test pack_solver_rotates_into_flat_uld -- --nocapture
        let initializer = single_uld_initializer([10, 5, 5], 1000, vec![ParcelSpec::new("P-1", [5, 5, 10], 10, true, 0)]);
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.priority_complete);
            let placement = plan.placements[0].unwrap();
            assert_eq!(placement.anchor, [0, 0, 0]);
            assert_eq!(placement.oriented, [10, 5, 5]);
        }
    }

    #[test]
    fn pack_solver_weight_gate_skips_full_uld() {
        // cargo test pack_solver_weight_gate_skips_full_uld -- --nocapture
        let initializer = PackInitializer::new(
            vec![
                UldSpec::new("U1", [100, 100, 100], 150),
                UldSpec::new("U2", [50, 50, 50], 1000),
            ],
            vec![
                ParcelSpec::new("P-1", [50, 50, 50], 100, true, 0),
                ParcelSpec::new("P-2", [50, 50, 50], 100, true, 0),
            ],
            40,
        );
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.priority_complete);
            // the second parcel passes the geometric fit in U1 but not the weight gate
            assert_eq!(plan.placements[0].unwrap().uld_index, 0);
            assert_eq!(plan.placements[1].unwrap().uld_index, 1);
            assert_eq!(plan.priority_uld_num, 2);
            assert_eq!(plan.total_cost, 80);
        }
    }

    #[test]
    fn pack_solver_economy_value_density_order() {
        // cargo test pack_solver_economy_value_density_order -- --nocapture
        // only one slot: the denser-value parcel must take it even though it comes later in
        // the catalogue
        let initializer = single_uld_initializer(
            [5, 5, 5],
            1000,
            vec![
                ParcelSpec::new("E-1", [5, 5, 5], 10, false, 100),
                ParcelSpec::new("E-2", [5, 5, 5], 10, false, 300),
            ],
        );
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.placements[0].is_none());
            assert!(plan.placements[1].is_some());
            assert_eq!(plan.total_cost, 100);
        }
    }

    #[test]
    fn pack_solver_priority_dominance() {
        // cargo test pack_solver_priority_dominance -- --nocapture
        // a high-value economy parcel must not block the feasible priority set
        let initializer = single_uld_initializer(
            [10, 10, 10],
            1000,
            vec![
                ParcelSpec::new("E-1", [10, 10, 10], 10, false, 1000000),
                ParcelSpec::new("P-1", [10, 10, 10], 10, true, 0),
            ],
        );
        let (list_plan, tree_plan) = solve_both(&initializer);
        for plan in [list_plan, tree_plan] {
            assert!(plan.priority_complete);
            assert!(plan.placements[1].is_some());
            assert!(plan.placements[0].is_none());
            assert_eq!(plan.total_cost, 1000000 + 40);
        }
    }

    #[test]
    fn pack_solver_clear_allows_rerun() {
        // cargo test pack_solver_clear_allows_rerun -- --nocapture
        let initializer = single_uld_initializer(
            [100, 100, 100],
            1000,
            vec![ParcelSpec::new("P-1", [60, 60, 60], 100, true, 0)],
        );
        let mut solver = SolverTree::new(&initializer);
        solver.solve();
        let first_plan = solver.plan();
        solver.clear();
        solver.solve();
        let second_plan = solver.plan();
        assert_eq!(first_plan.placements, second_plan.placements);
        assert_eq!(first_plan.total_cost, second_plan.total_cost);
    }
}
