extern crate cfg_if;
extern crate chrono;
extern crate clap;
extern crate derivative;
extern crate parking_lot;
extern crate rand;
extern crate rand_xoshiro;
extern crate rayon;
extern crate serde;
#[macro_use]
extern crate serde_json;
extern crate urlencoding;
extern crate weak_table;

pub mod example_instances;
pub mod free_space;
pub mod free_space_list;
pub mod free_space_tree;
pub mod manifests;
pub mod pack_solver;
pub mod util;
pub mod validator;
pub mod visualize;

use pack_solver::*;
use util::*;
use validator::*;

/// pack a whole instance with the default space-tree solver and validate the result from the
/// ledger alone (to optimize speed, consider reusing a [`pack_solver::SolverTree`] object)
#[allow(clippy::unnecessary_cast)]
pub fn pack_and_validate(initializer: &PackInitializer) -> Result<PackPlan, String> {
    initializer.sanity_check()?;
    let mut solver = SolverTree::new(initializer);
    solver.solve();
    let plan = solver.plan();
    let validation = validate_plan(initializer, &plan.placements);
    if !validation.is_valid() {
        return Err(format!("invalid plan: {}", validation.violations.join("; ")));
    }
    if !plan.priority_complete {
        let left_behind: Vec<&str> = plan
            .placements
            .iter()
            .enumerate()
            .filter(|(parcel_index, placement)| {
                placement.is_none() && initializer.parcels[*parcel_index].priority
            })
            .map(|(parcel_index, _)| initializer.parcels[parcel_index].id.as_str())
            .collect();
        return Err(format!("priority parcels left behind: {}", left_behind.join(", ")));
    }
    Ok(plan)
}

/// read the two manifests, pack and validate in one call
pub fn pack_manifests(uld_path: &str, parcel_path: &str, spread_penalty: Cost) -> Result<PackPlan, String> {
    let initializer = manifests::read_initializer(uld_path, parcel_path, spread_penalty)?;
    pack_and_validate(&initializer)
}
