//! Example Instances
//!
//! This module contains several instance builders and randomized catalogue utilities. They
//! help to debug and benchmark the solvers, but the random catalogues do not correspond to
//! any real cargo mix; for production planning the manifests come from the outside world
//! through [`crate::manifests`].
//!

use crate::rand_xoshiro::rand_core::SeedableRng;
use crate::rayon::prelude::*;
use rand::Rng;

use super::manifests;
use super::util::*;

pub trait ExampleInstance {
    fn ulds(&self) -> Vec<UldSpec>;
    fn parcels(&self) -> Vec<ParcelSpec>;
    fn spread_penalty(&self) -> Cost;

    /// generate the standard interface to instantiate a pack solver
    fn get_initializer(&self) -> PackInitializer {
        let initializer = PackInitializer::new(self.ulds(), self.parcels(), self.spread_penalty());
        initializer
            .sanity_check()
            .unwrap_or_else(|message| panic!("invalid example instance: {}", message));
        initializer
    }
}

/// a random parcel catalogue: sides uniform in 40..=100 cm, weight loosely tracking volume,
/// economy delay costs uniform in 60..=200; each parcel draws from its own seeded stream so
/// the catalogue is deterministic no matter how rayon schedules the generation
pub fn random_parcels(parcel_num: usize, priority_probability: f64, seed: u64) -> Vec<ParcelSpec> {
    (0..parcel_num)
        .into_par_iter()
        .map(|index| {
            let mut rng = DeterministicRng::seed_from_u64(seed.wrapping_add(index as u64));
            let dimensions = [
                rng.gen_range(40..=100) as Length,
                rng.gen_range(40..=100) as Length,
                rng.gen_range(40..=100) as Length,
            ];
            let volume = dimensions[0] * dimensions[1] * dimensions[2];
            let weight = (volume / 8000) as Weight + rng.gen_range(1..=30) as Weight;
            let priority = rng.next_f64() < priority_probability;
            let delay_cost = if priority { 0 } else { rng.gen_range(60..=200) as Cost };
            ParcelSpec::new(format!("P-{}", index + 1), dimensions, weight, priority, delay_cost)
        })
        .collect()
}

/// the fixed six-ULD fleet of the air cargo challenge, with a random parcel catalogue
#[derive(Debug, Clone)]
pub struct AirChallengeFleet {
    pub parcel_num: usize,
    pub priority_probability: f64,
    pub seed: u64,
    pub spread_penalty: Cost,
}

impl AirChallengeFleet {
    pub fn new(parcel_num: usize, seed: u64) -> Self {
        Self {
            parcel_num,
            priority_probability: 0.25,
            seed,
            spread_penalty: 5000,
        }
    }
}

impl ExampleInstance for AirChallengeFleet {
    fn ulds(&self) -> Vec<UldSpec> {
        vec![
            UldSpec::new("U1", [224, 318, 162], 2500),
            UldSpec::new("U2", [224, 318, 162], 2500),
            UldSpec::new("U3", [244, 318, 244], 2800),
            UldSpec::new("U4", [244, 318, 244], 2800),
            UldSpec::new("U5", [244, 318, 285], 3500),
            UldSpec::new("U6", [244, 318, 285], 3500),
        ]
    }

    fn parcels(&self) -> Vec<ParcelSpec> {
        random_parcels(self.parcel_num, self.priority_probability, self.seed)
    }

    fn spread_penalty(&self) -> Cost {
        self.spread_penalty
    }
}

/// a fully random instance: ULD dimensions uniform in 120..=260 cm with volume-tracking
/// weight limits, plus a random parcel catalogue
#[derive(Debug, Clone)]
pub struct RandomInstance {
    pub uld_num: usize,
    pub parcel_num: usize,
    pub priority_probability: f64,
    pub seed: u64,
    pub spread_penalty: Cost,
}

impl RandomInstance {
    pub fn new(uld_num: usize, parcel_num: usize, seed: u64) -> Self {
        Self {
            uld_num,
            parcel_num,
            priority_probability: 0.25,
            seed,
            spread_penalty: 5000,
        }
    }
}

impl ExampleInstance for RandomInstance {
    fn ulds(&self) -> Vec<UldSpec> {
        // a distinct stream from the parcels, so changing the fleet size keeps the catalogue
        let mut rng = DeterministicRng::seed_from_u64(self.seed ^ 0x756c_645f_666c_6565);
        (0..self.uld_num)
            .map(|index| {
                let dimensions = [
                    rng.gen_range(120..=260) as Length,
                    rng.gen_range(120..=260) as Length,
                    rng.gen_range(120..=260) as Length,
                ];
                let weight_limit = (dimensions[0] * dimensions[1] * dimensions[2] / 4000) as Weight;
                UldSpec::new(format!("U{}", index + 1), dimensions, weight_limit)
            })
            .collect()
    }

    fn parcels(&self) -> Vec<ParcelSpec> {
        random_parcels(self.parcel_num, self.priority_probability, self.seed)
    }

    fn spread_penalty(&self) -> Cost {
        self.spread_penalty
    }
}

/// wrap a pair of on-disk manifests as an instance
#[derive(Debug, Clone)]
pub struct ManifestReader {
    pub uld_file: String,
    pub parcel_file: String,
    pub spread_penalty: Cost,
}

impl ManifestReader {
    pub fn new(uld_file: String, parcel_file: String, spread_penalty: Cost) -> Self {
        Self {
            uld_file,
            parcel_file,
            spread_penalty,
        }
    }
}

impl ExampleInstance for ManifestReader {
    fn ulds(&self) -> Vec<UldSpec> {
        manifests::read_uld_manifest(&self.uld_file).unwrap_or_else(|message| panic!("{}", message))
    }

    fn parcels(&self) -> Vec<ParcelSpec> {
        manifests::read_parcel_manifest(&self.parcel_file).unwrap_or_else(|message| panic!("{}", message))
    }

    fn spread_penalty(&self) -> Cost {
        self.spread_penalty
    }
}

#[cfg(test)]
pub mod tests {
    use super::super::pack_solver::*;
    use super::super::validator::*;
    use super::*;

    #[test]
    fn example_instances_deterministic() {
        // cargo test example_instances_deterministic -- --nocapture
        let first = RandomInstance::new(3, 50, 42).get_initializer();
        let second = RandomInstance::new(3, 50, 42).get_initializer();
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
        let shifted = RandomInstance::new(3, 50, 43).get_initializer();
        assert_ne!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&shifted).unwrap()
        );
    }

    #[test]
    fn example_instances_ranges() {
        // cargo test example_instances_ranges -- --nocapture
        let parcels = random_parcels(200, 0.25, 7);
        assert_eq!(parcels.len(), 200);
        let mut priority_num = 0;
        for parcel in parcels.iter() {
            assert!(parcel.dimensions.iter().all(|&d| (40..=100).contains(&d)));
            assert!(parcel.weight > 0);
            if parcel.priority {
                priority_num += 1;
                assert_eq!(parcel.delay_cost, 0);
            } else {
                assert!((60..=200).contains(&parcel.delay_cost));
            }
        }
        // around a quarter of the catalogue is priority
        assert!((20..=80).contains(&priority_num), "priority_num = {}", priority_num);
    }

    #[test]
    fn example_instances_end_to_end_valid_plans() {
        // cargo test example_instances_end_to_end_valid_plans -- --nocapture
        for seed in [0, 1, 2] {
            let initializer = AirChallengeFleet::new(120, seed).get_initializer();
            for solver in [
                &mut SolverList::new(&initializer) as &mut dyn PackSolver,
                &mut SolverTree::new(&initializer) as &mut dyn PackSolver,
            ] {
                solver.solve();
                let plan = solver.plan();
                let validation = validate_plan(&initializer, &plan.placements);
                assert!(
                    validation.is_valid(),
                    "seed {} produced violations: {:?}",
                    seed,
                    validation.violations
                );
                assert!(plan.num_packed() > 0, "seed {} packed nothing", seed);
            }
        }
    }
}
