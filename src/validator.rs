//! Plan Validator
//!
//! The user-visible correctness gate. It re-derives the plan invariants from the placement
//! ledger alone, independent of whichever free-space representation produced it: containment,
//! pairwise non-overlap and per-ULD weight and volume feasibility. Running it twice on the
//! same ledger gives the same verdict.
//!

use crate::rayon::prelude::*;

use super::util::*;

/// the violations found in one ledger; empty means the plan is valid
#[derive(Debug, Clone)]
pub struct PlanValidation {
    pub violations: Vec<String>,
}

impl PlanValidation {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

#[allow(clippy::unnecessary_cast)]
pub fn validate_plan(initializer: &PackInitializer, placements: &[Option<Placement>]) -> PlanValidation {
    let mut violations = vec![];
    if placements.len() != initializer.parcels.len() {
        violations.push(format!(
            "ledger has {} entries for {} parcels",
            placements.len(),
            initializer.parcels.len()
        ));
        return PlanValidation { violations };
    }
    let mut packed: Vec<(usize, Placement)> = vec![];
    for (parcel_index, placement) in placements.iter().enumerate() {
        let placement = match placement {
            Some(placement) => placement,
            None => continue,
        };
        let parcel = &initializer.parcels[parcel_index];
        if placement.uld_index as usize >= initializer.ulds.len() {
            violations.push(format!("parcel {} placed in unknown ULD {}", parcel.id, placement.uld_index));
            continue;
        }
        let uld = &initializer.ulds[placement.uld_index as usize];
        // the committed orientation must be a permutation of the natural dimensions
        if !orientations_of(&parcel.dimensions).contains(&placement.oriented) {
            violations.push(format!(
                "parcel {} committed with {:?} which is no orientation of {:?}",
                parcel.id, placement.oriented, parcel.dimensions
            ));
            continue;
        }
        // containment within the ULD interior
        if placement.anchor.iter().any(|&c| c < 0)
            || !Region::from_dimensions(uld.dimensions).contains(&placement.region())
        {
            violations.push(format!(
                "parcel {} at {:?} extends beyond ULD {} boundaries",
                parcel.id, placement.anchor, uld.id
            ));
            continue;
        }
        packed.push((parcel_index, *placement));
    }
    // pairwise non-overlap inside each ULD; the sweep is embarrassingly parallel
    let overlap_violations: Vec<String> = packed
        .par_iter()
        .enumerate()
        .flat_map(|(position, &(parcel_index, placement))| {
            let mut found = vec![];
            for &(other_index, other_placement) in packed.iter().skip(position + 1) {
                if placement.uld_index != other_placement.uld_index {
                    continue;
                }
                if !placement.region().is_disjoint(&other_placement.region()) {
                    found.push(format!(
                        "parcel {} overlaps with parcel {} in ULD {}",
                        initializer.parcels[parcel_index].id,
                        initializer.parcels[other_index].id,
                        initializer.ulds[placement.uld_index as usize].id,
                    ));
                }
            }
            found
        })
        .collect();
    violations.extend(overlap_violations);
    // per-ULD weight and volume feasibility
    for (uld_index, uld) in initializer.ulds.iter().enumerate() {
        let mut weight: Weight = 0;
        let mut volume: Volume = 0;
        for &(parcel_index, placement) in packed.iter() {
            if placement.uld_index as usize == uld_index {
                weight += initializer.parcels[parcel_index].weight;
                volume += initializer.parcels[parcel_index].volume();
            }
        }
        if weight > uld.weight_limit {
            violations.push(format!(
                "ULD {} carries {} kg over its weight limit {}",
                uld.id, weight, uld.weight_limit
            ));
        }
        if volume > uld.volume() {
            violations.push(format!("ULD {} commits volume {} over its interior {}", uld.id, volume, uld.volume()));
        }
    }
    PlanValidation { violations }
}

#[cfg(test)]
pub mod tests {
    use super::super::pack_solver::*;
    use super::*;

    fn packed_instance() -> (PackInitializer, Vec<Option<Placement>>) {
        let initializer = PackInitializer::new(
            vec![UldSpec::new("U1", [10, 10, 10], 100)],
            (0..8)
                .map(|index| ParcelSpec::new(format!("P-{index}"), [5, 5, 5], 10, true, 0))
                .collect(),
            40,
        );
        let mut solver = SolverTree::new(&initializer);
        solver.solve();
        let plan = solver.plan();
        (initializer, plan.placements)
    }

    #[test]
    fn validator_accepts_solver_output() {
        // cargo test validator_accepts_solver_output -- --nocapture
        let (initializer, placements) = packed_instance();
        let validation = validate_plan(&initializer, &placements);
        assert!(validation.is_valid(), "unexpected violations: {:?}", validation.violations);
    }

    #[test]
    fn validator_is_idempotent() {
        // cargo test validator_is_idempotent -- --nocapture
        let (initializer, placements) = packed_instance();
        let first = validate_plan(&initializer, &placements);
        let second = validate_plan(&initializer, &placements);
        assert_eq!(first.violations, second.violations);
    }

    #[test]
    fn validator_rejects_overlap() {
        // cargo test validator_rejects_overlap -- --nocapture
        let (initializer, mut placements) = packed_instance();
        // drag the second parcel onto the first
        let first_anchor = placements[0].unwrap().anchor;
        placements[1].as_mut().unwrap().anchor = first_anchor;
        let validation = validate_plan(&initializer, &placements);
        assert!(!validation.is_valid());
        assert!(validation.violations.iter().any(|v| v.contains("overlaps")));
    }

    #[test]
    fn validator_rejects_escape() {
        // cargo test validator_rejects_escape -- --nocapture
        let (initializer, mut placements) = packed_instance();
        placements[3].as_mut().unwrap().anchor = [8, 8, 8];
        let validation = validate_plan(&initializer, &placements);
        assert!(validation.violations.iter().any(|v| v.contains("beyond ULD")));
    }

    #[test]
    fn validator_rejects_fake_orientation() {
        // cargo test validator_rejects_fake_orientation -- --nocapture
        let (initializer, mut placements) = packed_instance();
        placements[2].as_mut().unwrap().oriented = [5, 5, 4];
        let validation = validate_plan(&initializer, &placements);
        assert!(validation.violations.iter().any(|v| v.contains("no orientation")));
    }

    #[test]
    fn validator_rejects_overweight() {
        // cargo test validator_rejects_overweight -- --nocapture
        let mut initializer = PackInitializer::new(
            vec![UldSpec::new("U1", [10, 10, 10], 100)],
            vec![
                ParcelSpec::new("P-0", [5, 5, 5], 60, true, 0),
                ParcelSpec::new("P-1", [5, 5, 5], 60, true, 0),
            ],
            40,
        );
        let placements = vec![
            Some(Placement {
                parcel_index: 0,
                uld_index: 0,
                anchor: [0, 0, 0],
                oriented: [5, 5, 5],
            }),
            Some(Placement {
                parcel_index: 1,
                uld_index: 0,
                anchor: [5, 0, 0],
                oriented: [5, 5, 5],
            }),
        ];
        // geometrically fine but 20 kg over the limit
        let validation = validate_plan(&initializer, &placements);
        assert!(validation.violations.iter().any(|v| v.contains("weight limit")));
        // raising the limit clears the verdict
        initializer.ulds[0].weight_limit = 120;
        assert!(validate_plan(&initializer, &placements).is_valid());
    }
}
