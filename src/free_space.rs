//! Free Space
//!
//! Generics for free-space representations, defining the placement-query interface that every
//! representation answers: "where can this box fit?" and "commit it here; update the free space".
//! The two provided representations ([`crate::free_space_list`] and [`crate::free_space_tree`])
//! are observationally equivalent for "is there a fit?"; they differ in how much bookkeeping a
//! commit costs and how much volume a search re-scans.
//!

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::util::*;

/// how to choose among admissible free regions
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize, Debug)]
pub enum RegionPolicy {
    /// first admissible region in iteration order
    FirstFind,
    /// lexicographic minimum of the region corner
    OriginBias,
    /// smallest corner coordinate sum
    MinLengthSum,
    /// smallest region surface area
    MinSurfaceArea,
    /// largest region surface area
    MaxSurfaceArea,
    /// smallest region volume
    MinVolume,
    /// largest region volume
    MaxVolume,
    /// tightest fit: smallest sum of side differences between region and parcel
    LeastDiffSides,
    /// side differences plus left-over volume, a compromise between tightness and waste
    Combined,
}

/// how to choose the orientation of a parcel
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize, Debug)]
pub enum OrientationPolicy {
    /// natural orientation only
    NoRotate,
    /// first orientation that yields an admissible region
    FirstFit,
    /// try every orientation and keep the one landing in the smallest admissible region
    MinRegionVolume,
}

/// the policy pair that drives one placement query
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitConfig {
    pub region_policy: RegionPolicy,
    pub orientation_policy: OrientationPolicy,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            region_policy: RegionPolicy::FirstFind,
            orientation_policy: OrientationPolicy::FirstFit,
        }
    }
}

/// a chosen fit: the anchor is always the minimum corner of the chosen region; the handle
/// identifies that region inside the representation that produced it and is only valid until
/// the next commit
#[derive(Debug, Clone)]
pub struct FitChoice<Handle: Clone + std::fmt::Debug> {
    /// minimum corner of the oriented parcel box
    pub anchor: Point,
    /// the chosen orientation
    pub oriented: Dims,
    /// the region the parcel was fitted into
    pub region: Region,
    /// representation-specific region identity, consumed by `commit`
    pub handle: Handle,
}

impl RegionPolicy {
    fn diff_sides<Handle: Clone + std::fmt::Debug>(choice: &FitChoice<Handle>) -> Length {
        (choice.region.extent[0] - choice.oriented[0])
            + (choice.region.extent[1] - choice.oriented[1])
            + (choice.region.extent[2] - choice.oriented[2])
    }

    /// whether the challenger strictly beats the incumbent; ties keep the incumbent so that
    /// the earlier candidate in iteration order wins
    pub fn prefers<Handle: Clone + std::fmt::Debug>(
        &self,
        challenger: &FitChoice<Handle>,
        incumbent: &FitChoice<Handle>,
    ) -> bool {
        match self {
            Self::FirstFind => false,
            Self::OriginBias => challenger.region.corner < incumbent.region.corner,
            Self::MinLengthSum => {
                challenger.region.corner.iter().sum::<Length>() < incumbent.region.corner.iter().sum::<Length>()
            }
            Self::MinSurfaceArea => challenger.region.half_surface_area() < incumbent.region.half_surface_area(),
            Self::MaxSurfaceArea => challenger.region.half_surface_area() > incumbent.region.half_surface_area(),
            Self::MinVolume => challenger.region.volume() < incumbent.region.volume(),
            Self::MaxVolume => challenger.region.volume() > incumbent.region.volume(),
            Self::LeastDiffSides => Self::diff_sides(challenger) < Self::diff_sides(incumbent),
            Self::Combined => {
                let challenger_key = Self::diff_sides(challenger)
                    + (challenger.region.volume() - challenger.parcel_volume());
                let incumbent_key =
                    Self::diff_sides(incumbent) + (incumbent.region.volume() - incumbent.parcel_volume());
                challenger_key < incumbent_key
            }
        }
    }
}

impl<Handle: Clone + std::fmt::Debug> FitChoice<Handle> {
    fn parcel_volume(&self) -> Volume {
        self.oriented[0] * self.oriented[1] * self.oriented[2]
    }
}

/// incrementally selects the best (region, orientation) pair while a representation walks its
/// free regions; shared by both representations so the tie-break behavior is identical
pub struct FitSelector<Handle: Clone + std::fmt::Debug> {
    config: FitConfig,
    orientations: Vec<Dims>,
    /// best candidate so far, with the rank of its orientation in the fixed permutation order
    best: Option<(usize, FitChoice<Handle>)>,
}

impl<Handle: Clone + std::fmt::Debug> FitSelector<Handle> {
    pub fn new(natural: &Dims, config: &FitConfig) -> Self {
        let orientations = match config.orientation_policy {
            OrientationPolicy::NoRotate => vec![*natural],
            _ => orientations_of(natural),
        };
        Self {
            config: *config,
            orientations,
            best: None,
        }
    }

    /// offer one free region to the selector; returns true when the scan may stop early
    /// because no later region can beat the current best
    pub fn offer(&mut self, region: Region, handle: Handle) -> bool {
        for (rank, oriented) in self.orientations.iter().enumerate() {
            if !region.admits(oriented) {
                continue;
            }
            let challenger = FitChoice {
                anchor: region.corner,
                oriented: *oriented,
                region,
                handle: handle.clone(),
            };
            let replace = match self.best.as_ref() {
                None => true,
                Some((best_rank, incumbent)) => match self.config.orientation_policy {
                    // an earlier orientation always wins; within the same orientation the
                    // region policy decides
                    OrientationPolicy::NoRotate | OrientationPolicy::FirstFit => {
                        rank < *best_rank
                            || (rank == *best_rank && self.config.region_policy.prefers(&challenger, incumbent))
                    }
                    OrientationPolicy::MinRegionVolume => {
                        let challenger_volume = challenger.region.volume();
                        let incumbent_volume = incumbent.region.volume();
                        challenger_volume < incumbent_volume
                            || (challenger_volume == incumbent_volume
                                && self.config.region_policy.prefers(&challenger, incumbent))
                    }
                },
            };
            if replace {
                self.best = Some((rank, challenger));
            }
            if matches!(self.config.orientation_policy, OrientationPolicy::FirstFit) {
                // only the first admissible orientation of this region matters
                break;
            }
        }
        // first-find can stop as soon as the best orientation rank cannot improve
        matches!(self.config.region_policy, RegionPolicy::FirstFind)
            && !matches!(self.config.orientation_policy, OrientationPolicy::MinRegionVolume)
            && matches!(self.best.as_ref(), Some((0, _)))
    }

    pub fn finish(self) -> Option<FitChoice<Handle>> {
        self.best.map(|(_, choice)| choice)
    }
}

/// A free-space representation tracks the packable empty volume of a single ULD
pub trait FreeSpaceImpl: Sized {
    /// representation-specific identity of a chosen region, consumed by [`Self::commit`]
    type Handle: Clone + std::fmt::Debug;

    /// a fresh representation spanning the whole ULD interior
    fn new_uld(dimensions: Dims, min_dimension: Length) -> Self;

    /// restore the representation to its just-created state
    fn clear(&mut self);

    /// whether and where a parcel with the given natural dimensions fits
    fn find_fit(&self, natural: &Dims, config: &FitConfig) -> Option<FitChoice<Self::Handle>>;

    /// carve the fitted box out of the free space; infallible given a fit returned by
    /// [`Self::find_fit`] on the current state, panics on a stale handle
    fn commit(&mut self, fit: &FitChoice<Self::Handle>);

    /// the current packable free regions, mainly for diagnostics and snapshots
    fn free_regions(&self) -> Vec<Region>;

    /// all boxes committed so far, in commit order
    fn committed_regions(&self) -> &[Region];

    /// verify the internal invariants of the representation
    fn sanity_check(&self) -> Result<(), String>;

    fn generate_profiler_report(&self) -> serde_json::Value {
        json!({})
    }
}
