//! Post-epoch diagnostics: facility sizes and travel distances

use serde::{Deserialize, Serialize};

use crate::geo::great_circle_distance;
use crate::kernel::TravelKernel;
use crate::population::{Placement, Population, Role};
use crate::registry::{FacilityRegistry, Pool};
use crate::venue::FacilitySizeDistribution;

pub const TRAVEL_BAND_KM: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeBinShare {
    pub upper_size: u32,
    pub facilities: u64,
    pub share: f64,
    pub expected: f64,
}

/// Realised facility sizes against the input size distribution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeHistogram {
    pub bins: Vec<SizeBinShare>,
    pub facilities: u64,
    pub max_deviation: f64,
}

impl SizeHistogram {
    /// Bins non-empty facilities by their primary occupancy.
    pub fn from_registry(registry: &FacilityRegistry, venue: &FacilitySizeDistribution) -> Self {
        let table = venue.bins();
        let mut counts = vec![0u64; table.len()];
        for facility in registry.records() {
            let occupants = facility.occupied(Pool::Primary);
            if occupants > 0 {
                counts[venue.bin_of_size(occupants)] += 1;
            }
        }
        let facilities: u64 = counts.iter().sum();
        let mut histogram = Self {
            bins: Vec::with_capacity(table.len() - 1),
            facilities,
            max_deviation: 0.0,
        };
        for (i, bin) in table.iter().enumerate().skip(1) {
            let share = if facilities > 0 {
                counts[i] as f64 / facilities as f64
            } else {
                0.0
            };
            let expected = bin.cumulative.min(1.0) - table[i - 1].cumulative;
            histogram.max_deviation = histogram.max_deviation.max((share - expected).abs());
            histogram.bins.push(SizeBinShare {
                upper_size: bin.size,
                facilities: counts[i],
                share,
                expected,
            });
        }
        histogram
    }
}

/// Home-to-facility distances in fixed-width bands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TravelHistogram {
    pub band_km: f64,
    pub counts: Vec<u64>,
    /// Agents that took part in the pass (accepted or declined)
    pub participants: u64,
    pub placed: u64,
    pub mean_km: f64,
    /// Reference kernel evaluated at band midpoints, normalised over the
    /// observed range
    pub reference_profile: Vec<f64>,
    pub max_deviation: f64,
}

impl TravelHistogram {
    pub fn collect(
        population: &Population,
        registry: &FacilityRegistry,
        age_group: u16,
        role: Role,
        reference: &dyn TravelKernel,
    ) -> Self {
        let mut histogram = Self {
            band_km: TRAVEL_BAND_KM,
            ..Self::default()
        };
        let mut total_km = 0.0;
        for (agent, placement) in population.agents().iter().zip(population.placements()) {
            match *placement {
                Placement::Declined { age_group: ag } if ag == age_group && role == Role::Primary => {
                    histogram.participants += 1;
                }
                Placement::Accepted {
                    age_group: ag,
                    facility,
                    role: r,
                    ..
                } if ag == age_group && r == role => {
                    let Ok(record) = registry.get(facility) else {
                        continue;
                    };
                    let home = population.household(agent.household);
                    let km = great_circle_distance(home.lat, home.lon, record.lat, record.lon);
                    let band = (km / TRAVEL_BAND_KM).floor() as usize;
                    if histogram.counts.len() <= band {
                        histogram.counts.resize(band + 1, 0);
                    }
                    histogram.counts[band] += 1;
                    histogram.participants += 1;
                    histogram.placed += 1;
                    total_km += km;
                }
                _ => {}
            }
        }
        if histogram.placed == 0 {
            return histogram;
        }
        histogram.mean_km = total_km / histogram.placed as f64;

        let weights: Vec<f64> = (0..histogram.counts.len())
            .map(|band| reference.weight((band as f64 + 0.5) * TRAVEL_BAND_KM))
            .collect();
        let norm: f64 = weights.iter().sum();
        if norm > 0.0 {
            histogram.reference_profile = weights.iter().map(|w| w / norm).collect();
            histogram.max_deviation = histogram
                .counts
                .iter()
                .zip(&histogram.reference_profile)
                .map(|(&c, &p)| (c as f64 / histogram.placed as f64 - p).abs())
                .fold(0.0, f64::max);
        }
        histogram
    }
}
