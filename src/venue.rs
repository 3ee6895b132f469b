//! Facility types: size distribution and occupancy parameters

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

/// Value pinned on the last cumulative entry so draws in `[0, 1)` always land.
pub const CUMULATIVE_TOLERANCE: f64 = 1e-7;
const DISTRIBUTION_SLACK: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeBin {
    pub size: u32,
    pub cumulative: f64,
}

/// Occupancy rules of a facility type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VenueParams {
    pub host_age_group: u16,
    pub staff_age_group: u16,
    pub staff_ratio: f64,
    pub group_size: u32,
    pub fill_ratio: f64,
}

/// Samples facility capacities for one host age group.
#[derive(Debug, Clone)]
pub struct FacilitySizeDistribution {
    bins: Vec<SizeBin>,
    params: VenueParams,
}

impl FacilitySizeDistribution {
    pub fn new(bins: Vec<SizeBin>, params: VenueParams) -> Result<Self> {
        if bins.is_empty() {
            return Err(SynthError::config("facility size distribution is empty"));
        }
        if !(params.staff_ratio >= 0.0) || !params.staff_ratio.is_finite() {
            return Err(SynthError::config(format!(
                "staff ratio must be >= 0, got {}",
                params.staff_ratio
            )));
        }
        if !(0.0..=1.0).contains(&params.fill_ratio) {
            return Err(SynthError::config(format!(
                "fill ratio must lie in [0, 1], got {}",
                params.fill_ratio
            )));
        }
        if params.group_size == 0 {
            return Err(SynthError::config("target group size must be at least 1"));
        }
        if bins.iter().any(|b| b.size == 0) {
            return Err(SynthError::config("facility sizes must be at least 1"));
        }
        for pair in bins.windows(2) {
            if pair[1].cumulative < pair[0].cumulative || pair[1].size < pair[0].size {
                return Err(SynthError::config(format!(
                    "size distribution must be non-decreasing (size {} -> {})",
                    pair[0].size, pair[1].size
                )));
            }
        }
        let last = bins[bins.len() - 1].cumulative;
        if (last - 1.0).abs() > DISTRIBUTION_SLACK {
            return Err(SynthError::config(format!(
                "size distribution must end at cumulative probability 1, got {last}"
            )));
        }

        // Keep the last zero-probability row as lower bound, or start from size 1.
        let first_positive = bins.iter().position(|b| b.cumulative > 0.0).unwrap_or(0);
        let mut table = if first_positive == 0 {
            vec![SizeBin {
                size: 1,
                cumulative: 0.0,
            }]
        } else {
            Vec::with_capacity(bins.len() - first_positive + 1)
        };
        let start = first_positive.saturating_sub(1);
        table.extend_from_slice(&bins[start..]);
        if let Some(last) = table.last_mut() {
            last.cumulative = 1.0 + CUMULATIVE_TOLERANCE;
        }
        Ok(Self { bins: table, params })
    }

    pub fn params(&self) -> &VenueParams {
        &self.params
    }

    pub fn host_age_group(&self) -> u16 {
        self.params.host_age_group
    }

    pub fn staff_age_group(&self) -> u16 {
        self.params.staff_age_group
    }

    pub fn fill_ratio(&self) -> f64 {
        self.params.fill_ratio
    }

    pub fn group_size(&self) -> u32 {
        self.params.group_size
    }

    /// Venues staffed by a different age group (schools) get a staff pass.
    pub fn has_distinct_staff(&self) -> bool {
        self.params.host_age_group != self.params.staff_age_group
    }

    pub fn bins(&self) -> &[SizeBin] {
        &self.bins
    }

    pub fn sample_size<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let u = rng.gen::<f64>();
        let upper = self.bin_for_draw(u);
        let lower = upper - 1;
        let hi = self.bins[upper].size;
        let lo = self.bins[lower].size;
        let drop = ((hi - lo) as f64 * rng.gen::<f64>()).floor() as u32;
        (hi - drop).max(1)
    }

    /// First bin (past the lower bound) whose cumulative value reaches `u`.
    fn bin_for_draw(&self, u: f64) -> usize {
        let tail = &self.bins[1..];
        (1 + tail.partition_point(|b| b.cumulative < u)).min(self.bins.len() - 1)
    }

    /// Index of the bin a facility with `occupants` falls into
    pub fn bin_of_size(&self, occupants: u32) -> usize {
        let tail = &self.bins[1..];
        (1 + tail.partition_point(|b| b.size < occupants)).min(self.bins.len() - 1)
    }

    pub fn staff_vacancies(&self, capacity: u32) -> u32 {
        ((capacity as f64 * self.params.staff_ratio).floor() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params() -> VenueParams {
        VenueParams {
            host_age_group: 0,
            staff_age_group: 1,
            staff_ratio: 0.08,
            group_size: 25,
            fill_ratio: 0.95,
        }
    }

    fn bins(rows: &[(u32, f64)]) -> Vec<SizeBin> {
        rows.iter()
            .map(|&(size, cumulative)| SizeBin { size, cumulative })
            .collect()
    }

    #[test]
    fn test_sizes_stay_within_bins() {
        let dist =
            FacilitySizeDistribution::new(bins(&[(50, 0.2), (200, 0.7), (600, 1.0)]), params())
                .unwrap();
        assert_eq!(dist.bins()[0], SizeBin { size: 1, cumulative: 0.0 });
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut small = 0;
        for _ in 0..10_000 {
            let size = dist.sample_size(&mut rng);
            assert!((1..=600).contains(&size));
            if size <= 50 {
                small += 1;
            }
        }
        let share = small as f64 / 10_000.0;
        assert!((share - 0.2).abs() < 0.03, "share of small facilities {share}");
    }

    #[test]
    fn test_leading_zero_rows_become_lower_bound() {
        let dist = FacilitySizeDistribution::new(
            bins(&[(10, 0.0), (20, 0.0), (30, 1.0)]),
            params(),
        )
        .unwrap();
        assert_eq!(dist.bins().len(), 2);
        assert_eq!(dist.bins()[0].size, 20);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..500 {
            let size = dist.sample_size(&mut rng);
            assert!((21..=30).contains(&size), "size {size}");
        }
    }

    #[test]
    fn test_distribution_must_sum_to_one() {
        let err = FacilitySizeDistribution::new(bins(&[(10, 0.4), (20, 0.9)]), params());
        assert!(matches!(err, Err(SynthError::Configuration(_))));
        let err = FacilitySizeDistribution::new(bins(&[(10, 0.6), (20, 0.5), (30, 1.0)]), params());
        assert!(err.is_err());
    }

    #[test]
    fn test_param_validation() {
        let rows = bins(&[(10, 1.0)]);
        let mut p = params();
        p.group_size = 0;
        assert!(FacilitySizeDistribution::new(rows.clone(), p).is_err());
        let mut p = params();
        p.fill_ratio = 1.2;
        assert!(FacilitySizeDistribution::new(rows.clone(), p).is_err());
        let mut p = params();
        p.staff_ratio = -0.1;
        assert!(FacilitySizeDistribution::new(rows, p).is_err());
    }

    #[test]
    fn test_staff_vacancies_at_least_one() {
        let dist = FacilitySizeDistribution::new(bins(&[(10, 1.0)]), params()).unwrap();
        assert_eq!(dist.staff_vacancies(3), 1);
        assert_eq!(dist.staff_vacancies(100), 8);
        assert!(dist.has_distinct_staff());
    }

    #[test]
    fn test_bin_of_size() {
        let dist =
            FacilitySizeDistribution::new(bins(&[(50, 0.2), (200, 0.7), (600, 1.0)]), params())
                .unwrap();
        assert_eq!(dist.bin_of_size(1), 1);
        assert_eq!(dist.bin_of_size(50), 1);
        assert_eq!(dist.bin_of_size(51), 2);
        assert_eq!(dist.bin_of_size(5000), 3);
    }
}
