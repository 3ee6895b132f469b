//! Vacancy preference field over patches
//!
//! Each source patch owns a cumulative distribution over the patches that
//! still hold vacancies, weighted by `kernel(patch distance) × vacancies`.
//! Sampling a target patch is a binary search over that row.

use rand::Rng;
use rayon::prelude::*;

use crate::kernel::TravelKernel;
use crate::spatial::{PatchId, SpatialPatchIndex};
use crate::venue::CUMULATIVE_TOLERANCE;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldEntry {
    target: PatchId,
    cumulative: f64,
}

/// An empty row is the degenerate "no target" distribution.
#[derive(Debug, Clone, Default)]
pub struct VacancyField {
    rows: Vec<Vec<FieldEntry>>,
}

impl VacancyField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes every row. `vacancies[p]` is the open capacity of patch `p`
    /// in the pool being assigned; missing entries count as zero.
    ///
    /// Rows are independent and built in parallel on the current rayon pool.
    pub fn rebuild(
        &mut self,
        index: &SpatialPatchIndex,
        vacancies: &[u64],
        kernel: &dyn TravelKernel,
    ) {
        let targets: Vec<(PatchId, f64)> = vacancies
            .iter()
            .enumerate()
            .take(index.len())
            .filter(|(_, &v)| v > 0)
            .map(|(p, &v)| (PatchId::new(p as u32), v as f64))
            .collect();
        self.rows.resize_with(index.len(), Vec::new);
        self.rows
            .par_iter_mut()
            .enumerate()
            .for_each(|(source, row)| {
                build_row(row, PatchId::new(source as u32), index, &targets, kernel)
            });
    }

    pub fn sample<R: Rng + ?Sized>(&self, source: PatchId, rng: &mut R) -> Option<PatchId> {
        let row = self.rows.get(source.index())?;
        if row.is_empty() {
            return None;
        }
        let u = rng.gen::<f64>();
        let at = row.partition_point(|e| e.cumulative < u).min(row.len() - 1);
        Some(row[at].target)
    }

    /// True when no source patch can reach any vacancy.
    pub fn is_exhausted(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    /// Target patches of `source` with their selection probability
    pub fn targets(&self, source: PatchId) -> Vec<(PatchId, f64)> {
        let Some(row) = self.rows.get(source.index()) else {
            return Vec::new();
        };
        let mut previous = 0.0;
        row.iter()
            .map(|e| {
                let p = e.cumulative.min(1.0) - previous;
                previous = e.cumulative.min(1.0);
                (e.target, p)
            })
            .collect()
    }
}

fn build_row(
    row: &mut Vec<FieldEntry>,
    source: PatchId,
    index: &SpatialPatchIndex,
    targets: &[(PatchId, f64)],
    kernel: &dyn TravelKernel,
) {
    row.clear();
    let mut total = 0.0;
    for &(target, vacancies) in targets {
        let weight = kernel.weight(index.distance_between(source, target)) * vacancies;
        if !(weight > 0.0) {
            continue;
        }
        total += weight;
        row.push(FieldEntry {
            target,
            cumulative: total,
        });
    }
    if row.is_empty() {
        return;
    }
    for entry in row.iter_mut() {
        entry.cumulative /= total;
    }
    if let Some(last) = row.last_mut() {
        last.cumulative = 1.0 + CUMULATIVE_TOLERANCE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{CellCoord, CellTable, GridGeometry};
    use crate::kernel::KernelParams;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Three patches in a row: 0 and 1 touch, 2 is far east.
    fn index() -> SpatialPatchIndex {
        let geometry = GridGeometry {
            xll_corner: 0.0,
            yll_corner: 50.0,
            cell_size: 0.01,
            num_rows: 100,
        };
        let cells = CellTable::from_populations(
            geometry,
            vec![
                (CellCoord::new(0, 0), 10),
                (CellCoord::new(10, 0), 10),
                (CellCoord::new(90, 0), 10),
            ],
        )
        .unwrap();
        SpatialPatchIndex::build(&cells, 10).unwrap()
    }

    #[test]
    fn test_constant_kernel_follows_vacancies() {
        let index = index();
        let mut field = VacancyField::new();
        field.rebuild(&index, &[1, 3, 0], &KernelParams::constant());
        let targets = field.targets(PatchId::new(2));
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].0, PatchId::new(0));
        assert!((targets[0].1 - 0.25).abs() < 1e-12);
        assert!((targets[1].1 - 0.75).abs() < 1e-6);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut hits = [0usize; 3];
        for _ in 0..20_000 {
            let target = field.sample(PatchId::new(2), &mut rng).unwrap();
            hits[target.index()] += 1;
        }
        assert_eq!(hits[2], 0, "zero-vacancy patches are never sampled");
        let share = hits[1] as f64 / 20_000.0;
        assert!((share - 0.75).abs() < 0.02, "share {share}");
    }

    #[test]
    fn test_kernel_prefers_nearby_patches() {
        let index = index();
        let mut field = VacancyField::new();
        field.rebuild(&index, &[0, 1, 1], &KernelParams::hill(2.0, 3.0));
        let targets = field.targets(PatchId::new(0));
        let near = targets.iter().find(|(p, _)| p.index() == 1).unwrap().1;
        let far = targets.iter().find(|(p, _)| p.index() == 2).map_or(0.0, |t| t.1);
        assert!(near > 0.99 && far < 0.01, "near {near} far {far}");
    }

    #[test]
    fn test_no_vacancy_means_no_target() {
        let index = index();
        let mut field = VacancyField::new();
        field.rebuild(&index, &[0, 0, 0], &KernelParams::constant());
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert!(field.is_exhausted());
        assert_eq!(field.sample(PatchId::new(0), &mut rng), None);
        assert_eq!(field.sample(PatchId::new(7), &mut rng), None);
    }

    #[test]
    fn test_rebuild_replaces_previous_rows() {
        let index = index();
        let mut field = VacancyField::new();
        field.rebuild(&index, &[5, 0, 0], &KernelParams::constant());
        field.rebuild(&index, &[0, 0, 2], &KernelParams::constant());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(field.sample(PatchId::new(1), &mut rng), Some(PatchId::new(2)));
        }
    }
}
