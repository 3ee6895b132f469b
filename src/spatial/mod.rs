//! Spatial patch index - coarse G×G aggregation of population cells

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};
use crate::geo::{CellCoord, CellTable, GridGeometry};

pub const DEFAULT_GRANULARITY: u32 = 15;

/// Opaque handle into the patch table
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PatchId(u32);

impl PatchId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Patch position in the coarse grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchCoord {
    pub px: u32,
    pub py: u32,
}

#[derive(Debug, Clone)]
pub struct Patch {
    coord: PatchCoord,
    anchor: CellCoord,
    cells: Vec<CellCoord>,
}

impl Patch {
    pub fn coord(&self) -> PatchCoord {
        self.coord
    }

    /// Upper-left cell of the patch
    pub fn anchor(&self) -> CellCoord {
        self.anchor
    }

    pub fn cells(&self) -> &[CellCoord] {
        &self.cells
    }
}

/// Maps cells to patches and estimates inter-patch distance.
///
/// The dense lookup is sized once from the cell table's extent. Patches are
/// discovered on first reference and never removed.
#[derive(Debug, Clone)]
pub struct SpatialPatchIndex {
    geometry: GridGeometry,
    origin: CellCoord,
    granularity: u32,
    dim_x: u32,
    dim_y: u32,
    lookup: Vec<Option<PatchId>>,
    patches: Vec<Patch>,
}

impl SpatialPatchIndex {
    pub fn build(cells: &CellTable, granularity: u32) -> Result<Self> {
        if granularity == 0 {
            return Err(SynthError::config("patch granularity must be at least 1"));
        }
        let (min, max) = cells.bounds();
        let dim_x = (max.x - min.x + 1).div_ceil(granularity);
        let dim_y = (max.y - min.y + 1).div_ceil(granularity);
        let mut index = Self {
            geometry: *cells.geometry(),
            origin: min,
            granularity,
            dim_x,
            dim_y,
            lookup: vec![None; dim_x as usize * dim_y as usize],
            patches: Vec::new(),
        };
        for cell in cells.cells() {
            index.ensure_patch(cell.coord)?;
        }
        Ok(index)
    }

    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch_ids(&self) -> impl Iterator<Item = PatchId> {
        (0..self.patches.len() as u32).map(PatchId)
    }

    pub fn patch(&self, id: PatchId) -> Result<&Patch> {
        self.patches
            .get(id.index())
            .ok_or(SynthError::IndexOutOfRange {
                what: "patch",
                index: id.index(),
                len: self.patches.len(),
            })
    }

    /// # Panics
    ///
    /// Panics in debug builds when `cell` lies west or north of the grid origin.
    pub fn cell_to_patch(&self, cell: CellCoord) -> PatchCoord {
        PatchCoord {
            px: (cell.x - self.origin.x) / self.granularity,
            py: (cell.y - self.origin.y) / self.granularity,
        }
    }

    pub fn patch_anchor_cell(&self, patch: PatchCoord) -> CellCoord {
        CellCoord {
            x: self.origin.x + patch.px * self.granularity,
            y: self.origin.y + patch.py * self.granularity,
        }
    }

    fn slot(&self, cell: CellCoord) -> Option<usize> {
        if cell.x < self.origin.x || cell.y < self.origin.y {
            return None;
        }
        let coord = self.cell_to_patch(cell);
        (coord.px < self.dim_x && coord.py < self.dim_y)
            .then(|| (coord.py * self.dim_x + coord.px) as usize)
    }

    pub fn patch_of_cell(&self, cell: CellCoord) -> Option<PatchId> {
        self.slot(cell).and_then(|slot| self.lookup[slot])
    }

    /// Returns the patch holding `cell`, creating it on first reference.
    pub fn ensure_patch(&mut self, cell: CellCoord) -> Result<PatchId> {
        let slot = self.slot(cell).ok_or(SynthError::IndexOutOfRange {
            what: "patch slot",
            index: (cell.y.saturating_sub(self.origin.y) / self.granularity) as usize
                * self.dim_x as usize
                + (cell.x.saturating_sub(self.origin.x) / self.granularity) as usize,
            len: self.lookup.len(),
        })?;
        let id = match self.lookup[slot] {
            Some(id) => id,
            None => {
                let coord = self.cell_to_patch(cell);
                let id = PatchId(self.patches.len() as u32);
                self.patches.push(Patch {
                    coord,
                    anchor: self.patch_anchor_cell(coord),
                    cells: Vec::new(),
                });
                self.lookup[slot] = Some(id);
                id
            }
        };
        let patch = &mut self.patches[id.index()];
        if !patch.cells.contains(&cell) {
            patch.cells.push(cell);
        }
        Ok(id)
    }

    /// Lower bound on the distance between any two points of the patches.
    ///
    /// Measured between the nearest corners: the western (or, within one
    /// column, the southern) patch's corner is moved to the edge facing the
    /// other patch. Patches in one row are measured along whichever edge lies
    /// further from the equator, where a degree of longitude is shortest.
    pub fn patch_distance(&self, a: PatchCoord, b: PatchCoord) -> f64 {
        if a == b {
            return 0.0;
        }
        let (ca, cb) = (self.patch_anchor_cell(a), self.patch_anchor_cell(b));
        let (mut first, mut second) = if ca.x < cb.x || (ca.x == cb.x && ca.y > cb.y) {
            (ca, cb)
        } else {
            (cb, ca)
        };
        let g = self.granularity;
        if first.x < second.x {
            first.x += g;
            if first.y > second.y {
                second.y += g;
            } else if first.y < second.y {
                first.y += g;
            } else if self.geometry.south_edge_is_poleward(first.y, g) {
                first.y += g;
                second.y += g;
            }
        } else {
            second.y += g;
        }
        self.geometry.corner_distance(first, second)
    }

    pub fn distance_between(&self, a: PatchId, b: PatchId) -> f64 {
        if a == b {
            return 0.0;
        }
        self.patch_distance(self.patches[a.index()].coord, self.patches[b.index()].coord)
    }

    /// Uniform cell of the patch plus a uniform point inside it.
    pub fn sample_location<R: Rng + ?Sized>(
        &self,
        id: PatchId,
        rng: &mut R,
    ) -> Result<(CellCoord, f64, f64)> {
        let patch = self.patch(id)?;
        let cell = if patch.cells.is_empty() {
            patch.anchor
        } else {
            patch.cells[rng.gen_range(0..patch.cells.len())]
        };
        let (lat, lon) = self.geometry.jitter(cell, rng);
        Ok((cell, lat, lon))
    }
}
