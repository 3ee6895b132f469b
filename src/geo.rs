//! Population grid geometry and the populated cell table

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

/// Mean earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.009;

/// Haversine great-circle distance in kilometres.
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Grid cell coordinate; `y` grows southward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Georeferencing of a raster anchored at its lower-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub xll_corner: f64,
    pub yll_corner: f64,
    pub cell_size: f64,
    pub num_rows: u32,
}

impl GridGeometry {
    /// Latitude of the top edge of row `y`
    pub fn cell_lat(&self, y: u32) -> f64 {
        self.yll_corner + self.num_rows as f64 * self.cell_size - self.cell_size * y as f64
    }

    /// Longitude of the west edge of column `x`
    pub fn cell_lon(&self, x: u32) -> f64 {
        self.xll_corner + self.cell_size * x as f64
    }

    pub fn cell_center(&self, cell: CellCoord) -> (f64, f64) {
        (
            self.cell_lat(cell.y) - self.cell_size / 2.0,
            self.cell_lon(cell.x) + self.cell_size / 2.0,
        )
    }

    /// Whether the south edge of a band of `rows` rows starting at `y` has a
    /// larger absolute latitude than its north edge.
    pub fn south_edge_is_poleward(&self, y: u32, rows: u32) -> bool {
        self.cell_lat(y + rows).abs() > self.cell_lat(y).abs()
    }

    /// Whether `(lat, lon)` lies inside `cell`, edges included
    pub fn contains(&self, cell: CellCoord, lat: f64, lon: f64) -> bool {
        let tolerance = self.cell_size * 1e-9;
        let (top, west) = (self.cell_lat(cell.y), self.cell_lon(cell.x));
        lat <= top + tolerance
            && lat >= top - self.cell_size - tolerance
            && lon >= west - tolerance
            && lon <= west + self.cell_size + tolerance
    }

    /// Distance between the upper-left corners of two cells
    pub fn corner_distance(&self, a: CellCoord, b: CellCoord) -> f64 {
        if a == b {
            return 0.0;
        }
        great_circle_distance(
            self.cell_lat(a.y),
            self.cell_lon(a.x),
            self.cell_lat(b.y),
            self.cell_lon(b.x),
        )
    }

    /// Uniform point inside a cell
    pub fn jitter<R: Rng + ?Sized>(&self, cell: CellCoord, rng: &mut R) -> (f64, f64) {
        let lat = self.cell_lat(cell.y) - self.cell_size * rng.gen::<f64>();
        let lon = self.cell_lon(cell.x) + self.cell_size * rng.gen::<f64>();
        (lat, lon)
    }

    fn validate(&self) -> Result<()> {
        if !(self.cell_size > 0.0) || !self.cell_size.is_finite() {
            return Err(SynthError::config(format!(
                "cell size must be positive, got {}",
                self.cell_size
            )));
        }
        if self.num_rows == 0 {
            return Err(SynthError::config("grid must have at least one row"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCell {
    pub coord: CellCoord,
    pub lat: f64,
    pub lon: f64,
    pub population: u32,
}

/// Populated cells of one country
#[derive(Debug, Clone)]
pub struct CellTable {
    geometry: GridGeometry,
    cells: Vec<GeoCell>,
}

impl CellTable {
    pub fn new(geometry: GridGeometry, cells: Vec<GeoCell>) -> Result<Self> {
        geometry.validate()?;
        if cells.is_empty() {
            return Err(SynthError::config("cell table is empty"));
        }
        Ok(Self { geometry, cells })
    }

    /// Builds cells from (coordinate, population) pairs, placing each at its centre.
    pub fn from_populations(
        geometry: GridGeometry,
        populated: impl IntoIterator<Item = (CellCoord, u32)>,
    ) -> Result<Self> {
        let cells = populated
            .into_iter()
            .map(|(coord, population)| {
                let (lat, lon) = geometry.cell_center(coord);
                GeoCell {
                    coord,
                    lat,
                    lon,
                    population,
                }
            })
            .collect();
        Self::new(geometry, cells)
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn cells(&self) -> &[GeoCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total_population(&self) -> u64 {
        self.cells.iter().map(|c| c.population as u64).sum()
    }

    /// Minimum and maximum cell coordinates
    pub fn bounds(&self) -> (CellCoord, CellCoord) {
        let mut min = self.cells[0].coord;
        let mut max = min;
        for cell in &self.cells[1..] {
            min.x = min.x.min(cell.coord.x);
            min.y = min.y.min(cell.coord.y);
            max.x = max.x.max(cell.coord.x);
            max.y = max.y.max(cell.coord.y);
        }
        (min, max)
    }

    pub fn distance(&self, a: CellCoord, b: CellCoord) -> f64 {
        self.geometry.corner_distance(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> GridGeometry {
        GridGeometry {
            xll_corner: 10.0,
            yll_corner: 40.0,
            cell_size: 0.01,
            num_rows: 100,
        }
    }

    #[test]
    fn test_identical_points_are_zero() {
        assert_eq!(great_circle_distance(45.0, 7.0, 45.0, 7.0), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = great_circle_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.05, "got {d}");
    }

    #[test]
    fn test_contains_cell_bounds() {
        let g = geometry();
        let cell = CellCoord::new(5, 10);
        let (lat, lon) = g.cell_center(cell);
        assert!(g.contains(cell, lat, lon));
        assert!(g.contains(cell, g.cell_lat(10), g.cell_lon(5)));
        assert!(g.contains(cell, g.cell_lat(11), g.cell_lon(6)));
        assert!(!g.contains(cell, lat + 0.01, lon));
        assert!(!g.contains(cell, lat, lon - 0.01));
        assert!(!g.contains(CellCoord::new(6, 10), lat, lon));
    }

    #[test]
    fn test_poleward_edge_follows_hemisphere() {
        let north = geometry();
        assert!(!north.south_edge_is_poleward(0, 10));
        let south = GridGeometry {
            yll_corner: -64.0,
            ..north
        };
        assert!(south.south_edge_is_poleward(0, 10));
    }

    #[test]
    fn test_cell_edges() {
        let g = geometry();
        assert!((g.cell_lat(0) - 41.0).abs() < 1e-12);
        assert!((g.cell_lat(100) - 40.0).abs() < 1e-12);
        assert!((g.cell_lon(5) - 10.05).abs() < 1e-12);
    }

    #[test]
    fn test_jitter_stays_inside_cell() {
        use rand::SeedableRng;
        let g = geometry();
        let cell = CellCoord::new(3, 7);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            let (lat, lon) = g.jitter(cell, &mut rng);
            assert!(lat <= g.cell_lat(7) && lat > g.cell_lat(8));
            assert!(lon >= g.cell_lon(3) && lon < g.cell_lon(4));
        }
    }

    #[test]
    fn test_table_bounds_and_population() {
        let table = CellTable::from_populations(
            geometry(),
            vec![
                (CellCoord::new(4, 9), 10),
                (CellCoord::new(2, 11), 5),
                (CellCoord::new(7, 3), 1),
            ],
        )
        .unwrap();
        assert_eq!(table.total_population(), 16);
        assert_eq!(table.bounds(), (CellCoord::new(2, 3), CellCoord::new(7, 11)));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let mut g = geometry();
        g.cell_size = 0.0;
        assert!(CellTable::from_populations(g, vec![(CellCoord::new(0, 0), 1)]).is_err());
        assert!(CellTable::new(geometry(), Vec::new()).is_err());
    }
}
