//! Facility registry: growable slab of capacity-bounded venues

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};
use crate::geo::CellCoord;
use crate::spatial::PatchId;

pub const INITIAL_CAPACITY: usize = 16;
pub const DEFAULT_GROWTH: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FacilityId(u32);

impl FacilityId {
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

impl fmt::Display for FacilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two independent occupancy pools of a facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    Primary,
    Staff,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Primary => f.write_str("primary"),
            Pool::Staff => f.write_str("staff"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub lat: f64,
    pub lon: f64,
    pub cell: CellCoord,
    pub patch: PatchId,
    pub primary_vacancies: u32,
    pub primary_occupied: u32,
    pub staff_vacancies: u32,
    pub staff_occupied: u32,
}

impl Facility {
    pub fn new(cell: CellCoord, patch: PatchId, lat: f64, lon: f64, primary: u32, staff: u32) -> Self {
        Self {
            lat,
            lon,
            cell,
            patch,
            primary_vacancies: primary,
            primary_occupied: 0,
            staff_vacancies: staff,
            staff_occupied: 0,
        }
    }

    pub fn vacancies(&self, pool: Pool) -> u32 {
        match pool {
            Pool::Primary => self.primary_vacancies,
            Pool::Staff => self.staff_vacancies,
        }
    }

    pub fn occupied(&self, pool: Pool) -> u32 {
        match pool {
            Pool::Primary => self.primary_occupied,
            Pool::Staff => self.staff_occupied,
        }
    }

    pub fn remaining(&self, pool: Pool) -> u32 {
        self.vacancies(pool) - self.occupied(pool)
    }
}

/// Append-only within an epoch; [`FacilityRegistry::reset`] clears it
/// between epochs while keeping the backing allocation.
#[derive(Debug, Clone)]
pub struct FacilityRegistry {
    records: Vec<Facility>,
    growth: f64,
}

impl FacilityRegistry {
    pub fn new() -> Self {
        Self::with_growth(DEFAULT_GROWTH)
    }

    pub fn with_growth(growth: f64) -> Self {
        Self {
            records: Vec::new(),
            growth: growth.max(1.0),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    pub fn records(&self) -> &[Facility] {
        &self.records
    }

    pub fn ids(&self) -> impl Iterator<Item = FacilityId> {
        (0..self.records.len() as u32).map(FacilityId)
    }

    pub fn append(&mut self, facility: Facility) -> Result<FacilityId> {
        if self.records.len() == self.records.capacity() {
            let current = self.records.capacity();
            let target = ((current as f64 * self.growth).ceil() as usize)
                .max(current + 1)
                .max(INITIAL_CAPACITY);
            self.records
                .try_reserve_exact(target - self.records.len())
                .map_err(|e| {
                    SynthError::AllocationFailure(format!(
                        "facility registry growth to {target}: {e}"
                    ))
                })?;
        }
        let id = FacilityId(self.records.len() as u32);
        self.records.push(facility);
        Ok(id)
    }

    pub fn get(&self, id: FacilityId) -> Result<&Facility> {
        self.records.get(id.index()).ok_or(SynthError::IndexOutOfRange {
            what: "facility",
            index: id.index(),
            len: self.records.len(),
        })
    }

    /// Takes one place in `pool`, returning the vacancies left.
    pub fn fill(&mut self, id: FacilityId, pool: Pool) -> Result<u32> {
        let len = self.records.len();
        let facility = self
            .records
            .get_mut(id.index())
            .ok_or(SynthError::IndexOutOfRange {
                what: "facility",
                index: id.index(),
                len,
            })?;
        let (vacancies, occupied) = match pool {
            Pool::Primary => (facility.primary_vacancies, &mut facility.primary_occupied),
            Pool::Staff => (facility.staff_vacancies, &mut facility.staff_occupied),
        };
        if *occupied >= vacancies {
            return Err(SynthError::FacilityFull { facility: id, pool });
        }
        *occupied += 1;
        Ok(vacancies - *occupied)
    }

    pub fn fill_primary(&mut self, id: FacilityId) -> Result<u32> {
        self.fill(id, Pool::Primary)
    }

    pub fn fill_staff(&mut self, id: FacilityId) -> Result<u32> {
        self.fill(id, Pool::Staff)
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// A facility with no primary occupant, scanning forward then backward
    /// from a random start. Query helper for callers inspecting a finished
    /// registry; engine seeding never goes through it.
    pub fn pick_random_empty<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<FacilityId> {
        if self.records.is_empty() {
            return None;
        }
        let start = rng.gen_range(0..self.records.len());
        let is_empty = |i: &usize| self.records[*i].primary_occupied == 0;
        (start..self.records.len())
            .find(is_empty)
            .or_else(|| (0..start).rev().find(is_empty))
            .map(|i| FacilityId(i as u32))
    }
}

impl Default for FacilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn facility(primary: u32, staff: u32) -> Facility {
        Facility::new(CellCoord::new(0, 0), PatchId::default(), 45.0, 7.0, primary, staff)
    }

    #[test]
    fn test_fill_until_full() {
        let mut registry = FacilityRegistry::new();
        let id = registry.append(facility(2, 1)).unwrap();
        assert_eq!(registry.fill_primary(id).unwrap(), 1);
        assert_eq!(registry.fill_primary(id).unwrap(), 0);
        let err = registry.fill_primary(id).unwrap_err();
        assert!(err.is_capacity_race());
        assert_eq!(registry.get(id).unwrap().primary_occupied, 2);

        assert_eq!(registry.fill_staff(id).unwrap(), 0);
        assert!(matches!(
            registry.fill_staff(id),
            Err(SynthError::FacilityFull { pool: Pool::Staff, .. })
        ));
    }

    #[test]
    fn test_unknown_id_is_out_of_range() {
        let mut registry = FacilityRegistry::new();
        registry.append(facility(1, 1)).unwrap();
        assert!(matches!(
            registry.fill_primary(FacilityId::new(3)),
            Err(SynthError::IndexOutOfRange { index: 3, len: 1, .. })
        ));
    }

    #[test]
    fn test_geometric_growth_and_reset_keeps_storage() {
        let mut registry = FacilityRegistry::new();
        registry.append(facility(1, 1)).unwrap();
        assert_eq!(registry.capacity(), INITIAL_CAPACITY);
        for _ in 1..=INITIAL_CAPACITY {
            registry.append(facility(1, 1)).unwrap();
        }
        assert_eq!(registry.capacity(), 24);
        let capacity = registry.capacity();
        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(registry.capacity(), capacity);
        let id = registry.append(facility(5, 1)).unwrap();
        assert_eq!(id, FacilityId::new(0));
    }

    #[test]
    fn test_pick_random_empty() {
        let mut registry = FacilityRegistry::new();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        assert_eq!(registry.pick_random_empty(&mut rng), None);
        let ids: Vec<_> = (0..5).map(|_| registry.append(facility(1, 1)).unwrap()).collect();
        for &id in &ids {
            if id != ids[3] {
                registry.fill_primary(id).unwrap();
            }
        }
        for _ in 0..20 {
            assert_eq!(registry.pick_random_empty(&mut rng), Some(ids[3]));
        }
        registry.fill_primary(ids[3]).unwrap();
        assert_eq!(registry.pick_random_empty(&mut rng), None);
    }
}
