use crate::registry::{FacilityId, FacilityRegistry, Pool};
use crate::spatial::PatchId;

#[derive(Debug, Clone, Default)]
struct PatchSlot {
    residents: Vec<FacilityId>,
    vacancies: u64,
    hits: u64,
}

/// Per-epoch patch state: facilities with open places, remaining vacancies
/// of the active pool and the repeated-hit counter.
#[derive(Debug, Clone, Default)]
pub struct PatchBoard {
    slots: Vec<PatchSlot>,
    available: usize,
}

impl PatchBoard {
    pub fn new(patches: usize) -> Self {
        let mut board = Self::default();
        board.resize(patches);
        board
    }

    pub fn resize(&mut self, patches: usize) {
        self.slots.resize_with(patches, PatchSlot::default);
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.residents.clear();
            slot.vacancies = 0;
            slot.hits = 0;
        }
        self.available = 0;
    }

    /// Rebuilds resident lists from every facility with room left in `pool`.
    pub fn load(&mut self, registry: &FacilityRegistry, pool: Pool) {
        self.clear();
        for (id, facility) in registry.ids().zip(registry.records()) {
            let remaining = facility.remaining(pool);
            if remaining > 0 {
                self.add_resident(facility.patch, id, remaining);
            }
        }
    }

    /// Patches with at least one resident facility
    pub fn available(&self) -> usize {
        self.available
    }

    pub fn vacancies(&self) -> Vec<u64> {
        self.slots.iter().map(|s| s.vacancies).collect()
    }

    pub fn residents(&self, patch: PatchId) -> &[FacilityId] {
        &self.slots[patch.index()].residents
    }

    /// Most recently added facility still open in the patch
    pub fn top_resident(&self, patch: PatchId) -> Option<FacilityId> {
        self.slots[patch.index()].residents.last().copied()
    }

    pub fn hits(&self, patch: PatchId) -> u64 {
        self.slots[patch.index()].hits
    }

    /// Counts a sample that found the patch empty. Returns true, and resets
    /// the counter, on the first hit past `threshold`.
    pub fn record_miss(&mut self, patch: PatchId, threshold: u64) -> bool {
        let slot = &mut self.slots[patch.index()];
        slot.hits += 1;
        if slot.hits <= threshold {
            return false;
        }
        slot.hits = 0;
        true
    }

    pub fn reset_hits(&mut self) {
        for slot in &mut self.slots {
            slot.hits = 0;
        }
    }

    pub fn add_resident(&mut self, patch: PatchId, facility: FacilityId, vacancies: u32) {
        let slot = &mut self.slots[patch.index()];
        if slot.residents.is_empty() {
            self.available += 1;
        }
        slot.residents.push(facility);
        slot.vacancies += vacancies as u64;
    }

    pub fn consume(&mut self, patch: PatchId) {
        let slot = &mut self.slots[patch.index()];
        slot.vacancies = slot.vacancies.saturating_sub(1);
    }

    /// Drops a full facility from its patch. Returns true when the patch has
    /// no open facility left.
    pub fn retire(&mut self, patch: PatchId, facility: FacilityId) -> bool {
        let slot = &mut self.slots[patch.index()];
        let Some(at) = slot.residents.iter().rposition(|&f| f == facility) else {
            return false;
        };
        slot.residents.swap_remove(at);
        if slot.residents.is_empty() {
            self.available -= 1;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::CellCoord;
    use crate::registry::Facility;

    #[test]
    fn test_miss_threshold_is_exact() {
        let mut board = PatchBoard::new(2);
        let patch = PatchId::new(1);
        for hit in 1..=5 {
            assert!(!board.record_miss(patch, 5), "hit {hit} fired early");
        }
        assert!(board.record_miss(patch, 5));
        assert_eq!(board.hits(patch), 0);
        assert!(!board.record_miss(patch, 5));
        assert!(board.record_miss(PatchId::new(0), 0));
    }

    #[test]
    fn test_available_tracks_resident_lists() {
        let mut board = PatchBoard::new(3);
        let (a, b) = (FacilityId::new(0), FacilityId::new(1));
        board.add_resident(PatchId::new(2), a, 4);
        board.add_resident(PatchId::new(2), b, 1);
        assert_eq!(board.available(), 1);
        assert_eq!(board.top_resident(PatchId::new(2)), Some(b));
        assert_eq!(board.vacancies(), vec![0, 0, 5]);

        assert!(!board.retire(PatchId::new(2), b));
        assert_eq!(board.top_resident(PatchId::new(2)), Some(a));
        assert!(!board.retire(PatchId::new(2), b), "double retire is a no-op");
        assert!(board.retire(PatchId::new(2), a));
        assert_eq!(board.available(), 0);
        assert_eq!(board.top_resident(PatchId::new(2)), None);
    }

    #[test]
    fn test_load_skips_full_facilities() {
        let mut registry = FacilityRegistry::new();
        let cell = CellCoord::new(0, 0);
        let full = registry
            .append(Facility::new(cell, PatchId::new(0), 0.0, 0.0, 1, 2))
            .unwrap();
        registry.fill_primary(full).unwrap();
        registry
            .append(Facility::new(cell, PatchId::new(1), 0.0, 0.0, 3, 0))
            .unwrap();

        let mut board = PatchBoard::new(2);
        board.load(&registry, Pool::Primary);
        assert_eq!(board.vacancies(), vec![0, 3]);
        assert_eq!(board.available(), 1);

        board.load(&registry, Pool::Staff);
        assert_eq!(board.vacancies(), vec![2, 0]);
        assert_eq!(board.residents(PatchId::new(0)), &[full]);
    }
}
