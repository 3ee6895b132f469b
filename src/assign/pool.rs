use rand::Rng;

use crate::kernel::AgeGroup;
use crate::population::{Agent, AgentId, Household, HouseholdId, Placement};

/// Households that may still hold an eligible, unassigned member
#[derive(Debug, Clone)]
pub struct HouseholdPool {
    households: Vec<HouseholdId>,
}

impl HouseholdPool {
    pub fn new(households: impl IntoIterator<Item = HouseholdId>) -> Self {
        Self {
            households: households.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.households.len()
    }

    pub fn is_empty(&self) -> bool {
        self.households.is_empty()
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(usize, HouseholdId)> {
        if self.households.is_empty() {
            return None;
        }
        let at = rng.gen_range(0..self.households.len());
        Some((at, self.households[at]))
    }

    /// Swap-removes `household` if it still sits at `at`; another worker may
    /// have moved it in the meantime.
    pub fn remove(&mut self, at: usize, household: HouseholdId) {
        if self.households.get(at) == Some(&household) {
            self.households.swap_remove(at);
        }
    }
}

/// Claims a random unassigned member of `household` whose age lies in
/// `range`, scanning forward then backward from a random start.
pub fn claim_member<R: Rng + ?Sized>(
    household: &Household,
    agents: &[Agent],
    placements: &mut [Placement],
    range: &AgeGroup,
    age_group: u16,
    rng: &mut R,
) -> Option<AgentId> {
    let members = household.members();
    if members.is_empty() {
        return None;
    }
    let start = rng.gen_range(members.clone());
    let eligible =
        |i: &usize| placements[*i].is_unassigned() && range.contains(agents[*i].age);
    let found = (start..members.end)
        .find(eligible)
        .or_else(|| (members.start..start).rev().find(eligible))?;
    placements[found] = Placement::Pending { age_group };
    Some(AgentId::new(found as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::CellCoord;
    use crate::population::Population;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_claim_skips_ineligible_members() {
        let mut population = Population::new();
        let id = population.add_household(CellCoord::new(0, 0), 0.0, 0.0, &[40.0, 7.0, 9.0, 70.0]);
        let household = *population.household(id);
        let range = AgeGroup::new(5.0, 11.0);
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        let (_, agents, placements) = population.split_mut();
        let first = claim_member(&household, agents, placements, &range, 0, &mut rng).unwrap();
        let second = claim_member(&household, agents, placements, &range, 0, &mut rng).unwrap();
        assert_ne!(first, second);
        for claimed in [first, second] {
            assert!(range.contains(agents[claimed.index()].age));
            assert_eq!(placements[claimed.index()], Placement::Pending { age_group: 0 });
        }
        assert!(claim_member(&household, agents, placements, &range, 0, &mut rng).is_none());
    }

    #[test]
    fn test_pool_remove_checks_position() {
        let mut population = Population::new();
        for _ in 0..3 {
            population.add_household(CellCoord::new(0, 0), 0.0, 0.0, &[1.0]);
        }
        let mut pool = HouseholdPool::new(population.agents().iter().map(|a| a.household));
        assert_eq!(pool.len(), 3);
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let (at, id) = pool.draw(&mut rng).unwrap();
        pool.remove(at, id);
        assert_eq!(pool.len(), 2);
        pool.remove(at, id);
        assert_eq!(pool.len(), 2, "stale removal must not drop another household");
    }
}
