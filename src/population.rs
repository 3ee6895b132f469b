//! Households, agents and their facility placements

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::geo::CellCoord;
use crate::kernel::AgeGroup;
use crate::registry::FacilityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HouseholdId(u32);

impl HouseholdId {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(u32);

impl AgentId {
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

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Household {
    pub cell: CellCoord,
    pub lat: f64,
    pub lon: f64,
    first_member: u32,
    size: u32,
}

impl Household {
    pub fn members(&self) -> Range<usize> {
        self.first_member as usize..(self.first_member + self.size) as usize
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub household: HouseholdId,
    pub age: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Staff,
}

/// Where an agent ended up for the current parameter set.
///
/// `Unassigned → Declined | Pending → Accepted`; `Pending` is only visible
/// while a worker holds the agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Placement {
    Unassigned,
    Pending {
        age_group: u16,
    },
    Declined {
        age_group: u16,
    },
    Accepted {
        age_group: u16,
        facility: FacilityId,
        role: Role,
        group: Option<u32>,
    },
}

impl Placement {
    pub fn is_unassigned(&self) -> bool {
        matches!(self, Placement::Unassigned)
    }

    pub fn age_group(&self) -> Option<u16> {
        match *self {
            Placement::Unassigned => None,
            Placement::Pending { age_group }
            | Placement::Declined { age_group }
            | Placement::Accepted { age_group, .. } => Some(age_group),
        }
    }

    pub fn facility(&self) -> Option<FacilityId> {
        match *self {
            Placement::Accepted { facility, .. } => Some(facility),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<u32> {
        match *self {
            Placement::Accepted { group, .. } => group,
            _ => None,
        }
    }

    /// Facility of a primary occupant of `age_group`
    pub fn primary_facility(&self, age_group: u16) -> Option<FacilityId> {
        match *self {
            Placement::Accepted {
                age_group: ag,
                facility,
                role: Role::Primary,
                ..
            } if ag == age_group => Some(facility),
            _ => None,
        }
    }
}

/// Struct-of-arrays household store: households own contiguous member ranges.
#[derive(Debug, Clone, Default)]
pub struct Population {
    households: Vec<Household>,
    agents: Vec<Agent>,
    placements: Vec<Placement>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_household(&mut self, cell: CellCoord, lat: f64, lon: f64, ages: &[f32]) -> HouseholdId {
        let id = HouseholdId(self.households.len() as u32);
        self.households.push(Household {
            cell,
            lat,
            lon,
            first_member: self.agents.len() as u32,
            size: ages.len() as u32,
        });
        for &age in ages {
            self.agents.push(Agent { household: id, age });
            self.placements.push(Placement::Unassigned);
        }
        id
    }

    pub fn households(&self) -> &[Household] {
        &self.households
    }

    pub fn household(&self, id: HouseholdId) -> &Household {
        &self.households[id.index()]
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn placement(&self, id: AgentId) -> Placement {
        self.placements[id.index()]
    }

    pub fn placements_mut(&mut self) -> &mut [Placement] {
        &mut self.placements
    }

    /// Read-only households and agents alongside mutable placement slots
    pub fn split_mut(&mut self) -> (&[Household], &[Agent], &mut [Placement]) {
        (&self.households, &self.agents, &mut self.placements)
    }

    pub fn reset_placements(&mut self) {
        self.placements.fill(Placement::Unassigned);
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Unassigned agents whose age falls in `group`
    pub fn eligible(&self, group: &AgeGroup) -> usize {
        self.agents
            .iter()
            .zip(&self.placements)
            .filter(|(agent, placement)| placement.is_unassigned() && group.contains(agent.age))
            .count()
    }

    pub fn count_where(&self, pred: impl Fn(&Placement) -> bool) -> usize {
        self.placements.iter().filter(|p| pred(p)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_households_own_contiguous_members() {
        let mut population = Population::new();
        let a = population.add_household(CellCoord::new(1, 1), 45.0, 7.0, &[34.0, 8.0, 6.0]);
        let b = population.add_household(CellCoord::new(2, 1), 45.0, 7.1, &[71.0]);
        assert_eq!(population.household(a).members(), 0..3);
        assert_eq!(population.household(b).members(), 3..4);
        assert_eq!(population.agents()[3].household, b);
        assert_eq!(population.len(), 4);
    }

    #[test]
    fn test_eligible_counts_unassigned_in_range() {
        let mut population = Population::new();
        population.add_household(CellCoord::new(0, 0), 0.0, 0.0, &[6.0, 9.0, 40.0]);
        let group = AgeGroup::new(5.0, 11.0);
        assert_eq!(population.eligible(&group), 2);
        population.placements_mut()[0] = Placement::Declined { age_group: 0 };
        assert_eq!(population.eligible(&group), 1);
        population.reset_placements();
        assert_eq!(population.eligible(&group), 2);
    }

    #[test]
    fn test_primary_facility_filters_role_and_group() {
        let facility = FacilityId::new(4);
        let primary = Placement::Accepted {
            age_group: 1,
            facility,
            role: Role::Primary,
            group: None,
        };
        let staff = Placement::Accepted {
            age_group: 1,
            facility,
            role: Role::Staff,
            group: None,
        };
        assert_eq!(primary.primary_facility(1), Some(facility));
        assert_eq!(primary.primary_facility(0), None);
        assert_eq!(staff.primary_facility(1), None);
        assert_eq!(staff.facility(), Some(facility));
    }
}
