//! Splits each facility's occupants into age-banded groups (classes, teams)

use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::kernel::AgeGroup;
use crate::population::{AgentId, Placement, Population};
use crate::registry::FacilityId;
use crate::rng::{RngManager, GROUPING_STREAM};

/// Band layout and target group size of one venue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupPlan {
    lower: f32,
    band_width: f32,
    bands: usize,
    target: u32,
}

impl GroupPlan {
    /// One-year bands for school-like venues, a single band otherwise.
    pub fn new(ages: &AgeGroup, school_like: bool, target: u32) -> Self {
        let band_width = if school_like { 1.0 } else { ages.span() };
        let bands = ((ages.span() / band_width).ceil() as usize).max(1);
        Self {
            lower: ages.lower,
            band_width,
            bands,
            target: target.max(1),
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn band_of(&self, age: f32) -> usize {
        let band = ((age - self.lower) / self.band_width).floor().max(0.0) as usize;
        band.min(self.bands - 1)
    }

    /// Number of groups a band of `occupants` is split into
    pub fn group_count(&self, occupants: u32) -> u32 {
        ((occupants as f64 / self.target as f64).round() as u32).max(1)
    }
}

/// Group filling state of one band inside one facility
#[derive(Debug, Clone, Copy)]
struct BandCursor {
    planned: u32,
    opened: u32,
    current: u32,
    fill: u32,
}

impl BandCursor {
    fn new(planned: u32) -> Self {
        Self {
            planned,
            opened: 0,
            current: 0,
            fill: 0,
        }
    }

    /// Fills the open group up to `target`; once every planned group exists
    /// the last one keeps growing instead.
    fn next_group(&mut self, target: u32, next_id: &mut u32) -> u32 {
        if self.fill != 0 && (self.fill < target || self.opened == self.planned) {
            self.fill += 1;
            return self.current;
        }
        self.fill = 1;
        self.opened += 1;
        self.current = *next_id;
        *next_id += 1;
        self.current
    }
}

/// Facility → primary occupants, laid out contiguously per facility
#[derive(Debug, Clone, Default)]
pub struct OccupantIndex {
    offsets: Vec<usize>,
    agents: Vec<AgentId>,
}

impl OccupantIndex {
    pub fn build(placements: &[Placement], age_group: u16, facilities: usize) -> Self {
        let mut pairs: Vec<(FacilityId, AgentId)> = placements
            .par_iter()
            .enumerate()
            .filter_map(|(i, placement)| {
                placement
                    .primary_facility(age_group)
                    .filter(|f| f.index() < facilities)
                    .map(|f| (f, AgentId::new(i as u32)))
            })
            .collect();
        pairs.par_sort_unstable();

        let mut offsets = vec![0usize; facilities + 1];
        for (facility, _) in &pairs {
            offsets[facility.index() + 1] += 1;
        }
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }
        Self {
            offsets,
            agents: pairs.into_iter().map(|(_, agent)| agent).collect(),
        }
    }

    pub fn facilities(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn occupants(&self, facility: FacilityId) -> &[AgentId] {
        &self.agents[self.offsets[facility.index()]..self.offsets[facility.index() + 1]]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub facilities: usize,
    pub groups: u64,
    pub members: u64,
}

pub struct GroupPartitioner<'a> {
    plan: GroupPlan,
    rngs: &'a RngManager,
    epoch: u64,
}

impl<'a> GroupPartitioner<'a> {
    pub fn new(plan: GroupPlan, rngs: &'a RngManager, epoch: u64) -> Self {
        Self { plan, rngs, epoch }
    }

    /// Writes group ids onto the primary occupants of `age_group`.
    ///
    /// Facilities are handled in parallel, each with its own generator, so
    /// the outcome does not depend on the number of threads.
    pub fn partition(
        &self,
        population: &mut Population,
        age_group: u16,
        facilities: usize,
    ) -> GroupSummary {
        let index = OccupantIndex::build(population.placements(), age_group, facilities);
        let agents = population.agents();
        let per_facility: Vec<(Vec<(AgentId, u32)>, u32)> = (0..facilities)
            .into_par_iter()
            .map(|f| {
                let facility = FacilityId::new(f as u32);
                self.facility_groups(facility, index.occupants(facility), |a| {
                    agents[a.index()].age
                })
            })
            .collect();

        let mut summary = GroupSummary::default();
        let placements = population.placements_mut();
        for (members, groups) in per_facility {
            if members.is_empty() {
                continue;
            }
            summary.facilities += 1;
            summary.groups += groups as u64;
            summary.members += members.len() as u64;
            for (agent, id) in members {
                if let Placement::Accepted { group, .. } = &mut placements[agent.index()] {
                    *group = Some(id);
                }
            }
        }
        summary
    }

    fn facility_groups(
        &self,
        facility: FacilityId,
        occupants: &[AgentId],
        age_of: impl Fn(AgentId) -> f32,
    ) -> (Vec<(AgentId, u32)>, u32) {
        if occupants.is_empty() {
            return (Vec::new(), 0);
        }
        let mut counts = vec![0u32; self.plan.bands];
        for &agent in occupants {
            counts[self.plan.band_of(age_of(agent))] += 1;
        }
        let mut cursors: Vec<BandCursor> = counts
            .iter()
            .map(|&n| BandCursor::new(self.plan.group_count(n)))
            .collect();

        let mut order = occupants.to_vec();
        let mut rng = self
            .rngs
            .entity_rng(GROUPING_STREAM, self.epoch, facility.raw() as u64);
        order.shuffle(&mut rng);

        let mut next_id = 0;
        let members = order
            .into_iter()
            .map(|agent| {
                let band = self.plan.band_of(age_of(agent));
                (agent, cursors[band].next_group(self.plan.target, &mut next_id))
            })
            .collect();
        (members, next_id)
    }
}
