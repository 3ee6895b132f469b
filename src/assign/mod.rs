//! Parallel rejection-acceptance assignment of agents to facilities
//!
//! Workers repeatedly claim an agent, sample a target patch from the agent's
//! home-patch row of the [`VacancyField`], and accept the patch's top
//! facility with probability `kernel(true distance) / kernel(patch distance)`.
//! The patch distance never exceeds the true distance, so the ratio is a
//! valid acceptance probability.

mod board;
mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand_chacha::ChaCha8Rng;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use board::PatchBoard;
pub use pool::{claim_member, HouseholdPool};

use crate::error::Result;
use crate::field::VacancyField;
use crate::geo::great_circle_distance;
use crate::kernel::{AgeGroup, TravelKernel};
use crate::population::{Agent, AgentId, Household, HouseholdId, Placement, Population, Role};
use crate::registry::{Facility, FacilityId, FacilityRegistry, Pool};
use crate::rng::{RngExt, RngManager, StreamId};
use crate::spatial::{PatchId, SpatialPatchIndex};
use crate::venue::FacilitySizeDistribution;

/// Repeated-hit limits against patches with no open facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitThresholds {
    /// Primary pass of venues staffed by their own age group
    #[serde(default = "default_same_group")]
    pub same_group: u64,
    /// Primary pass of venues with a separate staff age group
    #[serde(default = "default_distinct_staff")]
    pub distinct_staff: u64,
    /// Staff-pass misses before the staff field is rebuilt
    #[serde(default = "default_staff_rebuild")]
    pub staff_rebuild: u64,
}

fn default_same_group() -> u64 {
    300
}

fn default_distinct_staff() -> u64 {
    100_000
}

fn default_staff_rebuild() -> u64 {
    10_000_000
}

impl Default for HitThresholds {
    fn default() -> Self {
        Self {
            same_group: default_same_group(),
            distinct_staff: default_distinct_staff(),
            staff_rebuild: default_staff_rebuild(),
        }
    }
}

/// Counters of one assignment pass, summed over workers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassStats {
    pub accepted: u64,
    pub declined: u64,
    pub rejected: u64,
    pub misses: u64,
    pub races: u64,
    pub created: u64,
    pub rebuilds: u64,
    pub max_acceptance_ratio: f64,
    /// The field ran out of targets before the pool emptied
    pub exhausted: bool,
}

impl PassStats {
    fn merge(&mut self, other: &PassStats) {
        self.accepted += other.accepted;
        self.declined += other.declined;
        self.rejected += other.rejected;
        self.misses += other.misses;
        self.races += other.races;
        self.created += other.created;
        self.rebuilds += other.rebuilds;
        self.max_acceptance_ratio = self.max_acceptance_ratio.max(other.max_acceptance_ratio);
        self.exhausted |= other.exhausted;
    }
}

/// What one pass assigns and how
pub struct PassSpec<'a> {
    pub pool: Pool,
    /// Age group the agents are drawn from
    pub age_group: u16,
    pub ages: AgeGroup,
    /// Age group written on accepted placements (the venue's host group)
    pub host_age_group: u16,
    pub kernel: &'a dyn TravelKernel,
    pub venue: &'a FacilitySizeDistribution,
    pub stream: StreamId,
    pub epoch: u64,
}

struct PassState {
    households: Mutex<HouseholdPool>,
    stop: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state of an assignment pass.
///
/// Lock order: field, board, registry, slots. The household pool is never
/// held together with another lock.
pub struct AssignmentEngine<'a> {
    index: &'a SpatialPatchIndex,
    home_patches: &'a [PatchId],
    households: &'a [Household],
    agents: &'a [Agent],
    thresholds: HitThresholds,
    slots: Mutex<&'a mut [Placement]>,
    registry: Mutex<&'a mut FacilityRegistry>,
    board: Mutex<&'a mut PatchBoard>,
    field: RwLock<&'a mut VacancyField>,
}

impl<'a> AssignmentEngine<'a> {
    /// `home_patches[h]` is the patch of household `h`.
    pub fn new(
        index: &'a SpatialPatchIndex,
        home_patches: &'a [PatchId],
        population: &'a mut Population,
        registry: &'a mut FacilityRegistry,
        board: &'a mut PatchBoard,
        field: &'a mut VacancyField,
        thresholds: HitThresholds,
    ) -> Self {
        let (households, agents, placements) = population.split_mut();
        Self {
            index,
            home_patches,
            households,
            agents,
            thresholds,
            slots: Mutex::new(placements),
            registry: Mutex::new(registry),
            board: Mutex::new(board),
            field: RwLock::new(field),
        }
    }

    /// Runs one pass on every thread of `workers` and merges their counters.
    pub fn run_pass(
        &self,
        spec: &PassSpec<'_>,
        workers: &ThreadPool,
        rngs: &RngManager,
    ) -> Result<PassStats> {
        let state = PassState {
            households: Mutex::new(self.candidate_households(&spec.ages)),
            stop: AtomicBool::new(false),
        };
        let outcomes = workers.broadcast(|ctx| {
            let mut rng = rngs.worker_rng(spec.stream, spec.epoch, ctx.index());
            self.worker(spec, &state, &mut rng)
        });
        let mut stats = PassStats::default();
        for outcome in outcomes {
            stats.merge(&outcome?);
        }
        Ok(stats)
    }

    fn candidate_households(&self, ages: &AgeGroup) -> HouseholdPool {
        let slots = lock(&self.slots);
        HouseholdPool::new(
            self.households
                .iter()
                .enumerate()
                .filter(|(_, h)| {
                    h.members()
                        .any(|i| slots[i].is_unassigned() && ages.contains(self.agents[i].age))
                })
                .map(|(i, _)| HouseholdId::new(i as u32)),
        )
    }

    fn worker(&self, spec: &PassSpec<'_>, state: &PassState, rng: &mut ChaCha8Rng) -> Result<PassStats> {
        let mut stats = PassStats::default();
        while !state.stop.load(Ordering::Relaxed) {
            let Some(agent) = self.next_agent(spec, state, rng) else {
                break;
            };
            if spec.pool == Pool::Primary && !rng.chance(spec.venue.fill_ratio()) {
                lock(&self.slots)[agent.index()] = Placement::Declined {
                    age_group: spec.age_group,
                };
                stats.declined += 1;
                continue;
            }
            match self.place(agent, spec, state, rng, &mut stats) {
                Ok(true) => {}
                Ok(false) => {
                    lock(&self.slots)[agent.index()] = Placement::Unassigned;
                    break;
                }
                Err(err) => {
                    lock(&self.slots)[agent.index()] = Placement::Unassigned;
                    state.stop.store(true, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
        Ok(stats)
    }

    fn next_agent(&self, spec: &PassSpec<'_>, state: &PassState, rng: &mut ChaCha8Rng) -> Option<AgentId> {
        loop {
            let (at, household) = lock(&state.households).draw(rng)?;
            let claimed = {
                let mut slots = lock(&self.slots);
                claim_member(
                    &self.households[household.index()],
                    self.agents,
                    &mut slots,
                    &spec.ages,
                    spec.age_group,
                    rng,
                )
            };
            match claimed {
                Some(agent) => return Some(agent),
                None => lock(&state.households).remove(at, household),
            }
        }
    }

    /// Samples until the agent is accepted (`Ok(true)`) or the pass stops
    /// (`Ok(false)`).
    fn place(
        &self,
        agent: AgentId,
        spec: &PassSpec<'_>,
        state: &PassState,
        rng: &mut ChaCha8Rng,
        stats: &mut PassStats,
    ) -> Result<bool> {
        let household_id = self.agents[agent.index()].household;
        let household = &self.households[household_id.index()];
        let home = self.home_patches[household_id.index()];
        loop {
            if state.stop.load(Ordering::Relaxed) {
                return Ok(false);
            }
            // An empty row halts every worker, not only this agent's home patch.
            let Some(target) = read(&self.field).sample(home, rng) else {
                stats.exhausted = true;
                state.stop.store(true, Ordering::Relaxed);
                return Ok(false);
            };
            let candidate = match spec.pool {
                Pool::Primary => self.primary_candidate(target, spec, rng, stats)?,
                Pool::Staff => self.staff_candidate(target, spec, stats),
            };
            let Some(facility) = candidate else {
                continue;
            };

            let (lat, lon) = {
                let registry = lock(&self.registry);
                let record = registry.get(facility)?;
                (record.lat, record.lon)
            };
            let distance = great_circle_distance(household.lat, household.lon, lat, lon);
            let ceiling = spec.kernel.weight(self.index.distance_between(home, target));
            let ratio = if ceiling > 0.0 {
                spec.kernel.weight(distance) / ceiling
            } else {
                0.0
            };
            if !rng.chance(ratio) {
                stats.rejected += 1;
                continue;
            }
            match self.commit(agent, facility, target, spec, state) {
                Ok(()) => {
                    stats.accepted += 1;
                    stats.max_acceptance_ratio = stats.max_acceptance_ratio.max(ratio);
                    return Ok(true);
                }
                Err(err) if err.is_capacity_race() => stats.races += 1,
                Err(err) => return Err(err),
            }
        }
    }

    fn primary_candidate(
        &self,
        target: PatchId,
        spec: &PassSpec<'_>,
        rng: &mut ChaCha8Rng,
        stats: &mut PassStats,
    ) -> Result<Option<FacilityId>> {
        let mut board = lock(&self.board);
        if let Some(facility) = board.top_resident(target) {
            return Ok(Some(facility));
        }
        stats.misses += 1;
        let threshold = if spec.venue.has_distinct_staff() {
            self.thresholds.distinct_staff
        } else {
            self.thresholds.same_group
        };
        if !board.record_miss(target, threshold) {
            return Ok(None);
        }
        let capacity = spec.venue.sample_size(rng);
        let staff = spec.venue.staff_vacancies(capacity);
        let (cell, lat, lon) = self.index.sample_location(target, rng)?;
        let facility = lock(&self.registry).append(Facility::new(cell, target, lat, lon, capacity, staff))?;
        board.add_resident(target, facility, capacity);
        stats.created += 1;
        Ok(Some(facility))
    }

    fn staff_candidate(
        &self,
        target: PatchId,
        spec: &PassSpec<'_>,
        stats: &mut PassStats,
    ) -> Option<FacilityId> {
        let mut board = lock(&self.board);
        if let Some(facility) = board.top_resident(target) {
            return Some(facility);
        }
        stats.misses += 1;
        if board.record_miss(target, self.thresholds.staff_rebuild) {
            board.reset_hits();
            let vacancies = board.vacancies();
            drop(board);
            write(&self.field).rebuild(self.index, &vacancies, spec.kernel);
            stats.rebuilds += 1;
            debug!(patch = target.raw(), "staff field rebuilt after repeated misses");
        }
        None
    }

    fn commit(
        &self,
        agent: AgentId,
        facility: FacilityId,
        target: PatchId,
        spec: &PassSpec<'_>,
        state: &PassState,
    ) -> Result<()> {
        {
            let mut board = lock(&self.board);
            let mut registry = lock(&self.registry);
            let remaining = registry.fill(facility, spec.pool)?;
            board.consume(target);
            if remaining == 0
                && board.retire(target, facility)
                && spec.pool == Pool::Staff
                && board.available() == 0
            {
                state.stop.store(true, Ordering::Relaxed);
            }
        }
        let role = match spec.pool {
            Pool::Primary => Role::Primary,
            Pool::Staff => Role::Staff,
        };
        lock(&self.slots)[agent.index()] = Placement::Accepted {
            age_group: spec.host_age_group,
            facility,
            role,
            group: None,
        };
        Ok(())
    }
}
