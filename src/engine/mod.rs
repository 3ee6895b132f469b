//! Epoch orchestration
//!
//! A run walks every parameter set and, inside it, every age group that has
//! a venue, in ascending order. Each (parameter set, age group) pair is one
//! epoch: reset the registry, seed vacancies, build the field, assign the
//! primary population, partition groups, then assign staff.

use std::path::PathBuf;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assign::{AssignmentEngine, HitThresholds, PassSpec, PassStats, PatchBoard};
use crate::config::SynthConfig;
use crate::error::SynthError;
use crate::field::VacancyField;
use crate::geo::{CellCoord, CellTable, GridGeometry};
use crate::groups::{GroupPartitioner, GroupPlan, GroupSummary};
use crate::kernel::{KernelParams, KernelTable};
use crate::population::{Population, Role};
use crate::registry::{Facility, FacilityRegistry, Pool};
use crate::rng::{RngManager, PRIMARY_STREAM, SEEDING_STREAM, STAFF_STREAM};
use crate::snapshot::SnapshotWriter;
use crate::spatial::{PatchId, SpatialPatchIndex};
use crate::stats::{SizeHistogram, TravelHistogram};
use crate::venue::FacilitySizeDistribution;

pub struct EngineSettings {
    pub scenario_name: String,
    pub seed: u64,
    pub workers: usize,
    pub patch_granularity: u32,
    pub registry_growth: f64,
    pub thresholds: HitThresholds,
    pub snapshot_dir: Option<PathBuf>,
}

impl EngineSettings {
    pub fn from_config(config: &SynthConfig) -> Self {
        Self {
            scenario_name: config.name.clone(),
            seed: config.random_seed,
            workers: config.workers,
            patch_granularity: config.patch_granularity,
            registry_growth: config.registry_growth,
            thresholds: config.thresholds,
            snapshot_dir: config.snapshot.output_dir.as_ref().map(PathBuf::from),
        }
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        if self.workers == 0 {
            return Err(SynthError::config("workers must be at least 1"));
        }
        if self.patch_granularity == 0 {
            return Err(SynthError::config("patch granularity must be at least 1"));
        }
        if !(self.registry_growth > 1.0) || !self.registry_growth.is_finite() {
            return Err(SynthError::config(format!(
                "registry growth factor must exceed 1, got {}",
                self.registry_growth
            )));
        }
        Ok(())
    }
}

/// A facility placed before assignment starts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacilitySeed {
    pub cell: CellCoord,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub primary_vacancies: u32,
    #[serde(default)]
    pub staff_vacancies: u32,
}

impl FacilitySeed {
    /// Rejects explicit coordinates that fall outside the seed's cell.
    pub fn check_within(&self, geometry: &GridGeometry) -> Result<(), SynthError> {
        let (clat, clon) = geometry.cell_center(self.cell);
        let (lat, lon) = (self.lat.unwrap_or(clat), self.lon.unwrap_or(clon));
        if geometry.contains(self.cell, lat, lon) {
            Ok(())
        } else {
            Err(SynthError::config(format!(
                "facility at ({lat}, {lon}) lies outside cell ({}, {})",
                self.cell.x, self.cell.y
            )))
        }
    }
}

/// Initial vacancy layout of a venue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacancyLayout {
    /// One unit vacancy per eligible agent, spread by cell population. Only
    /// shapes the field; every facility is then created on demand.
    #[default]
    PopulationDensity,
    /// Facilities that exist up front and are filled directly
    Facilities(Vec<FacilitySeed>),
}

#[derive(Debug, Clone)]
pub struct Venue {
    pub distribution: FacilitySizeDistribution,
    pub layout: VacancyLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpochKey {
    pub parameter_set: u16,
    pub age_group: u16,
}

impl EpochKey {
    pub fn ordinal(&self) -> u64 {
        ((self.parameter_set as u64) << 16) | self.age_group as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub key: EpochKey,
    pub facilities: usize,
    pub primary: PassStats,
    pub staff: Option<PassStats>,
    pub groups: GroupSummary,
    pub sizes: SizeHistogram,
    pub travel: TravelHistogram,
    pub staff_travel: Option<TravelHistogram>,
}

pub enum RunEvent<'a> {
    /// Registry contents are only valid until the next epoch starts.
    Epoch {
        report: &'a EpochReport,
        facilities: &'a [Facility],
    },
    /// Placements of a finished parameter set, just before they are reset.
    ParameterSet {
        parameter_set: u16,
        population: &'a Population,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub epochs: Vec<EpochReport>,
}

pub struct EngineBuilder {
    settings: EngineSettings,
    cells: CellTable,
    kernels: KernelTable,
    venues: Vec<Venue>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings, cells: CellTable, kernels: KernelTable) -> Self {
        Self {
            settings,
            cells,
            kernels,
            venues: Vec::new(),
        }
    }

    pub fn with_venue(mut self, distribution: FacilitySizeDistribution, layout: VacancyLayout) -> Self {
        self.push_venue(distribution, layout);
        self
    }

    pub fn push_venue(&mut self, distribution: FacilitySizeDistribution, layout: VacancyLayout) {
        self.venues.push(Venue {
            distribution,
            layout,
        });
    }

    /// Validates the whole configuration; nothing is assigned before this
    /// succeeds.
    pub fn build(mut self) -> Result<Engine, SynthError> {
        let settings = &self.settings;
        settings.validate()?;
        let age_groups = self.kernels.num_age_groups();
        for venue in &self.venues {
            if let VacancyLayout::Facilities(seeds) = &venue.layout {
                for seed in seeds {
                    seed.check_within(self.cells.geometry())?;
                }
            }
            let params = venue.distribution.params();
            for group in [params.host_age_group, params.staff_age_group] {
                if group as usize >= age_groups {
                    return Err(SynthError::config(format!(
                        "venue refers to age group {group}, only {age_groups} defined"
                    )));
                }
            }
        }
        self.venues
            .sort_by_key(|v| v.distribution.host_age_group());
        for pair in self.venues.windows(2) {
            if pair[0].distribution.host_age_group() == pair[1].distribution.host_age_group() {
                return Err(SynthError::config(format!(
                    "age group {} has more than one venue",
                    pair[0].distribution.host_age_group()
                )));
            }
        }

        let index = SpatialPatchIndex::build(&self.cells, settings.patch_granularity)?;
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.workers)
            .thread_name(|i| format!("synth-worker-{i}"))
            .build()
            .map_err(|e| SynthError::AllocationFailure(format!("worker pool: {e}")))?;
        let snapshot = settings.snapshot_dir.as_ref().map(SnapshotWriter::new);

        Ok(Engine {
            rngs: RngManager::new(settings.seed),
            registry: FacilityRegistry::with_growth(settings.registry_growth),
            board: PatchBoard::new(index.len()),
            field: VacancyField::new(),
            home_patches: Vec::new(),
            index,
            workers,
            snapshot,
            cells: self.cells,
            kernels: self.kernels,
            venues: self.venues,
            settings: self.settings,
        })
    }
}

pub struct Engine {
    settings: EngineSettings,
    cells: CellTable,
    kernels: KernelTable,
    venues: Vec<Venue>,
    index: SpatialPatchIndex,
    registry: FacilityRegistry,
    board: PatchBoard,
    field: VacancyField,
    home_patches: Vec<PatchId>,
    rngs: RngManager,
    workers: rayon::ThreadPool,
    snapshot: Option<SnapshotWriter>,
}

impl Engine {
    pub fn run(&mut self, population: &mut Population) -> Result<RunSummary> {
        self.run_with_hook(population, |_| {})
    }

    pub fn run_with_hook<F>(&mut self, population: &mut Population, mut hook: F) -> Result<RunSummary>
    where
        F: FnMut(RunEvent<'_>),
    {
        self.bind(population)?;
        let mut summary = RunSummary::default();
        let host_groups: Vec<u16> = self
            .venues
            .iter()
            .map(|v| v.distribution.host_age_group())
            .collect();
        for parameter_set in 0..self.kernels.num_parameter_sets() as u16 {
            population.reset_placements();
            for &age_group in &host_groups {
                let key = EpochKey {
                    parameter_set,
                    age_group,
                };
                let report = self.run_epoch(population, key)?;
                hook(RunEvent::Epoch {
                    report: &report,
                    facilities: self.registry.records(),
                });
                let emit = self.kernels.kernel(age_group, parameter_set)?.emit_output;
                if let (Some(writer), true) = (&self.snapshot, emit) {
                    let path = writer.write_epoch(
                        &self.settings.scenario_name,
                        &report,
                        self.registry.records(),
                    )?;
                    debug!(path = %path.display(), "epoch snapshot written");
                }
                summary.epochs.push(report);
            }
            hook(RunEvent::ParameterSet {
                parameter_set,
                population,
            });
            if let Some(writer) = &self.snapshot {
                writer.write_placements(&self.settings.scenario_name, parameter_set, population)?;
            }
        }
        Ok(summary)
    }

    /// Registers the household cells with the patch index.
    fn bind(&mut self, population: &Population) -> Result<(), SynthError> {
        self.home_patches.clear();
        self.home_patches.reserve(population.households().len());
        for household in population.households() {
            let patch = self.index.ensure_patch(household.cell)?;
            self.home_patches.push(patch);
        }
        self.board.resize(self.index.len());
        Ok(())
    }

    /// Runs one epoch against placements left by earlier epochs of the same
    /// parameter set.
    pub fn run_epoch(&mut self, population: &mut Population, key: EpochKey) -> Result<EpochReport, SynthError> {
        if self.home_patches.len() != population.households().len() {
            self.bind(population)?;
        }
        let venue = self
            .venues
            .iter()
            .find(|v| v.distribution.host_age_group() == key.age_group)
            .cloned()
            .ok_or_else(|| SynthError::config(format!("no venue for age group {}", key.age_group)))?;
        let kernel = *self.kernels.kernel(key.age_group, key.parameter_set)?;
        let ages = *self.kernels.age_group(key.age_group)?;
        let epoch = key.ordinal();
        info!(
            parameter_set = key.parameter_set,
            age_group = key.age_group,
            "epoch started"
        );

        self.registry.reset();
        self.board.resize(self.index.len());
        self.board.clear();
        match &venue.layout {
            VacancyLayout::PopulationDensity => {
                let count = population.eligible(&ages);
                let mut rng = self.rngs.worker_rng(SEEDING_STREAM, epoch, 0);
                let cumulative = population_cumulative(&self.cells);
                for _ in 0..count {
                    let Some(at) = draw_cell(&cumulative, &mut rng) else {
                        break;
                    };
                    let cell = self.cells.cells()[at].coord;
                    let patch = self.index.ensure_patch(cell)?;
                    let (lat, lon) = self.cells.geometry().jitter(cell, &mut rng);
                    self.registry.append(Facility::new(cell, patch, lat, lon, 1, 0))?;
                }
            }
            VacancyLayout::Facilities(seeds) => {
                for seed in seeds {
                    let patch = self.index.ensure_patch(seed.cell)?;
                    let (clat, clon) = self.cells.geometry().cell_center(seed.cell);
                    self.registry.append(Facility::new(
                        seed.cell,
                        patch,
                        seed.lat.unwrap_or(clat),
                        seed.lon.unwrap_or(clon),
                        seed.primary_vacancies,
                        seed.staff_vacancies,
                    ))?;
                }
            }
        }
        self.board.resize(self.index.len());
        self.board.load(&self.registry, Pool::Primary);
        let vacancies = self.board.vacancies();
        self.workers
            .install(|| self.field.rebuild(&self.index, &vacancies, &kernel));
        if matches!(venue.layout, VacancyLayout::PopulationDensity) {
            self.board.clear();
            self.registry.reset();
        }
        if self.field.is_exhausted() {
            warn!(age_group = key.age_group, "no vacancies reachable before the primary pass");
        }

        let primary = {
            let assigner = AssignmentEngine::new(
                &self.index,
                &self.home_patches,
                population,
                &mut self.registry,
                &mut self.board,
                &mut self.field,
                self.settings.thresholds,
            );
            let spec = PassSpec {
                pool: Pool::Primary,
                age_group: key.age_group,
                ages,
                host_age_group: key.age_group,
                kernel: &kernel,
                venue: &venue.distribution,
                stream: PRIMARY_STREAM,
                epoch,
            };
            assigner.run_pass(&spec, &self.workers, &self.rngs)?
        };
        if primary.exhausted {
            warn!(age_group = key.age_group, "primary pass ran out of reachable vacancies");
        }
        info!(
            age_group = key.age_group,
            accepted = primary.accepted,
            declined = primary.declined,
            created = primary.created,
            races = primary.races,
            "primary pass finished"
        );

        let plan = GroupPlan::new(
            &ages,
            venue.distribution.has_distinct_staff(),
            venue.distribution.group_size(),
        );
        let partitioner = GroupPartitioner::new(plan, &self.rngs, epoch);
        let facilities = self.registry.len();
        let groups = self
            .workers
            .install(|| partitioner.partition(population, key.age_group, facilities));

        let reference = *self.kernels.reference(key.age_group)?;
        let sizes = SizeHistogram::from_registry(&self.registry, &venue.distribution);
        let travel = TravelHistogram::collect(
            population,
            &self.registry,
            key.age_group,
            Role::Primary,
            &reference,
        );

        let (staff, staff_travel) = if venue.distribution.has_distinct_staff() {
            let (stats, histogram) =
                self.staff_pass(population, key, &venue.distribution, epoch)?;
            (Some(stats), Some(histogram))
        } else {
            (None, None)
        };

        Ok(EpochReport {
            key,
            facilities: self.registry.len(),
            primary,
            staff,
            groups,
            sizes,
            travel,
            staff_travel,
        })
    }

    fn staff_pass(
        &mut self,
        population: &mut Population,
        key: EpochKey,
        venue: &FacilitySizeDistribution,
        epoch: u64,
    ) -> Result<(PassStats, TravelHistogram), SynthError> {
        let staff_group = venue.staff_age_group();
        let ages = *self.kernels.age_group(staff_group)?;
        let kernel: KernelParams = *self.kernels.kernel(staff_group, key.parameter_set)?;
        let reference = *self.kernels.reference(staff_group)?;

        self.board.load(&self.registry, Pool::Staff);
        let vacancies = self.board.vacancies();
        self.workers
            .install(|| self.field.rebuild(&self.index, &vacancies, &kernel));

        let stats = {
            let assigner = AssignmentEngine::new(
                &self.index,
                &self.home_patches,
                population,
                &mut self.registry,
                &mut self.board,
                &mut self.field,
                self.settings.thresholds,
            );
            let spec = PassSpec {
                pool: Pool::Staff,
                age_group: staff_group,
                ages,
                host_age_group: key.age_group,
                kernel: &kernel,
                venue,
                stream: STAFF_STREAM,
                epoch,
            };
            assigner.run_pass(&spec, &self.workers, &self.rngs)?
        };
        info!(
            age_group = key.age_group,
            staff_age_group = staff_group,
            accepted = stats.accepted,
            rebuilds = stats.rebuilds,
            "staff pass finished"
        );
        let travel =
            TravelHistogram::collect(population, &self.registry, key.age_group, Role::Staff, &reference);
        Ok((stats, travel))
    }

    pub fn registry(&self) -> &FacilityRegistry {
        &self.registry
    }

    pub fn index(&self) -> &SpatialPatchIndex {
        &self.index
    }

    /// Patch state left by the last pass
    pub fn board(&self) -> &PatchBoard {
        &self.board
    }

    pub fn field(&self) -> &VacancyField {
        &self.field
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

fn population_cumulative(cells: &CellTable) -> Vec<f64> {
    let mut total = 0.0;
    cells
        .cells()
        .iter()
        .map(|c| {
            total += c.population as f64;
            total
        })
        .collect()
}

/// Cell index drawn in proportion to population
fn draw_cell<R: Rng + ?Sized>(cumulative: &[f64], rng: &mut R) -> Option<usize> {
    let total = *cumulative.last()?;
    if total <= 0.0 {
        return None;
    }
    let u = rng.gen::<f64>() * total;
    Some(cumulative.partition_point(|&c| c <= u).min(cumulative.len() - 1))
}
