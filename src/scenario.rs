use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::SynthConfig;
use crate::engine::{EngineBuilder, EngineSettings, FacilitySeed, VacancyLayout};
use crate::error::SynthError;
use crate::geo::{CellCoord, CellTable, GridGeometry};
use crate::kernel::{AgeGroup, KernelParams, KernelTable};
use crate::population::Population;
use crate::venue::{FacilitySizeDistribution, SizeBin, VenueParams};

/// A synthesized population together with the kernel and venue tables to
/// assign it with.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub config: Option<SynthConfig>,
    pub grid: GridGeometry,
    pub cells: Vec<ScenarioCell>,
    pub households: Vec<ScenarioHousehold>,
    pub age_groups: Vec<AgeGroup>,
    pub kernels: ScenarioKernels,
    pub venues: Vec<ScenarioVenue>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScenarioCell {
    pub x: u32,
    pub y: u32,
    pub population: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioHousehold {
    pub x: u32,
    pub y: u32,
    /// Cell centre when omitted
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub ages: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioKernels {
    pub reference: Vec<KernelParams>,
    pub parameter_sets: Vec<Vec<KernelParams>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioVenue {
    #[serde(flatten)]
    pub params: VenueParams,
    /// `[size, cumulative probability]` rows
    pub sizes: Vec<(u32, f64)>,
    /// Pre-placed facilities; population-density seeding when absent
    #[serde(default)]
    pub facilities: Option<Vec<FacilitySeed>>,
}

/// Validated inputs of an engine
pub struct ScenarioParts {
    pub cells: CellTable,
    pub population: Population,
    pub kernels: KernelTable,
    pub venues: Vec<(FacilitySizeDistribution, VacancyLayout)>,
}

impl ScenarioParts {
    pub fn into_builder(self, settings: EngineSettings) -> (EngineBuilder, Population) {
        let mut builder = EngineBuilder::new(settings, self.cells, self.kernels);
        for (distribution, layout) in self.venues {
            builder.push_venue(distribution, layout);
        }
        (builder, self.population)
    }
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    /// Embedded configuration, or the defaults named after the scenario.
    pub fn config(&self) -> SynthConfig {
        self.config.clone().unwrap_or_else(|| SynthConfig {
            name: self.name.clone(),
            ..SynthConfig::default()
        })
    }

    pub fn build(&self) -> Result<ScenarioParts, SynthError> {
        let cells = CellTable::from_populations(
            self.grid,
            self.cells
                .iter()
                .map(|c| (CellCoord::new(c.x, c.y), c.population)),
        )?;

        let mut population = Population::new();
        for (i, household) in self.households.iter().enumerate() {
            if household.ages.is_empty() {
                return Err(SynthError::config(format!("household {i} has no members")));
            }
            let cell = CellCoord::new(household.x, household.y);
            let (clat, clon) = self.grid.cell_center(cell);
            let (lat, lon) = (household.lat.unwrap_or(clat), household.lon.unwrap_or(clon));
            if !self.grid.contains(cell, lat, lon) {
                return Err(SynthError::config(format!(
                    "household {i} at ({lat}, {lon}) lies outside cell ({}, {})",
                    cell.x, cell.y
                )));
            }
            population.add_household(cell, lat, lon, &household.ages);
        }

        let kernels = KernelTable::new(
            self.age_groups.clone(),
            self.kernels.reference.clone(),
            self.kernels.parameter_sets.clone(),
        )?;

        let venues = self
            .venues
            .iter()
            .map(|venue| {
                let bins = venue
                    .sizes
                    .iter()
                    .map(|&(size, cumulative)| SizeBin { size, cumulative })
                    .collect();
                let distribution = FacilitySizeDistribution::new(bins, venue.params)?;
                let layout = match &venue.facilities {
                    Some(seeds) => {
                        for seed in seeds {
                            seed.check_within(&self.grid)?;
                        }
                        VacancyLayout::Facilities(seeds.clone())
                    }
                    None => VacancyLayout::PopulationDensity,
                };
                Ok((distribution, layout))
            })
            .collect::<Result<Vec<_>, SynthError>>()?;

        Ok(ScenarioParts {
            cells,
            population,
            kernels,
            venues,
        })
    }
}
