use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;

use geosynth::{
    engine::{EngineSettings, RunEvent},
    scenario::ScenarioLoader,
    SynthConfig,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Assigns a synthetic population to schools and workplaces")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/two_towns.yaml")]
    scenario: PathBuf,

    /// Engine configuration; overrides the one embedded in the scenario
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Directory for JSON snapshots
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let scenario = ScenarioLoader::new(".").load(&cli.scenario)?;
    let mut config = match &cli.config {
        Some(path) => SynthConfig::from_yaml(path)?,
        None => scenario.config(),
    };
    if let Some(seed) = cli.seed {
        config.random_seed = seed;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(dir) = &cli.output_dir {
        config.snapshot.output_dir = Some(dir.display().to_string());
    }
    config.validate()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let parts = scenario
        .build()
        .with_context(|| format!("Invalid scenario {}", cli.scenario.display()))?;
    let (builder, mut population) = parts.into_builder(EngineSettings::from_config(&config));
    let mut engine = builder.build()?;

    let summary = engine.run_with_hook(&mut population, |event| {
        if let RunEvent::Epoch { report, facilities } = event {
            println!(
                "parameter set {} age group {}: {} facilities, {} accepted, {} declined, {} staff, mean travel {:.2} km",
                report.key.parameter_set,
                report.key.age_group,
                facilities.len(),
                report.primary.accepted,
                report.primary.declined,
                report.staff.as_ref().map_or(0, |s| s.accepted),
                report.travel.mean_km,
            );
        }
    })?;

    println!(
        "Scenario '{}' completed: {} epochs over {} agents",
        scenario.name,
        summary.epochs.len(),
        population.len()
    );
    Ok(())
}
