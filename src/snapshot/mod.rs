//! JSON snapshots of facility registries and agent placements

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EpochReport;
use crate::population::{AgentId, HouseholdId, Placement, Population};
use crate::registry::Facility;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub scenario: String,
    pub generated_at: DateTime<Utc>,
}

/// Facility registry at the end of one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSnapshot {
    pub metadata: SnapshotMetadata,
    pub report: EpochReport,
    pub facilities: Vec<Facility>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub agent: AgentId,
    pub household: HouseholdId,
    pub age: f32,
    pub placement: Placement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementSnapshot {
    pub metadata: SnapshotMetadata,
    pub parameter_set: u16,
    pub agents: Vec<PlacementRecord>,
}

/// Writes snapshots under `<output_dir>/<scenario>/`.
pub struct SnapshotWriter {
    output_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write_epoch(
        &self,
        scenario: &str,
        report: &EpochReport,
        facilities: &[Facility],
    ) -> Result<PathBuf, SnapshotError> {
        let snapshot = EpochSnapshot {
            metadata: metadata(scenario),
            report: report.clone(),
            facilities: facilities.to_vec(),
        };
        let name = format!(
            "facilities_ag{}_ps{}.json",
            report.key.age_group, report.key.parameter_set
        );
        self.write(scenario, &name, &snapshot)
    }

    pub fn write_placements(
        &self,
        scenario: &str,
        parameter_set: u16,
        population: &Population,
    ) -> Result<PathBuf, SnapshotError> {
        let agents = population
            .agents()
            .iter()
            .zip(population.placements())
            .enumerate()
            .map(|(i, (agent, &placement))| PlacementRecord {
                agent: AgentId::new(i as u32),
                household: agent.household,
                age: agent.age,
                placement,
            })
            .collect();
        let snapshot = PlacementSnapshot {
            metadata: metadata(scenario),
            parameter_set,
            agents,
        };
        self.write(scenario, &format!("placements_ps{parameter_set}.json"), &snapshot)
    }

    pub fn load_epoch<P: AsRef<Path>>(path: P) -> Result<EpochSnapshot, SnapshotError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn load_placements<P: AsRef<Path>>(path: P) -> Result<PlacementSnapshot, SnapshotError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Snapshot files of a scenario, sorted by name
    pub fn list(&self, scenario: &str) -> Result<Vec<PathBuf>, SnapshotError> {
        let dir = self.output_dir.join(scenario);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn write<T: Serialize>(&self, scenario: &str, name: &str, value: &T) -> Result<PathBuf, SnapshotError> {
        let dir = self.output_dir.join(scenario);
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        Ok(path)
    }
}

fn metadata(scenario: &str) -> SnapshotMetadata {
    SnapshotMetadata {
        scenario: scenario.to_string(),
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EpochKey;
    use crate::geo::CellCoord;
    use crate::population::Role;
    use crate::registry::FacilityId;
    use crate::spatial::PatchId;

    fn report() -> EpochReport {
        EpochReport {
            key: EpochKey {
                parameter_set: 1,
                age_group: 2,
            },
            facilities: 1,
            primary: Default::default(),
            staff: None,
            groups: Default::default(),
            sizes: Default::default(),
            travel: Default::default(),
            staff_travel: None,
        }
    }

    #[test]
    fn test_epoch_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let facility = Facility::new(CellCoord::new(3, 4), PatchId::default(), 45.5, 7.25, 12, 2);

        let path = writer.write_epoch("demo", &report(), &[facility]).unwrap();
        assert!(path.ends_with("demo/facilities_ag2_ps1.json"));

        let loaded = SnapshotWriter::load_epoch(&path).unwrap();
        assert_eq!(loaded.metadata.scenario, "demo");
        assert_eq!(loaded.report, report());
        assert_eq!(loaded.facilities, vec![facility]);
    }

    #[test]
    fn test_placement_snapshot_lists_every_agent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let mut population = Population::new();
        population.add_household(CellCoord::new(0, 0), 45.0, 7.0, &[8.0, 40.0]);
        population.placements_mut()[0] = Placement::Accepted {
            age_group: 0,
            facility: FacilityId::new(5),
            role: Role::Primary,
            group: Some(1),
        };

        let path = writer.write_placements("demo", 0, &population).unwrap();
        let loaded = SnapshotWriter::load_placements(&path).unwrap();
        assert_eq!(loaded.agents.len(), 2);
        assert_eq!(loaded.agents[0].placement.group(), Some(1));
        assert_eq!(loaded.agents[1].placement, Placement::Unassigned);
        assert_eq!(writer.list("demo").unwrap(), vec![path]);
        assert!(writer.list("missing").unwrap().is_empty());
    }
}
