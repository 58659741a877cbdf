use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::config::ExportConfig;
use crate::error::Error;
use crate::kinematics::{AccelerationSample, KinematicsTracker, Sample, VelocitySample};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PositionRow {
    #[serde(rename = "Tiempo")]
    pub tiempo: f64,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VelocityRow {
    #[serde(rename = "Tiempo")]
    pub tiempo: f64,
    #[serde(rename = "Vx")]
    pub vx: f64,
    #[serde(rename = "Vy")]
    pub vy: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AccelerationRow {
    #[serde(rename = "Tiempo")]
    pub tiempo: f64,
    #[serde(rename = "Ax")]
    pub ax: f64,
    #[serde(rename = "Ay")]
    pub ay: f64,
}

impl From<&Sample> for PositionRow {
    fn from(s: &Sample) -> Self {
        Self {
            tiempo: s.timestamp,
            x: s.x,
            y: s.y,
        }
    }
}

impl From<&VelocitySample> for VelocityRow {
    fn from(v: &VelocitySample) -> Self {
        Self {
            tiempo: v.timestamp,
            vx: v.vx,
            vy: v.vy,
        }
    }
}

impl From<&AccelerationSample> for AccelerationRow {
    fn from(a: &AccelerationSample) -> Self {
        Self {
            tiempo: a.timestamp,
            ax: a.ax,
            ay: a.ay,
        }
    }
}

/// Raw kinematic series in pixel units, one named section per quantity
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SeriesTable {
    #[serde(rename = "Positions")]
    pub positions: Vec<PositionRow>,
    #[serde(rename = "Velocities")]
    pub velocities: Vec<VelocityRow>,
    #[serde(rename = "Accelerations")]
    pub accelerations: Vec<AccelerationRow>,
}

impl SeriesTable {
    pub fn from_series(
        positions: &[Sample],
        velocities: &[VelocitySample],
        accelerations: &[AccelerationSample],
    ) -> Self {
        Self {
            positions: positions.iter().map(Into::into).collect(),
            velocities: velocities.iter().map(Into::into).collect(),
            accelerations: accelerations.iter().map(Into::into).collect(),
        }
    }

    pub fn from_tracker(tracker: &KinematicsTracker) -> Self {
        Self::from_series(
            tracker.positions(),
            tracker.velocities(),
            tracker.accelerations(),
        )
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

pub trait TableWriter {
    /// Persists the table, returns where it was written
    fn write_table(&mut self, table: &SeriesTable) -> Result<PathBuf, Error>;
}

/// Writes the table as a JSON document, creating the target directory on demand
#[derive(Debug, Clone)]
pub struct JsonTableWriter {
    dir: PathBuf,
    file_name: String,
}

impl JsonTableWriter {
    pub fn new<P: Into<PathBuf>, S: ToString>(dir: P, file_name: S) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.to_string(),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(config.dir.clone(), &config.file_name)
    }

    #[inline]
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

impl Default for JsonTableWriter {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl TableWriter for JsonTableWriter {
    fn write_table(&mut self, table: &SeriesTable) -> Result<PathBuf, Error> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            log::info!("created output directory {}", self.dir.display());
        }

        let path = self.path();
        let file = fs::File::create(&path)?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, table)?;
        std::io::Write::flush(&mut writer)?;

        log::info!(
            "table written to {} ({} positions, {} velocities, {} accelerations)",
            path.display(),
            table.positions.len(),
            table.velocities.len(),
            table.accelerations.len()
        );

        Ok(path)
    }
}

pub fn load_table<P: AsRef<Path>>(path: P) -> Result<SeriesTable, Error> {
    let file = fs::File::open(path)?;

    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> KinematicsTracker {
        let mut tracker = KinematicsTracker::new(30.0).unwrap();
        for (i, (x, y)) in [(12, 400), (19, 371), (27, 345), (34, 322), (40, 301)]
            .into_iter()
            .enumerate()
        {
            tracker.push(i as u64 + 3, x as f64, y as f64);
        }
        tracker
    }

    #[test]
    fn sections_keep_their_lengths_and_alignment() {
        let table = SeriesTable::from_tracker(&tracker());

        assert_eq!(table.positions.len(), 5);
        assert_eq!(table.velocities.len(), 4);
        assert_eq!(table.accelerations.len(), 3);
        assert_eq!(table.velocities[0].tiempo, table.positions[1].tiempo);
        assert_eq!(table.accelerations[0].tiempo, table.positions[2].tiempo);
    }

    #[test]
    fn json_uses_section_and_column_names() {
        let table = SeriesTable::from_tracker(&tracker());
        let value = serde_json::to_value(&table).unwrap();

        let pos = &value["Positions"][0];
        assert_eq!(pos["X"], 12.0);
        assert_eq!(pos["Y"], 400.0);
        assert!(pos["Tiempo"].is_number());
        assert!(value["Velocities"][0]["Vx"].is_number());
        assert!(value["Accelerations"][0]["Ay"].is_number());
    }

    #[test]
    fn positions_round_trip_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let tracker = tracker();
        let table = SeriesTable::from_tracker(&tracker);

        let mut writer = JsonTableWriter::new(&out, "tabla.json");
        let path = writer.write_table(&table).unwrap();
        assert_eq!(path, out.join("tabla.json"));

        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded, table);

        for (row, sample) in loaded.positions.iter().zip(tracker.positions()) {
            assert_eq!(row.tiempo, sample.timestamp);
            assert_eq!(row.x, sample.x);
            assert_eq!(row.y, sample.y);
        }
    }

    #[test]
    fn unwritable_target_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        // the target directory is an existing regular file
        let mut writer = JsonTableWriter::new(&blocker, "out.json");
        let err = writer.write_table(&SeriesTable::default()).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
    }
}
