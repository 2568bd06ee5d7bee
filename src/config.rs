use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::catalog::check_resolution;
use crate::error::{ExtractError, Result};
use crate::parse::parse_timestamp;

/// Default raster cell size, in model length units
pub const DEFAULT_RESOLUTION: f64 = 250.0;

/// Default minimum flood depth written to rasters
pub const DEFAULT_MIN_DEPTH: f64 = 0.3;

// Column layout of HYCHAN.OUT
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HychanLayout {
    /// Token index of the element number on a block header line
    pub element_token: usize,
    pub time: usize,
    pub water_level: usize,
    pub depth: usize,
    pub discharge: usize,
}

impl Default for HychanLayout {
    fn default() -> Self {
        HychanLayout {
            element_token: 5,
            time: 0,
            water_level: 1,
            depth: 2,
            discharge: 4,
        }
    }
}

impl HychanLayout {
    pub fn column(&self, quantity: Quantity) -> usize {
        match quantity {
            Quantity::WaterLevel => self.water_level,
            Quantity::Depth => self.depth,
            Quantity::Discharge => self.discharge,
        }
    }
}

// Column layout of TIMDEP.OUT data rows. Deliberately not tied to HychanLayout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimdepLayout {
    pub cell: usize,
    pub depth: usize,
    pub water_level: usize,
}

impl Default for TimdepLayout {
    fn default() -> Self {
        TimdepLayout {
            cell: 0,
            depth: 2,
            water_level: 5,
        }
    }
}

impl TimdepLayout {
    pub fn column(&self, quantity: FloodPlaneQuantity) -> usize {
        match quantity {
            FloodPlaneQuantity::Depth => self.depth,
            FloodPlaneQuantity::WaterLevel => self.water_level,
        }
    }
}

/// Channel quantity selected from HYCHAN.OUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Quantity {
    WaterLevel,
    Depth,
    Discharge,
}

/// Flood-plane quantity selected from TIMDEP.OUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FloodPlaneQuantity {
    Depth,
    WaterLevel,
}

// Output format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

/// Per-run settings, usually read from a small JSON file next to the run.
///
/// ```json
/// { "base_time": "2020-01-01 00:00:00", "run_time": "2020-01-02 00:00:00",
///   "resolution": 250, "min_depth": 0.3 }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunConfig {
    #[serde(deserialize_with = "de_timestamp")]
    pub base_time: NaiveDateTime,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub run_time: Option<NaiveDateTime>,
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default = "default_min_depth")]
    pub min_depth: f64,
    #[serde(default)]
    pub hychan: HychanLayout,
    #[serde(default)]
    pub timdep: TimdepLayout,
}

impl RunConfig {
    pub fn new(base_time: NaiveDateTime) -> Self {
        RunConfig {
            base_time,
            run_time: None,
            resolution: DEFAULT_RESOLUTION,
            min_depth: DEFAULT_MIN_DEPTH,
            hychan: HychanLayout::default(),
            timdep: TimdepLayout::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;
        let config: RunConfig = serde_json::from_str(&content)
            .map_err(|e| ExtractError::Config(format!("{:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Start of the reporting window; defaults to the base time.
    pub fn run_start(&self) -> NaiveDateTime {
        self.run_time.unwrap_or(self.base_time)
    }

    pub fn validate(&self) -> Result<()> {
        check_resolution(self.resolution)?;
        if !self.min_depth.is_finite() {
            return Err(ExtractError::Config(format!(
                "min_depth must be finite, got {}",
                self.min_depth
            )));
        }
        Ok(())
    }
}

fn default_resolution() -> f64 {
    DEFAULT_RESOLUTION
}

fn default_min_depth() -> f64 {
    DEFAULT_MIN_DEPTH
}

fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", s)))
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<NaiveDateTime>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", s))),
        None => Ok(None),
    }
}
