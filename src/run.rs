//! Entry points over a finished run directory.
//!
//! The simulation copies its outputs into `<run>/output/`; these helpers
//! resolve the files there and return labelled results.

use log::info;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::CellId;
use crate::cancel::CancelToken;
use crate::catalog::build_index;
use crate::config::{FloodPlaneQuantity, Quantity, RunConfig};
use crate::error::{ExtractError, Result};
use crate::hychan::extract_channel_series_with;
use crate::io::results::LabelledSeries;
use crate::remap::remap_labels;
use crate::timdep::{TimdepCursor, extract_timeseries_with, grids_from_cursor};

pub const OUTPUT_DIR: &str = "output";
pub const HYCHAN_FILE: &str = "HYCHAN.OUT";
pub const TIMDEP_FILE: &str = "TIMDEP.OUT";
pub const CADPTS_FILE: &str = "CADPTS.DAT";

/// Locations of the simulation outputs of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub hychan: PathBuf,
    pub timdep: PathBuf,
    pub cadpts: PathBuf,
}

impl RunPaths {
    pub fn new(run_dir: &Path) -> Self {
        let output = run_dir.join(OUTPUT_DIR);
        RunPaths {
            hychan: output.join(HYCHAN_FILE),
            timdep: output.join(TIMDEP_FILE),
            cadpts: output.join(CADPTS_FILE),
        }
    }
}

fn requested(labels: &HashMap<CellId, String>) -> HashSet<CellId> {
    labels.keys().copied().collect()
}

pub fn channel_series(
    run_dir: &Path,
    config: &RunConfig,
    quantity: Quantity,
    labels: &HashMap<CellId, String>,
    cancel: &CancelToken,
) -> Result<LabelledSeries<f64>> {
    let paths = RunPaths::new(run_dir);
    let series = extract_channel_series_with(
        &paths.hychan,
        quantity,
        config.base_time,
        &requested(labels),
        &config.hychan,
        cancel,
    )?;
    remap_labels(labels, series)
}

pub fn channel_water_levels(
    run_dir: &Path,
    config: &RunConfig,
    labels: &HashMap<CellId, String>,
) -> Result<LabelledSeries<f64>> {
    channel_series(run_dir, config, Quantity::WaterLevel, labels, &CancelToken::new())
}

pub fn channel_discharge(
    run_dir: &Path,
    config: &RunConfig,
    labels: &HashMap<CellId, String>,
) -> Result<LabelledSeries<f64>> {
    channel_series(run_dir, config, Quantity::Discharge, labels, &CancelToken::new())
}

pub fn flood_plane_series(
    run_dir: &Path,
    config: &RunConfig,
    quantity: FloodPlaneQuantity,
    labels: &HashMap<CellId, String>,
    cancel: &CancelToken,
) -> Result<LabelledSeries<Option<f64>>> {
    let paths = RunPaths::new(run_dir);
    let series = extract_timeseries_with(
        &paths.timdep,
        quantity,
        config.base_time,
        &requested(labels),
        &config.timdep,
        cancel,
    )?;
    remap_labels(labels, series)
}

pub fn flood_plane_depths(
    run_dir: &Path,
    config: &RunConfig,
    labels: &HashMap<CellId, String>,
) -> Result<LabelledSeries<Option<f64>>> {
    flood_plane_series(run_dir, config, FloodPlaneQuantity::Depth, labels, &CancelToken::new())
}

/// Write flood depth rasters for the run into `out_dir`.
pub fn water_level_grids(
    run_dir: &Path,
    config: &RunConfig,
    out_dir: &Path,
    cancel: &CancelToken,
) -> Result<usize> {
    config.validate()?;
    let paths = RunPaths::new(run_dir);
    let (bbox, index) = build_index(&paths.cadpts, config.resolution)?;
    let file = File::open(&paths.timdep).map_err(|e| ExtractError::io(&paths.timdep, e))?;
    let cursor = TimdepCursor::new(
        BufReader::new(file),
        &paths.timdep,
        config.timdep,
        config.timdep.depth,
    )
    .with_cancel(cancel);
    let written = grids_from_cursor(
        cursor,
        &paths.timdep,
        &index,
        &bbox,
        config.resolution,
        config.base_time,
        config.run_start(),
        config.min_depth,
        out_dir,
    )?;
    info!("Wrote {} rasters to {:?}", written, out_dir);
    Ok(written)
}

/// Channel and flood-plane series of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSeries {
    pub channel: LabelledSeries<f64>,
    pub flood_plane: LabelledSeries<Option<f64>>,
}

/// Extract channel and flood-plane series concurrently. The two logs are
/// independent; each is still scanned by a single thread.
pub fn extract_all(
    run_dir: &Path,
    config: &RunConfig,
    quantity: Quantity,
    channel_labels: &HashMap<CellId, String>,
    flood_plane_labels: &HashMap<CellId, String>,
    cancel: &CancelToken,
) -> Result<RunSeries> {
    let (channel, flood_plane) = rayon::join(
        || channel_series(run_dir, config, quantity, channel_labels, cancel),
        || {
            flood_plane_series(
                run_dir,
                config,
                FloodPlaneQuantity::Depth,
                flood_plane_labels,
                cancel,
            )
        },
    );
    Ok(RunSeries {
        channel: channel?,
        flood_plane: flood_plane?,
    })
}
