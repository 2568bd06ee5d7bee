//! Extraction of FLO-2D simulation outputs.
//!
//! Reads the channel hydrograph log (HYCHAN.OUT), the time-dependent
//! flood-plane log (TIMDEP.OUT) and the cell coordinate catalog (CADPTS.DAT)
//! of a finished run, and turns them into labelled time series or ESRI ASCII
//! flood depth rasters.

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hychan;
pub mod io;
pub mod parse;
pub mod remap;
pub mod run;
pub mod timdep;

/// Grid element / channel element number as written by the simulator
pub type CellId = u32;

pub use cancel::CancelToken;
pub use catalog::{BoundingBox, CellRecord, GridIndex, build_index};
pub use config::{FloodPlaneQuantity, OutputFormat, Quantity, RunConfig};
pub use error::{ExtractError, Result};
pub use hychan::extract_channel_series;
pub use remap::remap_labels;
pub use timdep::{extract_grids, extract_timeseries};
