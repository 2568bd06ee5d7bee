use clap::{Args, Parser, Subcommand};
use flo2d_extract::config::{FloodPlaneQuantity, OutputFormat, Quantity};
use std::path::PathBuf;

/// Extract time series and flood depth rasters from a finished FLO-2D run
#[derive(Parser, Debug)]
#[command(name = "flo2d-extract", version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Channel element series from HYCHAN.OUT
    Channel {
        #[command(flatten)]
        run: RunArgs,

        /// CSV of `id,label` naming the channel elements to extract
        #[arg(short, long)]
        labels: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Quantity::WaterLevel)]
        quantity: Quantity,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Flood-plane cell series from TIMDEP.OUT
    FloodPlane {
        #[command(flatten)]
        run: RunArgs,

        /// CSV of `id,label` naming the grid cells to extract
        #[arg(short, long)]
        labels: PathBuf,

        #[arg(short, long, value_enum, default_value_t = FloodPlaneQuantity::Depth)]
        quantity: FloodPlaneQuantity,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Flood depth rasters (ESRI ASCII) from TIMDEP.OUT and CADPTS.DAT
    Grids {
        #[command(flatten)]
        run: RunArgs,

        /// Directory the rasters are written to
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Raster cell size
        #[arg(long)]
        resolution: Option<f64>,

        /// Shallowest depth written to a raster
        #[arg(long)]
        min_depth: Option<f64>,
    },

    /// Channel and flood-plane series in one pass over the run
    All {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long)]
        channel_labels: PathBuf,

        #[arg(long)]
        flood_plane_labels: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Quantity::WaterLevel)]
        quantity: Quantity,

        /// Directory receiving channel.<ext> and flood_plane.<ext>
        #[arg(short, long)]
        out_dir: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run directory holding the simulation `output/` folder
    pub run_dir: PathBuf,

    /// JSON run configuration (base_time, run_time, resolution, ...)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Simulation base time, e.g. "2020-01-01 00:00:00"
    #[arg(long)]
    pub base_time: Option<String>,

    /// Start of the reporting window; earlier rasters are skipped
    #[arg(long)]
    pub run_time: Option<String>,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Output file; standard output when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,
}

pub fn get_args() -> Cli {
    Cli::parse()
}
