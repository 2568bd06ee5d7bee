use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, info};
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::Path;
use std::time::Duration;

mod cli;

use cli::{Command, RunArgs, get_args};
use flo2d_extract::config::{OutputFormat, RunConfig};
use flo2d_extract::io::csv::{read_label_map, write_csv};
use flo2d_extract::io::results::{LabelledSeries, SeriesValue, write_json};
use flo2d_extract::parse::parse_timestamp;
use flo2d_extract::{CancelToken, run};

fn main() -> Result<()> {
    let args = get_args();
    init_logger(args.verbose);
    let cancel = CancelToken::new();

    match args.command {
        Command::Channel {
            run: run_args,
            labels,
            quantity,
            output,
        } => {
            let config = load_run_config(&run_args)?;
            let labels = read_label_map(&labels)?;
            let pb = spinner(format!("Extracting {:?} for {} channel elements", quantity, labels.len()))?;
            let series = run::channel_series(&run_args.run_dir, &config, quantity, &labels, &cancel)
                .with_context(|| format!("Failed to extract channel series from {:?}", run_args.run_dir))?;
            pb.finish_with_message(format!("Extracted {} channel series", series.len()));
            write_series(output.output.as_deref(), output.format, &series)?;
        }
        Command::FloodPlane {
            run: run_args,
            labels,
            quantity,
            output,
        } => {
            let config = load_run_config(&run_args)?;
            let labels = read_label_map(&labels)?;
            let pb = spinner(format!("Extracting {:?} for {} flood-plane cells", quantity, labels.len()))?;
            let series = run::flood_plane_series(&run_args.run_dir, &config, quantity, &labels, &cancel)
                .with_context(|| format!("Failed to extract flood-plane series from {:?}", run_args.run_dir))?;
            pb.finish_with_message(format!("Extracted {} flood-plane series", series.len()));
            write_series(output.output.as_deref(), output.format, &series)?;
        }
        Command::Grids {
            run: run_args,
            out_dir,
            resolution,
            min_depth,
        } => {
            let mut config = load_run_config(&run_args)?;
            if let Some(resolution) = resolution {
                config.resolution = resolution;
            }
            if let Some(min_depth) = min_depth {
                config.min_depth = min_depth;
            }
            config.validate()?;

            println!("\nRaster Configuration:");
            println!("  Base time: {}", config.base_time);
            println!("  Run start: {}", config.run_start());
            println!("  Resolution: {}", config.resolution);
            println!("  Minimum depth: {}", config.min_depth);

            let pb = spinner(format!("Rasterising flood depths into {:?}", out_dir))?;
            let written = run::water_level_grids(&run_args.run_dir, &config, &out_dir, &cancel)
                .with_context(|| format!("Failed to extract rasters from {:?}", run_args.run_dir))?;
            pb.finish_with_message(format!("Wrote {} rasters to {:?}", written, out_dir));
        }
        Command::All {
            run: run_args,
            channel_labels,
            flood_plane_labels,
            quantity,
            out_dir,
            format,
        } => {
            let config = load_run_config(&run_args)?;
            let channel_labels = read_label_map(&channel_labels)?;
            let flood_plane_labels = read_label_map(&flood_plane_labels)?;
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

            let pb = spinner("Extracting channel and flood-plane series".to_string())?;
            let series = run::extract_all(
                &run_args.run_dir,
                &config,
                quantity,
                &channel_labels,
                &flood_plane_labels,
                &cancel,
            )
            .with_context(|| format!("Failed to extract series from {:?}", run_args.run_dir))?;
            pb.finish_with_message("Extraction complete");

            let ext = match format {
                OutputFormat::Csv => "csv",
                OutputFormat::Json => "json",
            };
            let channel_path = out_dir.join(format!("channel.{}", ext));
            let flood_plane_path = out_dir.join(format!("flood_plane.{}", ext));
            write_series(Some(channel_path.as_path()), format, &series.channel)?;
            write_series(Some(flood_plane_path.as_path()), format, &series.flood_plane)?;
        }
    }

    Ok(())
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .init();
}

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

// Config file first, then command line overrides
fn load_run_config(args: &RunArgs) -> Result<RunConfig> {
    let base_time = args
        .base_time
        .as_deref()
        .map(|s| parse_timestamp(s).ok_or_else(|| anyhow!("Invalid base time: {}", s)))
        .transpose()?;
    let run_time = args
        .run_time
        .as_deref()
        .map(|s| parse_timestamp(s).ok_or_else(|| anyhow!("Invalid run time: {}", s)))
        .transpose()?;

    let mut config = match (&args.config, base_time) {
        (Some(path), _) => RunConfig::from_file(path)
            .with_context(|| format!("Failed to load run configuration {:?}", path))?,
        (None, Some(base_time)) => RunConfig::new(base_time),
        (None, None) => return Err(anyhow!("Either --config or --base-time is required")),
    };
    if let Some(base_time) = base_time {
        config.base_time = base_time;
    }
    if run_time.is_some() {
        config.run_time = run_time;
    }
    Ok(config)
}

fn write_series<V: SeriesValue>(
    output: Option<&Path>,
    format: OutputFormat,
    series: &LabelledSeries<V>,
) -> Result<()> {
    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(stdout().lock()),
    };
    match format {
        OutputFormat::Csv => write_csv(writer, series).context("Failed to write CSV")?,
        OutputFormat::Json => {
            let mut writer = writer;
            write_json(&mut writer, series).context("Failed to write JSON")?;
            writeln!(writer)?;
            writer.flush()?;
        }
    }
    if let Some(path) = output {
        info!("Results saved to {:?}", path);
    }
    Ok(())
}
