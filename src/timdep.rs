//! Time-dependent flood-plane log (TIMDEP.OUT) extraction.
//!
//! Each block starts with a line holding a single token, the model time in
//! hours, followed by one row per wet cell:
//!
//! ```text
//!      1.00
//!   1021   0.000   0.512   0.01   0.02   12.843
//!   1022   0.000   0.104   0.00   0.01   12.501
//!      2.00
//!   ...
//! ```

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::CellId;
use crate::cancel::CancelToken;
use crate::catalog::{BoundingBox, GridIndex, check_resolution};
use crate::config::{FloodPlaneQuantity, TimdepLayout};
use crate::error::{ExtractError, Result};
use crate::io::esri::{EsriHeader, GridSnapshot};
use crate::io::results::FloodPlaneSeries;
use crate::parse::{FILE_TIMESTAMP_FORMAT, LineReader, RowDefect, model_time, parse_number, value_at};

/// Prefix of every raster file name
pub const GRID_FILE_PREFIX: &str = "water_level_grid";

/// One model-time block of the flood-plane log
#[derive(Debug, Clone, PartialEq)]
pub struct FloodPlaneSnapshot {
    pub model_time_hours: f64,
    /// `(cell, value)` in file order
    pub depths: Vec<(CellId, f64)>,
}

impl FloodPlaneSnapshot {
    pub fn lookup(&self) -> HashMap<CellId, f64> {
        self.depths.iter().copied().collect()
    }
}

/// A data row of the flood-plane log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloodPlaneRow {
    pub cell: CellId,
    pub value: f64,
}

impl FloodPlaneRow {
    pub fn parse(tokens: &[&str], layout: &TimdepLayout, column: usize) -> std::result::Result<Self, RowDefect> {
        let cell_token = tokens
            .get(layout.cell)
            .ok_or(RowDefect::MissingField { column: layout.cell })?;
        let cell = cell_token.parse::<CellId>().map_err(|_| RowDefect::NotNumeric {
            column: layout.cell,
            token: cell_token.to_string(),
        })?;
        let value = value_at(tokens, column)?;
        Ok(FloodPlaneRow { cell, value })
    }
}

/// Sequential block scan over a flood-plane log.
///
/// The marker that ends one block is read ahead and opens the next.
pub struct TimdepCursor<'a, R> {
    lines: LineReader<R>,
    path: &'a Path,
    layout: TimdepLayout,
    column: usize,
    filter: Option<&'a HashSet<CellId>>,
    cancel: CancelToken,
    next_marker: Option<f64>,
    blocks: usize,
    defects: usize,
}

impl<'a, R: BufRead> TimdepCursor<'a, R> {
    pub fn new(reader: R, path: &'a Path, layout: TimdepLayout, column: usize) -> Self {
        TimdepCursor {
            lines: LineReader::new(reader),
            path,
            layout,
            column,
            filter: None,
            cancel: CancelToken::new(),
            next_marker: None,
            blocks: 0,
            defects: 0,
        }
    }

    /// Keep only rows of these cells
    pub fn only(mut self, cells: &'a HashSet<CellId>) -> Self {
        self.filter = Some(cells);
        self
    }

    pub fn with_cancel(mut self, cancel: &CancelToken) -> Self {
        self.cancel = cancel.clone();
        self
    }

    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Rows skipped so far because they could not be parsed
    pub fn defects(&self) -> usize {
        self.defects
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        self.lines
            .next_line()
            .map_err(|e| ExtractError::io(self.path, e))
    }

    fn parse_marker(&self, token: &str) -> Result<f64> {
        parse_number(token).ok_or_else(|| {
            ExtractError::malformed_log(
                self.path,
                self.lines.line_no(),
                format!("model time marker {:?} is not a number", token),
            )
        })
    }

    fn first_marker(&mut self) -> Result<Option<f64>> {
        if let Some(marker) = self.next_marker.take() {
            return Ok(Some(marker));
        }
        while let Some(line) = self.read_line()? {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.len() {
                0 => continue,
                1 => return self.parse_marker(tokens[0]).map(Some),
                _ => debug!(
                    "{:?} line {}: row before the first time marker",
                    self.path,
                    self.lines.line_no()
                ),
            }
        }
        Ok(None)
    }

    fn next_block(&mut self) -> Result<Option<FloodPlaneSnapshot>> {
        self.cancel.check(self.blocks)?;
        let Some(model_time_hours) = self.first_marker()? else {
            return Ok(None);
        };

        let mut depths = Vec::new();
        while let Some(line) = self.read_line()? {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.len() {
                0 => continue,
                1 => {
                    self.next_marker = Some(self.parse_marker(tokens[0])?);
                    break;
                }
                _ => {}
            }
            match FloodPlaneRow::parse(&tokens, &self.layout, self.column) {
                Ok(row) => {
                    if self.filter.is_none_or(|f| f.contains(&row.cell)) {
                        depths.push((row.cell, row.value));
                    }
                }
                Err(defect) => {
                    self.defects += 1;
                    debug!(
                        "{:?} line {}: skipping row, {}",
                        self.path,
                        self.lines.line_no(),
                        defect
                    );
                }
            }
        }

        self.blocks += 1;
        Ok(Some(FloodPlaneSnapshot {
            model_time_hours,
            depths,
        }))
    }
}

impl<R: BufRead> Iterator for TimdepCursor<'_, R> {
    type Item = Result<FloodPlaneSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

fn open(log_path: &Path) -> Result<BufReader<File>> {
    File::open(log_path)
        .map(BufReader::new)
        .map_err(|e| ExtractError::io(log_path, e))
}

fn no_blocks(path: &Path) -> ExtractError {
    ExtractError::malformed_log(path, 0, "no model time blocks found")
}

/// Per-cell flood depth series.
///
/// Every requested cell gets exactly one entry per block, `None` where the
/// cell is absent from that block, so all series share the same timestamps.
pub fn extract_timeseries(
    log_path: &Path,
    base_time: NaiveDateTime,
    requested_ids: &HashSet<CellId>,
) -> Result<HashMap<CellId, FloodPlaneSeries>> {
    extract_timeseries_with(
        log_path,
        FloodPlaneQuantity::Depth,
        base_time,
        requested_ids,
        &TimdepLayout::default(),
        &CancelToken::new(),
    )
}

pub fn extract_timeseries_with(
    log_path: &Path,
    quantity: FloodPlaneQuantity,
    base_time: NaiveDateTime,
    requested_ids: &HashSet<CellId>,
    layout: &TimdepLayout,
    cancel: &CancelToken,
) -> Result<HashMap<CellId, FloodPlaneSeries>> {
    let cursor = TimdepCursor::new(open(log_path)?, log_path, *layout, layout.column(quantity))
        .only(requested_ids)
        .with_cancel(cancel);
    timeseries_from_cursor(cursor, log_path, base_time, requested_ids)
}

pub fn timeseries_from_cursor<R: BufRead>(
    mut cursor: TimdepCursor<'_, R>,
    path: &Path,
    base_time: NaiveDateTime,
    requested_ids: &HashSet<CellId>,
) -> Result<HashMap<CellId, FloodPlaneSeries>> {
    let mut results: HashMap<CellId, FloodPlaneSeries> =
        requested_ids.iter().map(|id| (*id, Vec::new())).collect();

    for snapshot in cursor.by_ref() {
        let snapshot = snapshot?;
        let Some(time) = model_time(base_time, snapshot.model_time_hours) else {
            warn!(
                "{:?}: model time {} h out of range, block skipped",
                path, snapshot.model_time_hours
            );
            continue;
        };
        let values = snapshot.lookup();
        for (id, series) in results.iter_mut() {
            series.push((time, values.get(id).copied()));
        }
    }

    if cursor.blocks() == 0 {
        return Err(no_blocks(path));
    }
    info!(
        "Extracted {} flood-plane cells over {} blocks ({} rows skipped)",
        results.len(),
        cursor.blocks(),
        cursor.defects()
    );
    Ok(results)
}

/// Raster file name for a block at `time`
pub fn grid_file_name(time: NaiveDateTime) -> String {
    format!("{}-{}.asc", GRID_FILE_PREFIX, time.format(FILE_TIMESTAMP_FORMAT))
}

/// Render one block: cells at or above `min_depth` get their depth, all
/// others stay NODATA.
pub fn render_snapshot(
    snapshot: &FloodPlaneSnapshot,
    grid_index: &GridIndex,
    bbox: &BoundingBox,
    resolution: f64,
    min_depth: f64,
) -> GridSnapshot {
    let mut grid = GridSnapshot::empty(EsriHeader::for_extent(bbox, resolution));
    let mut unplaced = 0usize;
    for &(cell, depth) in &snapshot.depths {
        match grid_index.locate(cell) {
            Some((col, row)) => {
                if depth >= min_depth {
                    grid.set(col, row, depth);
                }
            }
            None => unplaced += 1,
        }
    }
    if unplaced > 0 {
        warn!(
            "{} cells at model time {} h are not on the grid",
            unplaced, snapshot.model_time_hours
        );
    }
    grid
}

/// Rasterise every block at or after `run_start_time` into `out_dir`.
///
/// Returns the number of distinct files written; zero is not an error. Blocks
/// whose times fall in the same second share a file name and the later wins.
#[allow(clippy::too_many_arguments)]
pub fn extract_grids(
    log_path: &Path,
    grid_index: &GridIndex,
    bounding_box: &BoundingBox,
    resolution: f64,
    base_time: NaiveDateTime,
    run_start_time: NaiveDateTime,
    min_depth: f64,
    out_dir: &Path,
) -> Result<usize> {
    let layout = TimdepLayout::default();
    let cursor = TimdepCursor::new(open(log_path)?, log_path, layout, layout.depth);
    grids_from_cursor(
        cursor,
        log_path,
        grid_index,
        bounding_box,
        resolution,
        base_time,
        run_start_time,
        min_depth,
        out_dir,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn grids_from_cursor<R: BufRead>(
    mut cursor: TimdepCursor<'_, R>,
    path: &Path,
    grid_index: &GridIndex,
    bounding_box: &BoundingBox,
    resolution: f64,
    base_time: NaiveDateTime,
    run_start_time: NaiveDateTime,
    min_depth: f64,
    out_dir: &Path,
) -> Result<usize> {
    check_resolution(resolution)?;
    if grid_index.resolution() != resolution {
        warn!(
            "Grid index built at resolution {} but rendering at {}",
            grid_index.resolution(),
            resolution
        );
    }
    fs::create_dir_all(out_dir).map_err(|e| ExtractError::io(out_dir, e))?;

    let mut written: HashSet<String> = HashSet::new();
    for snapshot in cursor.by_ref() {
        let snapshot = snapshot?;
        let Some(time) = model_time(base_time, snapshot.model_time_hours) else {
            warn!(
                "{:?}: model time {} h out of range, block skipped",
                path, snapshot.model_time_hours
            );
            continue;
        };
        if time < run_start_time {
            info!(
                "Skip. Current model time: {} is before run start {}",
                time.format(FILE_TIMESTAMP_FORMAT),
                run_start_time.format(FILE_TIMESTAMP_FORMAT)
            );
            continue;
        }

        let grid = render_snapshot(&snapshot, grid_index, bounding_box, resolution, min_depth);
        let file_name = grid_file_name(time);
        write_atomic(&grid, &out_dir.join(&file_name))?;
        info!("Prepared: {} ({} cells)", file_name, grid.filled());
        if !written.insert(file_name) {
            warn!(
                "{:?}: model time {} h maps to an existing raster name, earlier raster replaced",
                path, snapshot.model_time_hours
            );
        }
    }

    if cursor.blocks() == 0 {
        return Err(no_blocks(path));
    }
    Ok(written.len())
}

// Write beside the target and rename, so an interrupted write never leaves a
// truncated raster under the final name.
fn write_atomic(grid: &GridSnapshot, path: &Path) -> Result<()> {
    let mut partial = PathBuf::from(path);
    partial.set_extension("asc.part");
    grid.write_file(&partial)
        .map_err(|e| ExtractError::io(&partial, e))?;
    fs::rename(&partial, path).map_err(|e| ExtractError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::build_index_from_reader;
    use crate::io::esri::NODATA_VALUE;
    use crate::parse::{TIMESTAMP_FORMAT, parse_timestamp};
    use std::io::{Cursor, Read};

    const LOG: &str = "\
       1.00
    1   0.0   0.50   0.0   0.0   10.5
    2   0.0   0.10   0.0   0.0   10.1
       2.00
    1   0.0   0.70   0.0   0.0   10.7
    3   0.0   bad    0.0   0.0   10.9
    x   0.0   0.20   0.0   0.0   10.2

       3.00
    2   0.0   0.40   0.0   0.0   10.4
";

    fn cursor<'a>(text: &'a str, filter: &'a HashSet<CellId>) -> TimdepCursor<'a, Cursor<&'a str>> {
        TimdepCursor::new(Cursor::new(text), Path::new("TIMDEP.OUT"), TimdepLayout::default(), 2)
            .only(filter)
    }

    fn base() -> NaiveDateTime {
        parse_timestamp("2020-01-01 00:00:00").unwrap()
    }

    #[test]
    fn test_blocks_are_split_on_markers() {
        let mut cursor = TimdepCursor::new(
            Cursor::new(LOG),
            Path::new("TIMDEP.OUT"),
            TimdepLayout::default(),
            2,
        );
        let blocks: Vec<FloodPlaneSnapshot> = cursor.by_ref().map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].model_time_hours, 1.0);
        assert_eq!(blocks[0].depths, vec![(1, 0.5), (2, 0.1)]);
        assert_eq!(blocks[1].depths, vec![(1, 0.7)]);
        assert_eq!(blocks[2].depths, vec![(2, 0.4)]);
        assert_eq!(cursor.defects(), 2);
    }

    #[test]
    fn test_timeseries_pads_missing_cells() {
        let requested: HashSet<CellId> = [1, 2, 9].into_iter().collect();
        let results =
            timeseries_from_cursor(cursor(LOG, &requested), Path::new("TIMDEP.OUT"), base(), &requested)
                .unwrap();

        let one: Vec<Option<f64>> = results[&1].iter().map(|(_, v)| *v).collect();
        assert_eq!(one, vec![Some(0.5), Some(0.7), None]);
        let two: Vec<Option<f64>> = results[&2].iter().map(|(_, v)| *v).collect();
        assert_eq!(two, vec![Some(0.1), None, Some(0.4)]);
        assert!(results[&9].iter().all(|(_, v)| v.is_none()));

        let times: Vec<String> = results[&9]
            .iter()
            .map(|(t, _)| t.format(TIMESTAMP_FORMAT).to_string())
            .collect();
        assert_eq!(
            times,
            vec!["2020-01-01 01:00:00", "2020-01-01 02:00:00", "2020-01-01 03:00:00"]
        );
        assert_eq!(results[&1].iter().map(|(t, _)| *t).collect::<Vec<_>>(), results[&9].iter().map(|(t, _)| *t).collect::<Vec<_>>());
    }

    #[test]
    fn test_water_level_column() {
        let requested: HashSet<CellId> = [1].into_iter().collect();
        let cursor = TimdepCursor::new(Cursor::new(LOG), Path::new("TIMDEP.OUT"), TimdepLayout::default(), 5)
            .only(&requested);
        let results = timeseries_from_cursor(cursor, Path::new("TIMDEP.OUT"), base(), &requested).unwrap();
        assert_eq!(results[&1][0].1, Some(10.5));
    }

    #[test]
    fn test_bad_marker_is_malformed() {
        let requested: HashSet<CellId> = HashSet::new();
        let result = timeseries_from_cursor(
            cursor("   1.0\n1 0 0.2\n   soon\n", &requested),
            Path::new("TIMDEP.OUT"),
            base(),
            &requested,
        );
        assert!(matches!(result, Err(ExtractError::MalformedLog { line: 3, .. })));
    }

    #[test]
    fn test_empty_log_is_malformed() {
        let requested: HashSet<CellId> = [1].into_iter().collect();
        let result = timeseries_from_cursor(cursor("", &requested), Path::new("TIMDEP.OUT"), base(), &requested);
        assert!(matches!(result, Err(ExtractError::MalformedLog { .. })));
    }

    #[test]
    fn test_render_threshold_is_inclusive() {
        let (bbox, index) = build_index_from_reader(
            Cursor::new("1 0 0\n2 250 0\n3 0 250\n4 250 250\n"),
            Path::new("CADPTS.DAT"),
            250.0,
        )
        .unwrap();
        let min_depth = 0.3;
        let snapshot = FloodPlaneSnapshot {
            model_time_hours: 1.0,
            depths: vec![(1, min_depth), (2, min_depth - 1e-9), (3, f64::NAN), (42, 5.0)],
        };
        let grid = render_snapshot(&snapshot, &index, &bbox, 250.0, min_depth);
        assert_eq!(grid.get(0, 1), Some(min_depth));
        assert_eq!(grid.get(1, 1), Some(NODATA_VALUE));
        assert_eq!(grid.get(0, 0), Some(NODATA_VALUE));
        assert_eq!(grid.filled(), 1);
    }


    fn four_cells() -> (BoundingBox, GridIndex) {
        build_index_from_reader(
            Cursor::new("1 0 0\n2 250 0\n3 0 250\n4 250 250\n"),
            Path::new("CADPTS.DAT"),
            250.0,
        )
        .unwrap()
    }

    fn rasterise<R: BufRead>(cursor: TimdepCursor<'_, R>, out_dir: &Path, resolution: f64) -> Result<usize> {
        let (bbox, index) = four_cells();
        grids_from_cursor(
            cursor,
            Path::new("TIMDEP.OUT"),
            &index,
            &bbox,
            resolution,
            base(),
            base(),
            0.3,
            out_dir,
        )
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    // Hands out one byte per read and raises the token once `at` bytes are consumed
    struct CancelAt {
        text: &'static [u8],
        pos: usize,
        at: usize,
        cancel: CancelToken,
    }

    impl Read for CancelAt {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if buf.is_empty() || self.pos >= self.text.len() {
                return Ok(0);
            }
            buf[0] = self.text[self.pos];
            self.pos += 1;
            if self.pos >= self.at {
                self.cancel.cancel();
            }
            Ok(1)
        }
    }

    #[test]
    fn test_cancelled_grid_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("grids");
        let cancel = CancelToken::new();
        cancel.cancel();
        let cursor = TimdepCursor::new(Cursor::new(LOG), Path::new("TIMDEP.OUT"), TimdepLayout::default(), 2)
            .with_cancel(&cancel);

        let result = rasterise(cursor, &out, 250.0);
        assert!(matches!(result, Err(ExtractError::Aborted { completed: 0 })));
        assert!(file_names(&out).is_empty());
    }

    #[test]
    fn test_cancel_between_blocks_keeps_finished_rasters() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("grids");
        let cancel = CancelToken::new();
        // raised once the second marker has been read, before block 2 is scanned
        let at = LOG.find("2.00\n").unwrap() + "2.00\n".len();
        let reader = CancelAt {
            text: LOG.as_bytes(),
            pos: 0,
            at,
            cancel: cancel.clone(),
        };
        let cursor = TimdepCursor::new(
            BufReader::with_capacity(1, reader),
            Path::new("TIMDEP.OUT"),
            TimdepLayout::default(),
            2,
        )
        .with_cancel(&cancel);

        let result = rasterise(cursor, &out, 250.0);
        assert!(matches!(result, Err(ExtractError::Aborted { completed: 1 })));
        let names = file_names(&out);
        assert_eq!(names, vec!["water_level_grid-2020-01-01_01-00-00.asc"]);
        assert!(names.iter().all(|n| !n.ends_with(".part")));

        let text = fs::read_to_string(out.join(&names[0])).unwrap();
        assert!(text.ends_with("-9 -9\n0.5 -9\n"));
    }

    #[test]
    fn test_same_second_blocks_share_one_raster() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("grids");
        let text = "   1.0\n1 0 0.5\n   1.0001\n1 0 0.6\n";
        let cursor = TimdepCursor::new(Cursor::new(text), Path::new("TIMDEP.OUT"), TimdepLayout::default(), 2);

        assert_eq!(rasterise(cursor, &out, 250.0).unwrap(), 1);
        let names = file_names(&out);
        assert_eq!(names, vec!["water_level_grid-2020-01-01_01-00-00.asc"]);
        let raster = fs::read_to_string(out.join(&names[0])).unwrap();
        assert!(raster.ends_with("0.6 -9\n"));
    }

    #[test]
    fn test_grid_run_rejects_bad_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = TimdepCursor::new(Cursor::new(LOG), Path::new("TIMDEP.OUT"), TimdepLayout::default(), 2);
        let result = rasterise(cursor, dir.path(), 0.0);
        assert!(matches!(result, Err(ExtractError::Config(_))));
    }
    #[test]
    fn test_grid_file_name() {
        let time = parse_timestamp("2020-01-01 01:00:00").unwrap();
        assert_eq!(grid_file_name(time), "water_level_grid-2020-01-01_01-00-00.asc");
    }
}
