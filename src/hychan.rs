//! Channel hydrograph log (HYCHAN.OUT) extraction.
//!
//! The log is a sequence of element blocks:
//!
//! ```text
//!      CHANNEL HYDROGRAPH FOR ELEMENT NO:    1234
//!
//!   TIME   ELEVATION   DEPTH   VELOCITY   DISCHARGE ...
//!   0.10     12.31      0.21     0.01       0.00
//!   0.20     12.35      0.25     0.02       0.13
//!   ...
//! ```
//!
//! A block's data rows start at the first line whose first token is numeric
//! and end at the next non-numeric line. The last block in a file is often cut
//! off by EOF, so block completion also relies on [`CanonicalLength`].

use chrono::NaiveDateTime;
use log::{debug, info, trace, warn};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::CellId;
use crate::cancel::CancelToken;
use crate::config::{HychanLayout, Quantity};
use crate::error::{ExtractError, Result};
use crate::io::results::ChannelSeries;
use crate::parse::{LineReader, RowDefect, model_time, value_at};

/// Text that opens every element block
pub const HEADER_MARKER: &str = "CHANNEL HYDROGRAPH FOR ELEMENT NO:";

/// Series-length policy for a hydrograph log.
///
/// The simulator does not write the number of timesteps anywhere, so the
/// length is taken from the first block that ends on a terminator line (a
/// non-numeric line after at least one data row). Every later block is
/// complete once it holds that many data rows, whether or not a terminator
/// follows. If the simulator ever emits variable-length blocks this policy
/// truncates the longer ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalLength(Option<usize>);

impl CanonicalLength {
    pub fn get(&self) -> Option<usize> {
        self.0
    }

    fn observe_terminated(&mut self, rows: usize) {
        if self.0.is_none() && rows > 0 {
            debug!("Hydrograph series length is {} rows", rows);
            self.0 = Some(rows);
        }
    }

    fn is_reached(&self, rows: usize) -> bool {
        self.0.is_some_and(|len| rows >= len)
    }
}

/// A numeric data row of a hydrograph block
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRow {
    pub time_offset_hours: f64,
    /// Requested quantity; a defect drops the row from the series but it still
    /// counts towards the block length.
    pub value: std::result::Result<f64, RowDefect>,
}

impl ChannelRow {
    /// Parse a data row. `Err` means the line is not a data row at all.
    pub fn parse(line: &str, layout: &HychanLayout, quantity: Quantity) -> std::result::Result<Self, RowDefect> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let time_offset_hours = value_at(&tokens, layout.time)?;
        Ok(ChannelRow {
            time_offset_hours,
            value: value_at(&tokens, layout.column(quantity)),
        })
    }
}

/// How a block ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// A non-numeric line followed the data rows
    Terminator,
    /// The block reached the canonical length
    CanonicalLength,
    /// The next block header started before any terminator
    NextHeader,
    Eof,
}

/// Rows of one requested element block
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBlock {
    pub element: CellId,
    pub rows: Vec<ChannelRow>,
    pub end: BlockEnd,
}

#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    element: Option<CellId>,
}

fn parse_header(line: &str, layout: &HychanLayout) -> Option<BlockHeader> {
    if !line.trim_start().starts_with(HEADER_MARKER) {
        return None;
    }
    let element = line
        .split_whitespace()
        .nth(layout.element_token)
        .and_then(|t| t.parse::<CellId>().ok());
    if element.is_none() {
        warn!("Unreadable element number in hydrograph header {:?}", line.trim());
    }
    Some(BlockHeader { element })
}

/// Sequential scan over a hydrograph log, yielding the blocks of requested
/// elements. Blocks of other elements are counted, not buffered.
pub struct HychanCursor<'a, R> {
    lines: LineReader<R>,
    path: &'a Path,
    layout: HychanLayout,
    quantity: Quantity,
    requested: &'a HashSet<CellId>,
    cancel: CancelToken,
    length: CanonicalLength,
    pending: Option<BlockHeader>,
    blocks_seen: usize,
}

impl<'a, R: BufRead> HychanCursor<'a, R> {
    pub fn new(
        reader: R,
        path: &'a Path,
        layout: HychanLayout,
        quantity: Quantity,
        requested: &'a HashSet<CellId>,
    ) -> Self {
        HychanCursor {
            lines: LineReader::new(reader),
            path,
            layout,
            quantity,
            requested,
            cancel: CancelToken::new(),
            length: CanonicalLength::default(),
            pending: None,
            blocks_seen: 0,
        }
    }

    pub fn with_cancel(mut self, cancel: &CancelToken) -> Self {
        self.cancel = cancel.clone();
        self
    }

    pub fn canonical_length(&self) -> CanonicalLength {
        self.length
    }

    /// Blocks scanned so far, requested or not
    pub fn blocks_seen(&self) -> usize {
        self.blocks_seen
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        self.lines
            .next_line()
            .map_err(|e| ExtractError::io(self.path, e))
    }

    fn next_header(&mut self) -> Result<Option<BlockHeader>> {
        if let Some(header) = self.pending.take() {
            return Ok(Some(header));
        }
        while let Some(line) = self.read_line()? {
            if let Some(header) = parse_header(&line, &self.layout) {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    /// Scan one block, keeping its rows only if the element was requested.
    fn scan_block(&mut self) -> Result<Option<(Option<CellId>, Vec<ChannelRow>, BlockEnd)>> {
        self.cancel.check(self.blocks_seen)?;
        let Some(header) = self.next_header()? else {
            return Ok(None);
        };
        let keep = header
            .element
            .filter(|e| self.requested.contains(e));

        let mut rows = Vec::new();
        let mut count = 0usize;
        let end = loop {
            if self.length.is_reached(count) {
                break BlockEnd::CanonicalLength;
            }
            let Some(line) = self.read_line()? else {
                break BlockEnd::Eof;
            };
            if let Some(next) = parse_header(&line, &self.layout) {
                self.pending = Some(next);
                break BlockEnd::NextHeader;
            }
            match ChannelRow::parse(&line, &self.layout, self.quantity) {
                Ok(row) => {
                    count += 1;
                    if keep.is_some() {
                        rows.push(row);
                    }
                }
                // column headings and blank lines before the data
                Err(_) if count == 0 => continue,
                Err(_) => break BlockEnd::Terminator,
            }
        };

        if end == BlockEnd::Terminator {
            self.length.observe_terminated(count);
        }
        self.blocks_seen += 1;
        trace!(
            "Hydrograph block {:?} ended by {:?} after {} rows",
            header.element, end, count
        );
        Ok(Some((keep, rows, end)))
    }

    fn next_block(&mut self) -> Result<Option<ChannelBlock>> {
        while let Some((keep, rows, end)) = self.scan_block()? {
            if let Some(element) = keep {
                return Ok(Some(ChannelBlock { element, rows, end }));
            }
        }
        Ok(None)
    }

    /// Scan blocks until the series length is known or the log ends.
    pub fn detect_length(&mut self) -> Result<CanonicalLength> {
        while self.length.get().is_none() && self.scan_block()?.is_some() {}
        Ok(self.length)
    }
}

impl<R: BufRead> Iterator for HychanCursor<'_, R> {
    type Item = Result<ChannelBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

/// Convert a block into absolute-time series, dropping rows without a value.
pub fn block_to_series(block: &ChannelBlock, base_time: NaiveDateTime) -> ChannelSeries {
    let mut series = Vec::with_capacity(block.rows.len());
    for row in &block.rows {
        let value = match &row.value {
            Ok(v) => *v,
            Err(defect) => {
                debug!(
                    "Element {} at {} h: skipping row, {}",
                    block.element, row.time_offset_hours, defect
                );
                continue;
            }
        };
        match model_time(base_time, row.time_offset_hours) {
            Some(time) => series.push((time, value)),
            None => debug!(
                "Element {}: model time {} h out of range",
                block.element, row.time_offset_hours
            ),
        }
    }
    series
}

/// Extract per-element series of `quantity` from a hydrograph log.
///
/// Every requested id is present in the result; ids not found in the log map
/// to an empty series. Series lengths can differ between elements because
/// rows without a usable value are dropped.
pub fn extract_channel_series(
    log_path: &Path,
    quantity: Quantity,
    base_time: NaiveDateTime,
    requested_ids: &HashSet<CellId>,
) -> Result<HashMap<CellId, ChannelSeries>> {
    extract_channel_series_with(
        log_path,
        quantity,
        base_time,
        requested_ids,
        &HychanLayout::default(),
        &CancelToken::new(),
    )
}

pub fn extract_channel_series_with(
    log_path: &Path,
    quantity: Quantity,
    base_time: NaiveDateTime,
    requested_ids: &HashSet<CellId>,
    layout: &HychanLayout,
    cancel: &CancelToken,
) -> Result<HashMap<CellId, ChannelSeries>> {
    let file = File::open(log_path).map_err(|e| ExtractError::io(log_path, e))?;
    channel_series_from_reader(
        BufReader::new(file),
        log_path,
        quantity,
        base_time,
        requested_ids,
        layout,
        cancel,
    )
}

pub fn channel_series_from_reader<R: BufRead>(
    reader: R,
    path: &Path,
    quantity: Quantity,
    base_time: NaiveDateTime,
    requested_ids: &HashSet<CellId>,
    layout: &HychanLayout,
    cancel: &CancelToken,
) -> Result<HashMap<CellId, ChannelSeries>> {
    let mut results: HashMap<CellId, ChannelSeries> =
        requested_ids.iter().map(|id| (*id, Vec::new())).collect();

    let mut cursor =
        HychanCursor::new(reader, path, *layout, quantity, requested_ids).with_cancel(cancel);
    for block in cursor.by_ref() {
        let block = block?;
        let series = block_to_series(&block, base_time);
        info!(
            "Extracted element {} ({} of {} rows)",
            block.element,
            series.len(),
            block.rows.len()
        );
        results.insert(block.element, series);
    }

    if cursor.blocks_seen() == 0 {
        return Err(ExtractError::malformed_log(
            path,
            0,
            "no channel hydrograph blocks found",
        ));
    }
    Ok(results)
}

/// Series length of a hydrograph log, if any block ends on a terminator.
pub fn detect_series_length(log_path: &Path, layout: &HychanLayout) -> Result<Option<usize>> {
    let file = File::open(log_path).map_err(|e| ExtractError::io(log_path, e))?;
    let requested = HashSet::new();
    let mut cursor = HychanCursor::new(
        BufReader::new(file),
        log_path,
        *layout,
        Quantity::WaterLevel,
        &requested,
    );
    Ok(cursor.detect_length()?.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{TIMESTAMP_FORMAT, parse_timestamp};
    use std::io::Cursor;

    fn block(element: CellId, rows: usize, terminated: bool) -> String {
        let mut text = format!("     CHANNEL HYDROGRAPH FOR ELEMENT NO:    {}\n\n", element);
        text.push_str("  TIME   ELEVATION   DEPTH   VELOCITY   DISCHARGE\n");
        for i in 1..=rows {
            let t = i as f64 * 0.5;
            text.push_str(&format!(
                "  {:.2}   {:.2}   {:.2}   0.10   {:.2}\n",
                t,
                100.0 + element as f64 + t,
                t / 10.0,
                element as f64 * t
            ));
        }
        if terminated {
            text.push_str("\n  MAXIMUM DISCHARGE\n");
        }
        text
    }

    fn extract(text: &str, quantity: Quantity, ids: &[CellId]) -> Result<HashMap<CellId, ChannelSeries>> {
        let requested: HashSet<CellId> = ids.iter().copied().collect();
        channel_series_from_reader(
            Cursor::new(text),
            Path::new("HYCHAN.OUT"),
            quantity,
            parse_timestamp("2020-01-01 00:00:00").unwrap(),
            &requested,
            &HychanLayout::default(),
            &CancelToken::new(),
        )
    }

    #[test]
    fn test_extracts_requested_quantity() {
        let text = format!("{}{}", block(10, 4, true), block(20, 4, true));
        let results = extract(&text, Quantity::WaterLevel, &[20]).unwrap();
        let series = &results[&20];
        assert_eq!(series.len(), 4);
        assert_eq!(series[0].0.format(TIMESTAMP_FORMAT).to_string(), "2020-01-01 00:30:00");
        assert_eq!(series[0].1, 120.5);
        assert!(!results.contains_key(&10));

        let results = extract(&text, Quantity::Discharge, &[10]).unwrap();
        assert_eq!(results[&10][3].1, 20.0);
    }

    #[test]
    fn test_truncated_final_block() {
        let mut text = String::new();
        for element in 1..=3 {
            text.push_str(&block(element, 6, true));
        }
        text.push_str(&block(4, 4, false));
        let results = extract(&text, Quantity::Depth, &[1, 2, 3, 4]).unwrap();
        assert_eq!(results[&1].len(), 6);
        assert_eq!(results[&3].len(), 6);
        assert_eq!(results[&4].len(), 4);
    }

    #[test]
    fn test_canonical_length_bounds_unterminated_blocks() {
        // the second block has trailing numeric noise with no terminator
        let mut text = block(1, 3, true);
        text.push_str(&block(2, 3, false));
        text.push_str("  9.00   1.0   1.0   1.0   1.0\n");
        let results = extract(&text, Quantity::WaterLevel, &[2]).unwrap();
        assert_eq!(results[&2].len(), 3);
    }

    #[test]
    fn test_skipped_block_sets_length() {
        let mut text = block(1, 2, true);
        text.push_str(&block(2, 2, false));
        text.push_str("  5.00   1.0   1.0   1.0   1.0\n");
        let requested: HashSet<CellId> = [2].into_iter().collect();
        let mut cursor = HychanCursor::new(
            Cursor::new(text),
            Path::new("HYCHAN.OUT"),
            HychanLayout::default(),
            Quantity::WaterLevel,
            &requested,
        );
        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.element, 2);
        assert_eq!(first.end, BlockEnd::CanonicalLength);
        assert_eq!(cursor.canonical_length().get(), Some(2));
        assert!(cursor.next().is_none());
        assert_eq!(cursor.blocks_seen(), 2);
    }

    #[test]
    fn test_bad_values_are_dropped() {
        let text = "     CHANNEL HYDROGRAPH FOR ELEMENT NO:    7\n\
                    0.5  10.0  1.0  0.0  3.0\n\
                    1.0  NaN   1.0  0.0  3.0\n\
                    1.5  ***   1.0  0.0  3.0\n\
                    2.0  11.0\n\
                    2.5  12.0  1.0  0.0  3.0\n";
        let results = extract(text, Quantity::WaterLevel, &[7]).unwrap();
        let values: Vec<f64> = results[&7].iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![10.0, 11.0, 12.0]);

        // row at 2.0 has no discharge column
        let results = extract(text, Quantity::Discharge, &[7]).unwrap();
        assert_eq!(results[&7].len(), 4);
    }

    #[test]
    fn test_absent_ids_map_to_empty_series() {
        let results = extract(&block(1, 3, true), Quantity::WaterLevel, &[1, 99]).unwrap();
        assert_eq!(results[&1].len(), 3);
        assert!(results[&99].is_empty());
    }

    #[test]
    fn test_log_without_blocks_is_malformed() {
        assert!(matches!(
            extract("FLO-2D\nno data here\n", Quantity::WaterLevel, &[1]),
            Err(ExtractError::MalformedLog { .. })
        ));
    }

    #[test]
    fn test_cancelled_scan_aborts() {
        let requested: HashSet<CellId> = [1].into_iter().collect();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = channel_series_from_reader(
            Cursor::new(block(1, 3, true)),
            Path::new("HYCHAN.OUT"),
            Quantity::WaterLevel,
            parse_timestamp("2020-01-01 00:00:00").unwrap(),
            &requested,
            &HychanLayout::default(),
            &cancel,
        );
        assert!(matches!(result, Err(ExtractError::Aborted { completed: 0 })));
    }

    #[test]
    fn test_detect_series_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HYCHAN.OUT");
        std::fs::write(&path, format!("{}{}", block(1, 5, true), block(2, 5, false))).unwrap();
        assert_eq!(detect_series_length(&path, &HychanLayout::default()).unwrap(), Some(5));
    }

    #[test]
    fn test_detected_length_matches_extraction() {
        // first block is cut short by the next header, so the second sets the length
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HYCHAN.OUT");
        let mut text = block(1, 3, false);
        text.push_str(&block(2, 5, true));
        text.push_str(&block(3, 5, false));
        text.push_str("  9.00   1.0   1.0   1.0   1.0\n");
        std::fs::write(&path, &text).unwrap();

        let length = detect_series_length(&path, &HychanLayout::default()).unwrap();
        assert_eq!(length, Some(5));
        let results = extract(&text, Quantity::WaterLevel, &[3]).unwrap();
        assert_eq!(Some(results[&3].len()), length);
    }

    #[test]
    fn test_no_terminated_block_has_no_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HYCHAN.OUT");
        std::fs::write(&path, block(1, 4, false)).unwrap();
        assert_eq!(detect_series_length(&path, &HychanLayout::default()).unwrap(), None);
    }
}
