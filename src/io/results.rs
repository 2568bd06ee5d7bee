use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use crate::parse::TIMESTAMP_FORMAT;

/// Value written for a flood-plane cell that had no entry in a block
pub const MISSING_VALUE: f64 = -999.0;

/// Ordered `(timestamp, value)` pairs for one channel element
pub type ChannelSeries = Vec<(NaiveDateTime, f64)>;

/// Ordered `(timestamp, value)` pairs for one flood-plane cell; `None` when the
/// cell was absent from a block
pub type FloodPlaneSeries = Vec<(NaiveDateTime, Option<f64>)>;

/// Final results keyed by caller-facing label
pub type LabelledSeries<V> = BTreeMap<String, Vec<(NaiveDateTime, V)>>;

/// A series value as it is written out
pub trait SeriesValue {
    fn output_value(&self) -> f64;
}

impl SeriesValue for f64 {
    fn output_value(&self) -> f64 {
        *self
    }
}

impl SeriesValue for Option<f64> {
    fn output_value(&self) -> f64 {
        self.unwrap_or(MISSING_VALUE)
    }
}

// One row of serialised output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRecord<'a> {
    pub label: &'a str,
    pub timestamp: String,
    pub value: f64,
}

/// Flatten labelled results into output rows, labels in order then time order.
pub fn to_records<V: SeriesValue>(results: &LabelledSeries<V>) -> Vec<SeriesRecord<'_>> {
    results
        .iter()
        .flat_map(|(label, series)| {
            series.iter().map(move |(time, value)| SeriesRecord {
                label: label.as_str(),
                timestamp: time.format(TIMESTAMP_FORMAT).to_string(),
                value: value.output_value(),
            })
        })
        .collect()
}

/// Results as `label -> [[timestamp, value], ...]` with formatted timestamps.
pub fn to_string_series<V: SeriesValue>(results: &LabelledSeries<V>) -> BTreeMap<&str, Vec<(String, f64)>> {
    results
        .iter()
        .map(|(label, series)| {
            let formatted = series
                .iter()
                .map(|(time, value)| (time.format(TIMESTAMP_FORMAT).to_string(), value.output_value()))
                .collect();
            (label.as_str(), formatted)
        })
        .collect()
}

pub fn write_json<W: Write, V: SeriesValue>(writer: W, results: &LabelledSeries<V>) -> serde_json::Result<()> {
    serde_json::to_writer_pretty(writer, &to_string_series(results))
}
