use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::CellId;
use crate::error::{ExtractError, Result};
use crate::io::results::{LabelledSeries, SeriesValue, to_records};

// Label map entry from CSV
#[derive(Debug)]
struct LabelEntry {
    id: CellId,
    label: String,
}

impl LabelEntry {
    fn from_record(record: &StringRecord) -> std::result::Result<Self, String> {
        if record.len() < 2 {
            return Err("Record has fewer than 2 fields".into());
        }

        let id = record[0]
            .trim()
            .parse::<CellId>()
            .map_err(|_| format!("cell id {:?} is not an integer", &record[0]))?;
        let label = record[1].trim().to_string();
        if label.is_empty() {
            return Err(format!("empty label for cell {}", id));
        }

        Ok(LabelEntry { id, label })
    }
}

/// Read an `id,label` CSV (with header) into a cell -> label map.
pub fn read_label_map(path: &Path) -> Result<HashMap<CellId, String>> {
    let file = File::open(path).map_err(|e| ExtractError::io(path, e))?;
    label_map_from_reader(BufReader::new(file))
        .map_err(|reason| ExtractError::Config(format!("label map {:?}: {}", path, reason)))
}

pub fn label_map_from_reader<R: Read>(reader: R) -> std::result::Result<HashMap<CellId, String>, String> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut labels = HashMap::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| e.to_string())?;
        let entry = LabelEntry::from_record(&record).map_err(|e| format!("row {}: {}", idx + 1, e))?;
        labels.insert(entry.id, entry.label);
    }
    Ok(labels)
}

// Create CSV writer with headers
pub fn create_csv_writer<W: Write>(writer: W) -> csv::Result<Writer<W>> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);

    // Write header
    wtr.write_record(["label", "timestamp", "value"])?;

    Ok(wtr)
}

/// Write labelled series as `label,timestamp,value` rows.
pub fn write_csv<W: Write, V: SeriesValue>(writer: W, results: &LabelledSeries<V>) -> csv::Result<()> {
    let mut wtr = create_csv_writer(writer)?;
    for record in to_records(results) {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}
