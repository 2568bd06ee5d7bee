//! Coordinate catalog (CADPTS.DAT) parsing and the cell -> raster index.

use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::CellId;
use crate::error::{ExtractError, Result};
use crate::parse::parse_number;

/// One `id x y` line of the coordinate catalog
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellRecord {
    pub id: CellId,
    pub x: f64,
    pub y: f64,
}

impl CellRecord {
    fn from_line(line: &str) -> std::result::Result<Self, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(format!("expected `id x y`, found {} fields", tokens.len()));
        }
        let id = tokens[0]
            .parse::<CellId>()
            .map_err(|_| format!("cell id {:?} is not an integer", tokens[0]))?;
        let x = parse_number(tokens[1]).ok_or_else(|| format!("x {:?} is not a number", tokens[1]))?;
        let y = parse_number(tokens[2]).ok_or_else(|| format!("y {:?} is not a number", tokens[2]))?;
        Ok(CellRecord { id, x, y })
    }
}

/// Extent of all cell centres of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn from_records(records: &[CellRecord]) -> Option<Self> {
        let first = records.first()?;
        let init = BoundingBox {
            x_min: first.x,
            x_max: first.x,
            y_min: first.y,
            y_max: first.y,
        };
        Some(records.iter().fold(init, |b, r| BoundingBox {
            x_min: b.x_min.min(r.x),
            x_max: b.x_max.max(r.x),
            y_min: b.y_min.min(r.y),
            y_max: b.y_max.max(r.y),
        }))
    }

    /// Raster dimensions `(cols, rows)` covering the box at `resolution`.
    pub fn shape(&self, resolution: f64) -> (usize, usize) {
        let cols = ((self.x_max - self.x_min) / resolution).ceil() as usize + 1;
        let rows = ((self.y_max - self.y_min) / resolution).ceil() as usize + 1;
        (cols, rows)
    }
}

/// Maps each cell id to its raster `(column, row)`, row 0 being the northernmost.
///
/// Positions outside `[0, cols) x [0, rows)` are retained; use [`GridIndex::locate`]
/// to get only usable positions.
#[derive(Debug, Clone)]
pub struct GridIndex {
    cols: usize,
    rows: usize,
    resolution: f64,
    cells: HashMap<CellId, (i64, i64)>,
}

impl GridIndex {
    pub fn new(bbox: &BoundingBox, resolution: f64, records: &[CellRecord]) -> Self {
        let (cols, rows) = bbox.shape(resolution);
        let mut cells = HashMap::with_capacity(records.len());
        let mut out_of_range = 0usize;

        for record in records {
            let col = ((record.x - bbox.x_min) / resolution).floor() as i64;
            let raw_row = ((record.y - bbox.y_min) / resolution).floor() as i64;
            let row = rows as i64 - 1 - raw_row;
            if !in_range(col, row, cols, rows) {
                out_of_range += 1;
            }
            if cells.insert(record.id, (col, row)).is_some() {
                warn!("Cell {} appears more than once in the catalog", record.id);
            }
        }

        if out_of_range > 0 {
            warn!(
                "{} cells fall outside the {}x{} grid and will not be rasterised",
                out_of_range, cols, rows
            );
        }

        GridIndex {
            cols,
            rows,
            resolution,
            cells,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Raw `(column, row)` of a cell, possibly out of range
    pub fn get(&self, id: CellId) -> Option<(i64, i64)> {
        self.cells.get(&id).copied()
    }

    /// `(column, row)` of a cell if it lies inside the grid
    pub fn locate(&self, id: CellId) -> Option<(usize, usize)> {
        let (col, row) = self.get(id)?;
        in_range(col, row, self.cols, self.rows).then_some((col as usize, row as usize))
    }
}

fn in_range(col: i64, row: i64, cols: usize, rows: usize) -> bool {
    col >= 0 && row >= 0 && (col as usize) < cols && (row as usize) < rows
}

/// Read every record of a catalog. Blank lines are ignored.
pub fn read_catalog<R: BufRead>(reader: R, path: &Path) -> Result<Vec<CellRecord>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ExtractError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = CellRecord::from_line(&line).map_err(|reason| ExtractError::MalformedCatalog {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Raster cell sizes must be finite and positive.
pub fn check_resolution(resolution: f64) -> Result<()> {
    if resolution.is_finite() && resolution > 0.0 {
        Ok(())
    } else {
        Err(ExtractError::Config(format!(
            "resolution must be positive, got {}",
            resolution
        )))
    }
}

/// Build the bounding box and raster index of a coordinate catalog.
pub fn build_index(catalog_path: &Path, resolution: f64) -> Result<(BoundingBox, GridIndex)> {
    let file = File::open(catalog_path).map_err(|e| ExtractError::io(catalog_path, e))?;
    build_index_from_reader(BufReader::new(file), catalog_path, resolution)
}

pub fn build_index_from_reader<R: BufRead>(
    reader: R,
    path: &Path,
    resolution: f64,
) -> Result<(BoundingBox, GridIndex)> {
    check_resolution(resolution)?;
    let records = read_catalog(reader, path)?;
    let bbox = BoundingBox::from_records(&records).ok_or_else(|| ExtractError::MalformedCatalog {
        path: path.to_path_buf(),
        line: 0,
        reason: "catalog contains no cells".to_string(),
    })?;
    let index = GridIndex::new(&bbox, resolution, &records);
    info!(
        "Indexed {} cells into a {}x{} grid at resolution {}",
        index.len(),
        index.cols(),
        index.rows(),
        resolution
    );
    Ok((bbox, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Cursor;

    fn index(text: &str, resolution: f64) -> Result<(BoundingBox, GridIndex)> {
        build_index_from_reader(Cursor::new(text), Path::new("CADPTS.DAT"), resolution)
    }

    #[test]
    fn test_four_cell_catalog() {
        let (bbox, grid) = index("1 0 0\n2 250 0\n3 0 250\n4 250 250\n", 250.0).unwrap();
        assert_eq!(bbox.x_min, 0.0);
        assert_eq!(bbox.y_max, 250.0);
        assert_eq!((grid.cols(), grid.rows()), (2, 2));
        assert_eq!(grid.locate(1), Some((0, 1)));
        assert_eq!(grid.locate(2), Some((1, 1)));
        assert_eq!(grid.locate(3), Some((0, 0)));
        assert_eq!(grid.locate(4), Some((1, 0)));
        assert_eq!(grid.locate(5), None);
    }

    #[test]
    fn test_regular_grid_positions_are_unique() {
        let mut text = String::new();
        let mut id = 1;
        for i in 0..7 {
            for j in 0..5 {
                text.push_str(&format!("{} {} {}\n", id, 1000.0 + i as f64 * 250.0, 500.0 + j as f64 * 250.0));
                id += 1;
            }
        }
        let (_, grid) = index(&text, 250.0).unwrap();
        assert!(grid.cols() * grid.rows() >= grid.len());

        let positions: HashSet<_> = (1..id).filter_map(|id| grid.locate(id)).collect();
        assert_eq!(positions.len(), grid.len());
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let (_, grid) = index("\n1 10.0 20.0\n\n2 260.0 20.0\n", 250.0).unwrap();
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn test_short_line_is_malformed() {
        let err = index("1 0 0\n2 250\n", 250.0).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedCatalog { line: 2, .. }));
    }

    #[test]
    fn test_non_numeric_coordinate_is_malformed() {
        let err = index("1 0 abc\n", 250.0).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedCatalog { line: 1, .. }));
    }

    #[test]
    fn test_resolution_must_be_positive() {
        let text = "1 0 0\n2 250 0\n3 0 250\n4 250 250\n";
        for resolution in [0.0, -250.0, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(index(text, resolution), Err(ExtractError::Config(_))),
                "resolution {} accepted",
                resolution
            );
        }
    }

    #[test]
    fn test_empty_catalog_is_malformed() {
        assert!(matches!(
            index("", 250.0),
            Err(ExtractError::MalformedCatalog { .. })
        ));
    }
}
