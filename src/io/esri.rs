//! ESRI ASCII grid rasters.
//!
//! ```text
//! ncols         4
//! nrows         6
//! xllcorner     0.0
//! yllcorner     0.0
//! cellsize      50.0
//! NODATA_value  -9
//! -9 -9 5 2
//! ...
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::catalog::BoundingBox;

/// Value of raster cells with no qualifying depth
pub const NODATA_VALUE: f64 = -9.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EsriHeader {
    pub ncols: usize,
    pub nrows: usize,
    pub xllcorner: f64,
    pub yllcorner: f64,
    pub cellsize: f64,
    pub nodata_value: f64,
}

impl EsriHeader {
    /// Header for a grid whose cell centres sit on the catalog points, so the
    /// lower-left corner is half a cell below and left of the bounding box.
    pub fn for_extent(bbox: &BoundingBox, resolution: f64) -> Self {
        let (ncols, nrows) = bbox.shape(resolution);
        let half = resolution / 2.0;
        EsriHeader {
            ncols,
            nrows,
            xllcorner: bbox.x_min - half,
            yllcorner: bbox.y_min - half,
            cellsize: resolution,
            nodata_value: NODATA_VALUE,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "ncols\t{}", self.ncols)?;
        writeln!(w, "nrows\t{}", self.nrows)?;
        writeln!(w, "xllcorner\t{}", self.xllcorner)?;
        writeln!(w, "yllcorner\t{}", self.yllcorner)?;
        writeln!(w, "cellsize\t{}", self.cellsize)?;
        writeln!(w, "NODATA_value\t{}", self.nodata_value)
    }

    /// Parse the six header lines of a raster.
    pub fn read_from<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut ncols = None;
        let mut nrows = None;
        let mut xllcorner = None;
        let mut yllcorner = None;
        let mut cellsize = None;
        let mut nodata_value = None;

        for line in reader.lines().take(6) {
            let line = line?;
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                return Err(invalid(format!("bad header line {:?}", line)));
            };
            match key.to_ascii_lowercase().as_str() {
                "ncols" => ncols = Some(parse_field::<usize>(key, value)?),
                "nrows" => nrows = Some(parse_field::<usize>(key, value)?),
                "xllcorner" => xllcorner = Some(parse_field::<f64>(key, value)?),
                "yllcorner" => yllcorner = Some(parse_field::<f64>(key, value)?),
                "cellsize" => cellsize = Some(parse_field::<f64>(key, value)?),
                "nodata_value" => nodata_value = Some(parse_field::<f64>(key, value)?),
                _ => return Err(invalid(format!("unknown header key {:?}", key))),
            }
        }

        Ok(EsriHeader {
            ncols: ncols.ok_or_else(|| invalid("missing ncols"))?,
            nrows: nrows.ok_or_else(|| invalid("missing nrows"))?,
            xllcorner: xllcorner.ok_or_else(|| invalid("missing xllcorner"))?,
            yllcorner: yllcorner.ok_or_else(|| invalid("missing yllcorner"))?,
            cellsize: cellsize.ok_or_else(|| invalid("missing cellsize"))?,
            nodata_value: nodata_value.ok_or_else(|| invalid("missing NODATA_value"))?,
        })
    }
}

fn parse_field<T: std::str::FromStr>(key: &str, value: &str) -> io::Result<T> {
    value
        .parse::<T>()
        .map_err(|_| invalid(format!("bad value {:?} for {}", value, key)))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// A rendered raster: header plus row-major cells, row 0 northernmost.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSnapshot {
    pub header: EsriHeader,
    cells: Vec<f64>,
}

impl GridSnapshot {
    /// All cells set to the header's NODATA value
    pub fn empty(header: EsriHeader) -> Self {
        GridSnapshot {
            cells: vec![header.nodata_value; header.ncols * header.nrows],
            header,
        }
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        (col < self.header.ncols)
            .then(|| self.cells.get(row * self.header.ncols + col).copied())
            .flatten()
    }

    pub fn set(&mut self, col: usize, row: usize, value: f64) {
        if col < self.header.ncols && row < self.header.nrows {
            self.cells[row * self.header.ncols + col] = value;
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.cells.chunks(self.header.ncols.max(1))
    }

    /// Number of cells holding a value other than NODATA
    pub fn filled(&self) -> usize {
        self.cells
            .iter()
            .filter(|v| **v != self.header.nodata_value)
            .count()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.write_to(w)?;
        for row in self.rows() {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(w, "{}", line.join(" "))?;
        }
        Ok(())
    }

    pub fn write_file(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()
    }
}

pub fn read_header_file(path: &Path) -> io::Result<EsriHeader> {
    EsriHeader::read_from(BufReader::new(File::open(path)?))
}
