// src/grid/mod.rs
//
// Boundary with the spreadsheet decoder. Everything past this module sees
// only `RawGrid`; calamine types do not leak into the normalization code.

use anyhow::{Context, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::path::Path;

/// One decoded spreadsheet cell. Numeric cells keep their integer/float
/// distinction because the layout normalizer's subject probe counts distinct
/// integers specifically.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

/// An ordered grid of cells exactly as exported. Rows and columns carry no
/// names until the layout normalizer promotes a header.
#[derive(Debug, Clone, Default)]
pub struct RawGrid {
    pub rows: Vec<Vec<Cell>>,
}

impl RawGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column count of the widest row.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Swap rows and columns, padding short rows with `Cell::Empty`.
    pub fn transpose(&self) -> RawGrid {
        let width = self.width();
        let mut out = Vec::with_capacity(width);
        for c in 0..width {
            let mut row = Vec::with_capacity(self.rows.len());
            for r in &self.rows {
                row.push(r.get(c).cloned().unwrap_or(Cell::Empty));
            }
            out.push(row);
        }
        RawGrid::new(out)
    }

    /// Keep only the first `n` columns of every row.
    pub fn truncate_columns(&mut self, n: usize) {
        for row in &mut self.rows {
            row.truncate(n);
        }
    }
}

fn convert(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) => {
            // xlsx stores every number as a float; recover integers so the
            // subject probe and integer coercion see them as such
            if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                Cell::Int(*f as i64)
            } else {
                Cell::Float(*f)
            }
        }
        Data::String(s) => Cell::Text(s.clone()),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            // time-only cells sit on the epoch day
            Some(ndt) if ndt.date() == NaiveDate::from_ymd_opt(1899, 12, 31).unwrap() => {
                Cell::Time(ndt.time())
            }
            Some(ndt) if ndt.time().num_seconds_from_midnight() == 0 => Cell::Date(ndt.date()),
            // both halves real; the column's coercion picks the one it wants
            Some(ndt) => Cell::DateTime(ndt),
            None => Cell::Empty,
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

/// calamine-backed workbook reader.
pub struct Workbook {
    inner: Xlsx<std::io::BufReader<std::fs::File>>,
    sheet_names: Vec<String>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self> {
        let inner: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("opening workbook {}", path.display()))?;
        // snapshot the names up front; reads below take &mut self
        let sheet_names = inner.sheet_names().to_vec();
        Ok(Self { inner, sheet_names })
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// Decode one worksheet into a grid.
    pub fn read_sheet(&mut self, name: &str) -> Result<RawGrid> {
        let range = self
            .inner
            .worksheet_range(name)
            .with_context(|| format!("reading worksheet {:?}", name))?;
        let rows = range
            .rows()
            .map(|r| r.iter().map(convert).collect())
            .collect();
        Ok(RawGrid::new(rows))
    }

    /// Decode the first worksheet (current-format files carry exactly one).
    pub fn read_first_sheet(&mut self) -> Result<RawGrid> {
        let name = self
            .sheet_names
            .first()
            .cloned()
            .context("workbook has no worksheets")?;
        self.read_sheet(&name)
    }
}
