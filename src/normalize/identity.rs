// src/normalize/identity.rs
//
// Subject label → RFID resolution. The roster index is built once per drug
// cohort before any session file is processed and is read-only afterwards.

use crate::error::NormalizeError;
use crate::grid::{Cell, RawGrid, Workbook};
use crate::normalize::Drug;
use crate::table::{Table, Value};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RosterRow {
    subject: String,
    rfid: i64,
}

/// Accumulated subject → RFID mapping. Duplicate labels across roster files
/// are tolerated: the first-seen entry wins.
#[derive(Debug, Default)]
pub struct RosterIndex {
    map: HashMap<String, i64>,
}

impl RosterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn insert_first_seen(&mut self, label: &str, rfid: i64) {
        self.map.entry(label.to_string()).or_insert(rfid);
    }

    pub fn resolve(&self, label: &str) -> Option<i64> {
        self.map.get(label).copied()
    }

    /// Accumulate one roster CSV (header row with `subject` and `rfid`
    /// columns). Returns the number of rows read.
    pub fn load_csv(&mut self, path: &Path) -> Result<usize> {
        let mut rdr = csv::Reader::from_path(path)
            .with_context(|| format!("opening roster {}", path.display()))?;
        let mut n = 0;
        for row in rdr.deserialize::<RosterRow>() {
            let row = row.with_context(|| format!("reading roster {}", path.display()))?;
            self.insert_first_seen(&row.subject, row.rfid);
            n += 1;
        }
        Ok(n)
    }

    /// Accumulate one decoded roster spreadsheet. The first grid row is the
    /// header; it must name `subject` and `rfid` columns.
    pub fn load_grid(&mut self, grid: &RawGrid) -> Result<usize, NormalizeError> {
        let header = grid
            .rows
            .first()
            .ok_or_else(|| NormalizeError::MalformedLayout("empty roster sheet".into()))?;
        let find = |name: &str| {
            header.iter().position(
                |c| matches!(c, Cell::Text(s) if s.trim().eq_ignore_ascii_case(name)),
            )
        };
        let subject_col = find("subject").ok_or_else(|| {
            NormalizeError::MalformedLayout("roster sheet has no subject column".into())
        })?;
        let rfid_col = find("rfid").ok_or_else(|| {
            NormalizeError::MalformedLayout("roster sheet has no rfid column".into())
        })?;

        let mut n = 0;
        for row in &grid.rows[1..] {
            let label = match row.get(subject_col) {
                Some(Cell::Text(s)) if !s.trim().is_empty() => s.trim().to_string(),
                _ => continue,
            };
            let rfid = match row.get(rfid_col) {
                Some(Cell::Int(i)) => *i,
                Some(Cell::Text(s)) => match s.trim().parse() {
                    Ok(i) => i,
                    Err(_) => continue,
                },
                _ => continue,
            };
            self.insert_first_seen(&label, rfid);
            n += 1;
        }
        Ok(n)
    }
}

/// Per-drug roster indexes, built once at startup.
#[derive(Debug, Default)]
pub struct Rosters {
    pub cocaine: RosterIndex,
    pub oxycodone: RosterIndex,
}

impl Rosters {
    pub fn for_drug(&self, drug: Drug) -> &RosterIndex {
        match drug {
            Drug::Cocaine => &self.cocaine,
            Drug::Oxycodone => &self.oxycodone,
        }
    }

    /// Load every roster file under `dir` (CSV or xlsx). The drug is read
    /// from the filename (`coc`/`oxy` marker); unmarked files are skipped
    /// with a warning.
    pub fn load_dir(dir: &Path) -> Result<Rosters> {
        let mut rosters = Rosters::default();
        for ext in ["csv", "xlsx"] {
            let pattern = format!("{}/**/*.{}", dir.display(), ext);
            for entry in glob::glob(&pattern).context("roster glob")? {
                let path = entry.context("roster dir entry")?;
                let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
                let index = match Drug::from_text(name) {
                    Some(Drug::Cocaine) => &mut rosters.cocaine,
                    Some(Drug::Oxycodone) => &mut rosters.oxycodone,
                    None => {
                        warn!(file = %path.display(), "roster file has no drug marker; skipping");
                        continue;
                    }
                };
                let n = if ext == "csv" {
                    index.load_csv(&path)?
                } else {
                    let grid = Workbook::open(&path)?.read_first_sheet()?;
                    index.load_grid(&grid)?
                };
                debug!(file = %path.display(), rows = n, "loaded roster");
            }
        }
        Ok(rosters)
    }
}

/// Join RFIDs onto a session table by subject label. Matched rows get an
/// `rfid` column; rows whose label is not in the roster are excluded from
/// the table, and their labels are returned so the caller can log the drop
/// rate instead of losing rows invisibly.
pub fn attach_rfid(
    table: &mut Table,
    subject_col: &str,
    index: &RosterIndex,
) -> Result<Vec<String>, NormalizeError> {
    let sc = table.require_col(subject_col)?;
    let mut unmatched = Vec::new();
    let mut kept = Vec::with_capacity(table.n_rows());
    let mut rfids = Vec::with_capacity(table.n_rows());
    for row in std::mem::take(&mut table.rows) {
        let label = match &row[sc] {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        };
        match index.resolve(&label) {
            Some(rfid) => {
                rfids.push(Value::Int(rfid));
                kept.push(row);
            }
            None => unmatched.push(label),
        }
    }
    table.rows = kept;
    table.push_column("rfid", rfids);
    Ok(unmatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn first_seen_wins_across_rosters() {
        let mut idx = RosterIndex::new();
        idx.insert_first_seen("F101", 933000000000001);
        idx.insert_first_seen("F101", 933000000000999);
        assert_eq!(idx.resolve("F101"), Some(933000000000001));
    }

    #[test]
    fn load_csv_reads_subject_rfid_pairs() {
        let mut f = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(f, "subject,rfid").unwrap();
        writeln!(f, "F101,933000000000001").unwrap();
        writeln!(f, "M202,933000000000002").unwrap();
        f.flush().unwrap();

        let mut idx = RosterIndex::new();
        assert_eq!(idx.load_csv(f.path()).unwrap(), 2);
        assert_eq!(idx.resolve("M202"), Some(933000000000002));
        assert_eq!(idx.resolve("F999"), None);
    }

    #[test]
    fn load_grid_finds_columns_case_insensitively() {
        let grid = RawGrid::new(vec![
            vec![
                Cell::Text("Cohort".into()),
                Cell::Text("Subject".into()),
                Cell::Text("RFID".into()),
            ],
            vec![
                Cell::Int(4),
                Cell::Text("F101".into()),
                Cell::Int(933000000000001),
            ],
            vec![Cell::Int(4), Cell::Empty, Cell::Int(933000000000044)],
        ]);
        let mut idx = RosterIndex::new();
        assert_eq!(idx.load_grid(&grid).unwrap(), 1);
        assert_eq!(idx.resolve("F101"), Some(933000000000001));
    }

    #[test]
    fn unmatched_subjects_are_dropped_and_reported() {
        let mut idx = RosterIndex::new();
        idx.insert_first_seen("F101", 7);
        let mut table = Table {
            headers: vec!["subject".into()],
            rows: vec![
                vec![Value::Text("F101".into())],
                vec![Value::Text("GHOST".into())],
            ],
        };
        let unmatched = attach_rfid(&mut table, "subject", &idx).unwrap();
        assert_eq!(unmatched, vec!["GHOST".to_string()]);
        assert_eq!(table.n_rows(), 1);
        // every surviving rfid comes from the roster
        let rc = table.col("rfid").unwrap();
        assert_eq!(*table.value(0, rc), Value::Int(7));
    }
}
