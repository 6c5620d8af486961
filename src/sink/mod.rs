// src/sink/mod.rs

use crate::table::Table;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Write a finished session table as CSV. Nulls render as empty fields,
/// dates as `YYYY-MM-DD`, times as `HH:MM:SS`.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating output {}", path.display()))?;
    wtr.write_record(&table.headers)
        .with_context(|| format!("writing header to {}", path.display()))?;
    for row in &table.rows {
        wtr.write_record(row.iter().map(|v| v.to_string()))
            .with_context(|| format!("writing row to {}", path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    info!(path = %path.display(), rows = table.n_rows(), "wrote output");
    Ok(())
}
