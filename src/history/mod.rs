// src/history/mod.rs
//
// Incremental-run gate. A source is skipped when its output CSV already
// exists, unless the reprocess manifest names that source workbook. The
// manifest is a one-column CSV (`files` header) maintained by hand when
// upstream fixes require regenerating specific files.

use crate::normalize::SessionKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ManifestRow {
    files: String,
}

/// Decides, per output name, whether a source still needs processing.
#[derive(Debug)]
pub struct RunGate {
    out_dir: PathBuf,
    redo: HashSet<String>,
}

impl RunGate {
    /// Load the gate. A missing manifest file means nothing is forced; a
    /// malformed one is an error (silently redoing nothing would mask it).
    pub fn load(out_dir: &Path, manifest: &Path) -> Result<RunGate> {
        let mut redo = HashSet::new();
        if manifest.exists() {
            let mut rdr = csv::Reader::from_path(manifest)
                .with_context(|| format!("opening manifest {}", manifest.display()))?;
            for row in rdr.deserialize::<ManifestRow>() {
                let row =
                    row.with_context(|| format!("reading manifest {}", manifest.display()))?;
                redo.insert(row.files);
            }
            info!(entries = redo.len(), "loaded reprocess manifest");
        } else {
            debug!(manifest = %manifest.display(), "no reprocess manifest");
        }
        Ok(RunGate {
            out_dir: out_dir.to_path_buf(),
            redo,
        })
    }

    /// Destination path for one output CSV, partitioned by session kind.
    pub fn output_path(&self, kind: SessionKind, name: &str) -> PathBuf {
        self.out_dir.join(kind.dir()).join(name)
    }

    /// True when the output is absent or the *source* workbook is listed
    /// for reprocessing. Manifest entries name sources ("C05HSLGA03_output.xlsx"),
    /// not the derived output CSVs.
    pub fn should_process(&self, kind: SessionKind, output_name: &str, source_name: &str) -> bool {
        self.redo.contains(source_name) || !self.output_path(kind, output_name).exists()
    }
}
