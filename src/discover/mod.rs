// src/discover/mod.rs
//
// Walks the export tree and decides, per workbook, how it will be read.
// Current-format workbooks live under a session-kind directory (PR / SHA /
// SHOCK) and hold one session each; legacy workbooks live under the OLD_SA
// subtree and hold one worksheet per session, classified by worksheet name.

use crate::normalize::{Drug, SessionKind};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One workbook scheduled for processing.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Current {
        path: PathBuf,
        kind: SessionKind,
        drug: Drug,
    },
    /// Multi-session workbook; each worksheet is classified individually.
    Legacy { path: PathBuf },
}

/// Filename markers for non-session exports (calibration runs, technician
/// scratch copies).
const EXCLUDED_MARKERS: &[&str] = &["DISSECT", "TEST", "PRETREAT", "BACKUP"];

fn excluded(name: &str) -> bool {
    let up = name.to_uppercase();
    EXCLUDED_MARKERS.iter().any(|m| up.contains(m))
}

/// Session kind from the directory path. SHOCK is checked first: shock
/// directory names also contain "PR" once upper-cased ("PRESHOCK").
fn kind_for_path(path: &Path) -> Option<SessionKind> {
    for comp in path.components() {
        let up = comp.as_os_str().to_string_lossy().to_uppercase();
        if up.contains("SHOCK") {
            return Some(SessionKind::Shock);
        }
        if up.contains("SHA") || up.contains("LGA") {
            return Some(SessionKind::SelfAdmin);
        }
        if up.contains("PR") {
            return Some(SessionKind::ProgressiveRatio);
        }
    }
    None
}

/// Legacy workbooks live under the OLD_SA subtree, except the shock-era
/// ones, which were left in place under SHOCK with an `sa` tag in the
/// workbook name ("C03_sa.xlsx").
fn is_legacy(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str().to_string_lossy().to_uppercase().contains("OLD_SA"))
    {
        return true;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map_or(false, |stem| {
            stem.to_uppercase().split('_').any(|tok| tok == "SA")
        })
}

/// Classify one legacy worksheet by name. Order matters for the same
/// reason as `kind_for_path`.
pub fn classify_sheet(name: &str) -> Option<SessionKind> {
    let up = name.to_uppercase();
    if up.contains("SHOCK") {
        Some(SessionKind::Shock)
    } else if up.contains("PR") || up.contains("TREATMENT") {
        Some(SessionKind::ProgressiveRatio)
    } else if up.contains("SHA") || up.contains("LGA") {
        Some(SessionKind::SelfAdmin)
    } else {
        None
    }
}

/// Enumerate every processable workbook under `root`.
pub fn discover(root: &Path) -> Result<Vec<Source>> {
    let pattern = format!("{}/**/*.xlsx", root.display());
    let mut sources = Vec::new();
    for entry in glob::glob(&pattern).context("source glob")? {
        let path = entry.context("source dir entry")?;
        let name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if excluded(&name) {
            debug!(file = %path.display(), "excluded by filename marker");
            continue;
        }
        if is_legacy(&path) {
            sources.push(Source::Legacy { path });
            continue;
        }
        // strip the root so markers in the input directory's own name
        // cannot classify every file under it
        let rel = path.strip_prefix(root).unwrap_or(&path);
        match kind_for_path(rel) {
            Some(kind) => {
                let drug = Drug::from_text(&name).unwrap_or(Drug::Cocaine);
                sources.push(Source::Current { path, kind, drug });
            }
            None => debug!(file = %path.display(), "no session-kind directory; skipped"),
        }
    }
    info!(count = sources.len(), root = %root.display(), "discovered workbooks");
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn discovery_partitions_current_and_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("PR").join("C04HSPR3_output.xlsx"));
        touch(&root.join("SHA").join("C05HSOXYLGA03_output.xlsx"));
        touch(&root.join("SHA").join("C05_TEST_output.xlsx"));
        touch(&root.join("OLD_SA").join("C03_sa.xlsx"));
        touch(&root.join("notes").join("summary.xlsx"));

        let mut found = discover(root).unwrap();
        found.sort_by_key(|s| match s {
            Source::Current { path, .. } | Source::Legacy { path } => path.clone(),
        });
        assert_eq!(found.len(), 3);
        assert!(matches!(
            &found[0],
            Source::Legacy { path } if path.ends_with("OLD_SA/C03_sa.xlsx")
        ));
        assert!(matches!(
            &found[1],
            Source::Current { kind: SessionKind::ProgressiveRatio, drug: Drug::Cocaine, .. }
        ));
        assert!(matches!(
            &found[2],
            Source::Current { kind: SessionKind::SelfAdmin, drug: Drug::Oxycodone, .. }
        ));
    }

    #[test]
    fn sa_tagged_workbook_under_shock_is_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("SHOCK").join("C03_sa.xlsx"));
        touch(&root.join("SHOCK").join("C02HSSHOCK-2.xlsx"));

        let mut found = discover(root).unwrap();
        found.sort_by_key(|s| match s {
            Source::Current { path, .. } | Source::Legacy { path } => path.clone(),
        });
        assert_eq!(found.len(), 2);
        assert!(matches!(
            &found[0],
            Source::Current { kind: SessionKind::Shock, .. }
        ));
        assert!(matches!(
            &found[1],
            Source::Legacy { path } if path.ends_with("SHOCK/C03_sa.xlsx")
        ));
    }

    #[test]
    fn shock_directories_classify_before_pr() {
        assert_eq!(
            kind_for_path(Path::new("SHOCK/C02HSSHOCK-2.xlsx")),
            Some(SessionKind::Shock)
        );
        assert_eq!(
            kind_for_path(Path::new("PR/C04HSPR3_output.xlsx")),
            Some(SessionKind::ProgressiveRatio)
        );
    }

    #[test]
    fn worksheet_classification_orders_shock_first() {
        assert_eq!(classify_sheet("PRESHOCK1_20190101"), Some(SessionKind::Shock));
        assert_eq!(
            classify_sheet("C04HSPR01_20180612"),
            Some(SessionKind::ProgressiveRatio)
        );
        assert_eq!(
            classify_sheet("C04HSSHA01_20180612"),
            Some(SessionKind::SelfAdmin)
        );
        assert_eq!(
            classify_sheet("C09HSTREATMENT1_20200101"),
            Some(SessionKind::ProgressiveRatio)
        );
        assert_eq!(classify_sheet("weights"), None);
    }
}
