use anyhow::Result;
use mednorm::{
    discover::{self, Source},
    grid::Workbook,
    history::RunGate,
    normalize::{
        identity::Rosters,
        record::{output_name_current, output_name_legacy, SessionBuilder},
        Drug, SessionKind,
    },
    sink,
};
use std::{env, fs, path::PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var(var).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();
    info!("startup");

    // ─── 2) configure dirs ───────────────────────────────────────────
    let in_dir = env_path("MEDNORM_IN", "raw");
    let out_dir = env_path("MEDNORM_OUT", "normalized");
    let roster_dir = env_path("MEDNORM_ROSTERS", "rosters");
    let manifest = env_path("MEDNORM_MANIFEST", "reprocess.csv");
    fs::create_dir_all(&out_dir)?;

    // ─── 3) load rosters + run gate ──────────────────────────────────
    let rosters = Rosters::load_dir(&roster_dir)?;
    info!(
        cocaine = rosters.cocaine.len(),
        oxycodone = rosters.oxycodone.len(),
        "rosters loaded"
    );
    let gate = RunGate::load(&out_dir, &manifest)?;

    // ─── 4) discover workbooks ───────────────────────────────────────
    let sources = discover::discover(&in_dir)?;
    if sources.is_empty() {
        info!("nothing to do; exit");
        return Ok(());
    }

    // ─── 5) process, one workbook at a time ──────────────────────────
    let mut written = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for source in sources {
        match source {
            Source::Current { path, kind, drug } => {
                let stem = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                let source_name = match path.file_name().and_then(|s| s.to_str()) {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                let name = output_name_current(kind, &stem);
                if !gate.should_process(kind, &name, &source_name) {
                    debug!(file = %path.display(), "output current; skipped");
                    skipped += 1;
                    continue;
                }
                let result = (|| -> Result<()> {
                    let mut wb = Workbook::open(&path)?;
                    let grid = wb.read_first_sheet()?;
                    let builder = SessionBuilder {
                        kind,
                        drug,
                        roster: rosters.for_drug(drug),
                    };
                    let table = builder.build_current(grid, &stem)?;
                    sink::write_csv(&table, &gate.output_path(kind, &name))
                })();
                match result {
                    Ok(()) => written += 1,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "failed; continuing");
                        failed += 1;
                    }
                }
            }

            Source::Legacy { path } => {
                let stem = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                let source_name = match path.file_name().and_then(|s| s.to_str()) {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                let mut wb = match Workbook::open(&path) {
                    Ok(wb) => wb,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "unreadable workbook; continuing");
                        failed += 1;
                        continue;
                    }
                };
                for sheet in wb.sheet_names().to_vec() {
                    let kind = match discover::classify_sheet(&sheet) {
                        Some(k) => k,
                        None => {
                            debug!(worksheet = %sheet, "unclassifiable worksheet; skipped");
                            continue;
                        }
                    };
                    let name = output_name_legacy(kind, &stem, &sheet);
                    if !gate.should_process(kind, &name, &source_name) {
                        debug!(worksheet = %sheet, "output current; skipped");
                        skipped += 1;
                        continue;
                    }
                    // legacy shock cohorts all ran cocaine; elsewhere the
                    // worksheet name carries the marker
                    let drug = match kind {
                        SessionKind::Shock => Drug::Cocaine,
                        _ => Drug::from_text(&sheet).unwrap_or(Drug::Cocaine),
                    };
                    let result = (|| -> Result<()> {
                        let grid = wb.read_sheet(&sheet)?;
                        let builder = SessionBuilder {
                            kind,
                            drug,
                            roster: rosters.for_drug(drug),
                        };
                        let table = builder.build_legacy(&grid, &stem, &sheet)?;
                        sink::write_csv(&table, &gate.output_path(kind, &name))
                    })();
                    match result {
                        Ok(()) => written += 1,
                        Err(e) => {
                            warn!(
                                file = %path.display(),
                                worksheet = %sheet,
                                error = %e,
                                "failed; continuing"
                            );
                            failed += 1;
                        }
                    }
                }
            }
        }
    }

    info!(written, skipped, failed, "run complete");
    Ok(())
}
