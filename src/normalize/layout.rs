// src/normalize/layout.rs
//
// Layout reconstruction: turn a raw subject-major export into a typed,
// header-indexed table. Current exports put one metric per sheet row and one
// subject per sheet column; the first sheet column carries the metric names,
// so after transposition row 0 is the header.

use crate::error::NormalizeError;
use crate::grid::{Cell, RawGrid};
use crate::normalize::SessionKind;
use crate::table::{Table, Value};
use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

/// Sheet row whose cells hold one small integer per subject column (the box
/// number row). Used to detect extraneous trailing columns.
pub const SUBJECT_PROBE_ROW: usize = 6;

/// Housekeeping rows that carry no behavioral data once promoted to columns.
pub const BOOKKEEPING_COLUMNS: &[&str] = &["Filename", "Experiment", "Group", "MSN", "FR"];

/// Count distinct integers in the probe row. The true sheet width is that
/// count plus the metric-name column; anything past it is technician
/// scratch and gets cut.
pub fn subject_column_count(grid: &RawGrid, probe_row: usize) -> Option<usize> {
    let row = grid.rows.get(probe_row)?;
    let mut distinct: Vec<i64> = Vec::new();
    for cell in row {
        if let Cell::Int(i) = cell {
            if !distinct.contains(i) {
                distinct.push(*i);
            }
        }
    }
    if distinct.is_empty() {
        None
    } else {
        Some(distinct.len())
    }
}

/// Cut trailing columns beyond the probed subject count.
pub fn truncate_extra_columns(grid: &mut RawGrid, probe_row: usize) {
    if let Some(n) = subject_column_count(grid, probe_row) {
        if grid.width() > n + 1 {
            debug!(width = grid.width(), subjects = n, "truncating extra columns");
            grid.truncate_columns(n + 1);
        }
    }
}

fn cell_to_value(cell: Cell) -> Value {
    match cell {
        Cell::Empty => Value::Null,
        Cell::Int(i) => Value::Int(i),
        Cell::Float(f) => Value::Float(f),
        Cell::Text(s) => {
            let t = s.trim();
            if t.is_empty() {
                Value::Null
            } else {
                Value::Text(t.to_string())
            }
        }
        Cell::Bool(b) => Value::Int(b as i64),
        Cell::Date(d) => Value::Date(d),
        Cell::Time(t) => Value::Time(t),
        Cell::DateTime(dt) => Value::DateTime(dt),
    }
}

fn cell_to_header(cell: &Cell) -> String {
    match cell {
        Cell::Text(s) => s.trim().to_string(),
        Cell::Empty => String::new(),
        other => Value::to_string(&cell_to_value(other.clone())),
    }
}

/// Transpose the grid and promote the first post-transpose row as the
/// header. Fails when the grid is empty or the header row is all blank.
pub fn promote_header(grid: &RawGrid) -> Result<Table, NormalizeError> {
    let t = grid.transpose();
    let mut rows = t.rows.into_iter();
    let header_row = rows
        .next()
        .ok_or_else(|| NormalizeError::MalformedLayout("empty grid".into()))?;
    let headers: Vec<String> = header_row.iter().map(cell_to_header).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(NormalizeError::MalformedLayout(
            "header row is entirely blank".into(),
        ));
    }
    let mut table = Table::new(headers);
    for row in rows {
        let mut vals: Vec<Value> = row.into_iter().map(cell_to_value).collect();
        vals.resize(table.n_cols(), Value::Null);
        table.rows.push(vals);
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Column typing

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Integer,
    Date,
    Time,
    Keep,
}

/// One declarative typing rule: lowercased-header predicate → coercion.
pub struct ColumnRule {
    pub matches: fn(&str) -> bool,
    pub coercion: Coercion,
}

fn int_name_pr(name: &str) -> bool {
    name.contains("active") || name.contains("reward") || name == "box" || name == "last ratio"
}

fn int_name_selfadmin(name: &str) -> bool {
    name.contains("active")
        || name.contains("reward")
        || name.contains("timeout")
        || name == "box"
}

fn int_name_shock(name: &str) -> bool {
    name.contains("active")
        || name.contains("reward")
        || name == "box"
        || name == "total shocks"
        || name == "total reward"
}

fn date_name(name: &str) -> bool {
    name.contains("date")
}

fn time_name(name: &str) -> bool {
    name.contains("time") && !name.contains("timeout")
}

/// Rule table for a session kind, in evaluation order. First match wins;
/// unmatched columns pass through untyped.
pub fn coercion_rules(kind: SessionKind) -> Vec<ColumnRule> {
    let int_rule = match kind {
        SessionKind::ProgressiveRatio => int_name_pr,
        SessionKind::SelfAdmin => int_name_selfadmin,
        SessionKind::Shock => int_name_shock,
    };
    vec![
        ColumnRule {
            matches: int_rule,
            coercion: Coercion::Integer,
        },
        ColumnRule {
            matches: date_name,
            coercion: Coercion::Date,
        },
        ColumnRule {
            matches: time_name,
            coercion: Coercion::Time,
        },
    ]
}

/// Evaluate the rule table once against the realized header.
pub fn plan_coercions(rules: &[ColumnRule], headers: &[String]) -> Vec<Coercion> {
    headers
        .iter()
        .map(|h| {
            let name = h.to_lowercase();
            rules
                .iter()
                .find(|r| (r.matches)(&name))
                .map(|r| r.coercion)
                .unwrap_or(Coercion::Keep)
        })
        .collect()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S").ok()
}

fn coerce_value(v: &Value, how: Coercion, legacy: bool) -> Value {
    match how {
        Coercion::Keep => v.clone(),
        Coercion::Integer => match v {
            // null-safe: a blank cell stays null, never 0
            Value::Null => Value::Null,
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Int(*f as i64),
            Value::Text(s) => s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null),
            other => other.clone(),
        },
        Coercion::Date => match v {
            Value::Date(d) => Value::Date(*d),
            Value::DateTime(dt) => Value::Date(dt.date()),
            Value::Text(s) => parse_date(s.trim()).map(Value::Date).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Coercion::Time => match v {
            Value::Time(t) => Value::Time(*t),
            Value::DateTime(dt) => Value::Time(dt.time()),
            Value::Text(s) => match parse_time(s.trim()) {
                Some(t) => Value::Time(t),
                None if legacy => Value::Time(NaiveTime::MIN),
                None => Value::Null,
            },
            // legacy sheets hold times as free text; anything else defaults
            // to midnight there and to null in current sheets
            _ if legacy => Value::Time(NaiveTime::MIN),
            _ => Value::Null,
        },
    }
}

/// Apply a coercion plan in place.
pub fn apply_coercions(table: &mut Table, plan: &[Coercion], legacy: bool) {
    for row in &mut table.rows {
        for (c, how) in plan.iter().enumerate() {
            if *how != Coercion::Keep {
                row[c] = coerce_value(&row[c], *how, legacy);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Legacy-sheet handling

/// Legacy exports write 0 into blank cells. Replace literal zeros with null,
/// drop columns that become all-null, then re-fill the remaining nulls with
/// 0 so real padding survives for the event trimmer.
pub fn legacy_zero_cleanup(table: &mut Table) {
    for row in &mut table.rows {
        for v in row.iter_mut() {
            if matches!(v, Value::Int(0)) || matches!(v, Value::Float(f) if *f == 0.0) {
                *v = Value::Null;
            }
        }
    }
    let all_null: Vec<String> = (0..table.n_cols())
        .filter(|&c| !table.rows.is_empty() && table.column_values(c).all(Value::is_null))
        .map(|c| table.headers[c].clone())
        .collect();
    let names: Vec<&str> = all_null.iter().map(String::as_str).collect();
    table.drop_columns(&names);
    for row in &mut table.rows {
        for v in row.iter_mut() {
            if v.is_null() {
                *v = Value::Int(0);
            }
        }
    }
}

/// Expand the legacy single-letter event-column codes into the current
/// naming ("Y1" → "Active 1"). Checked in the original's order.
pub fn expand_legacy_code(name: &str) -> String {
    if name.contains('Y') {
        name.replace('Y', "Active ")
    } else if name.contains('U') {
        name.replace('U', "Inactive ")
    } else if name.contains('V') {
        name.replace('V', "Reward ")
    } else {
        name.to_string()
    }
}

/// Normalize a legacy subject label: uppercase, cut at the sex marker
/// (`M` preferred over `F` when both appear), strip any `.`-suffix.
pub fn clean_subject_label(label: &str) -> String {
    let up = label.to_uppercase();
    let marker = if up.contains('M') {
        Some('M')
    } else if up.contains('F') {
        Some('F')
    } else {
        None
    };
    match marker.and_then(|m| up.find(m)) {
        Some(idx) => up[idx..].split('.').next().unwrap_or("").to_string(),
        None => up,
    }
}

/// Lowercase every header and replace spaces with underscores. Final step
/// before schema enforcement.
pub fn snake_headers(table: &mut Table) {
    for h in &mut table.headers {
        *h = h.to_lowercase().replace(' ', "_");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn promote_header_transposes_metric_major_sheets() {
        // sheet: metric names down column A, one subject per later column
        let grid = RawGrid::new(vec![
            vec![text("Subject"), text("F101"), text("F102")],
            vec![text("Box"), Cell::Int(1), Cell::Int(2)],
        ]);
        let t = promote_header(&grid).unwrap();
        assert_eq!(t.headers, vec!["Subject", "Box"]);
        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.rows[0][0], Value::Text("F101".into()));
        assert_eq!(t.rows[1][1], Value::Int(2));
    }

    #[test]
    fn promote_header_rejects_blank_header() {
        let grid = RawGrid::new(vec![
            vec![Cell::Empty, Cell::Int(1)],
            vec![Cell::Empty, Cell::Int(2)],
        ]);
        assert!(matches!(
            promote_header(&grid),
            Err(NormalizeError::MalformedLayout(_))
        ));
    }

    #[test]
    fn probe_counts_distinct_integers_only() {
        let mut rows = vec![vec![Cell::Empty; 6]; 6];
        rows.push(vec![
            text("Box"),
            Cell::Int(1),
            Cell::Int(2),
            Cell::Int(2),
            text("note"),
        ]);
        let grid = RawGrid::new(rows);
        assert_eq!(subject_column_count(&grid, SUBJECT_PROBE_ROW), Some(2));
    }

    #[test]
    fn truncate_extra_columns_cuts_past_probe_count() {
        let mut rows = vec![vec![Cell::Empty; 5]; 6];
        rows.push(vec![text("Box"), Cell::Int(4), Cell::Int(7), text("x"), text("y")]);
        let mut grid = RawGrid::new(rows);
        truncate_extra_columns(&mut grid, SUBJECT_PROBE_ROW);
        assert_eq!(grid.width(), 3);
    }

    #[test]
    fn coercion_plan_matches_first_rule() {
        let rules = coercion_rules(SessionKind::SelfAdmin);
        let headers = vec![
            "Active Lever Presses".to_string(),
            "Start Date".to_string(),
            "Start Time".to_string(),
            "Timeout Press 1".to_string(),
            "Subject".to_string(),
        ];
        let plan = plan_coercions(&rules, &headers);
        assert_eq!(
            plan,
            vec![
                Coercion::Integer,
                Coercion::Date,
                Coercion::Time,
                Coercion::Integer, // timeout hits the int rule before the time rule
                Coercion::Keep,
            ]
        );
    }

    #[test]
    fn integer_coercion_is_null_safe() {
        assert_eq!(
            coerce_value(&Value::Null, Coercion::Integer, false),
            Value::Null
        );
        assert_eq!(
            coerce_value(&Value::Float(3.0), Coercion::Integer, false),
            Value::Int(3)
        );
        assert_eq!(
            coerce_value(&Value::Text("17".into()), Coercion::Integer, false),
            Value::Int(17)
        );
    }

    #[test]
    fn datetime_cells_narrow_by_column_context() {
        let dt = NaiveDate::from_ymd_opt(2021, 3, 4)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        let v = Value::DateTime(dt);
        // a date column realized as a true datetime keeps its date half
        assert_eq!(
            coerce_value(&v, Coercion::Date, false),
            Value::Date(dt.date())
        );
        assert_eq!(
            coerce_value(&v, Coercion::Time, false),
            Value::Time(dt.time())
        );
    }

    #[test]
    fn time_coercion_defaults_to_midnight_only_in_legacy() {
        let bad = Value::Text("n/a".into());
        assert_eq!(coerce_value(&bad, Coercion::Time, false), Value::Null);
        assert_eq!(
            coerce_value(&bad, Coercion::Time, true),
            Value::Time(NaiveTime::MIN)
        );
    }

    #[test]
    fn legacy_zero_cleanup_drops_dead_columns_and_refills() {
        let mut table = Table {
            headers: vec!["Subject".into(), "dead".into(), "Reward 1".into()],
            rows: vec![
                vec![Value::Text("F1".into()), Value::Int(0), Value::Int(5)],
                vec![Value::Text("F2".into()), Value::Int(0), Value::Int(0)],
            ],
        };
        legacy_zero_cleanup(&mut table);
        assert_eq!(table.headers, vec!["Subject", "Reward 1"]);
        // interior zero restored as padding, not left null
        assert_eq!(table.rows[1][1], Value::Int(0));
    }

    #[test]
    fn legacy_codes_expand_in_order() {
        assert_eq!(expand_legacy_code("Y3"), "Active 3");
        assert_eq!(expand_legacy_code("U12"), "Inactive 12");
        assert_eq!(expand_legacy_code("V0"), "Reward 0");
        assert_eq!(expand_legacy_code("Timeout Press 1"), "Timeout Press 1");
    }

    #[test]
    fn subject_labels_cut_at_sex_marker() {
        assert_eq!(clean_subject_label("lever F101.2"), "F101");
        assert_eq!(clean_subject_label("M202"), "M202");
        assert_eq!(clean_subject_label("box4 M17.xls"), "M17");
    }
}
