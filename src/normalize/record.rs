// src/normalize/record.rs
//
// Per-file orchestration: layout → event compression → filename metadata →
// derived ratios → identity join → schema enforcement. One call produces
// the full record set for one source file (or one legacy worksheet); a
// structural failure anywhere aborts that file only.

use crate::error::NormalizeError;
use crate::grid::RawGrid;
use crate::normalize::events::{compress_ranges, RangeSpec};
use crate::normalize::filename::{
    normalize_trial_id, parse_current, parse_legacy, reformat_shock_id, session_meta,
    split_worksheet_name, workbook_cohort,
};
use crate::normalize::identity::{attach_rfid, RosterIndex};
use crate::normalize::layout::{
    apply_coercions, clean_subject_label, coercion_rules, legacy_zero_cleanup, plan_coercions,
    promote_header, snake_headers, truncate_extra_columns, BOOKKEEPING_COLUMNS,
    SUBJECT_PROBE_ROW,
};
use crate::normalize::ratio::RatioTable;
use crate::normalize::{Drug, SessionKind, SessionMeta};
use crate::table::{RangeBound, Table, Value};
use chrono::NaiveTime;
use tracing::warn;

/// Fixed output column order per session kind.
pub const PR_COLUMNS: &[&str] = &[
    "rfid",
    "subject",
    "room",
    "cohort",
    "trial_id",
    "drug",
    "box",
    "start_time",
    "end_time",
    "start_date",
    "end_date",
    "breakpoint",
    "last_ratio",
    "ratios",
    "active_lever_presses",
    "inactive_lever_presses",
    "reward_presses",
];

pub const SELFADMIN_COLUMNS: &[&str] = &[
    "rfid",
    "subject",
    "room",
    "cohort",
    "trial_id",
    "drug",
    "box",
    "start_time",
    "end_time",
    "start_date",
    "end_date",
    "active_lever_presses",
    "inactive_lever_presses",
    "reward_presses",
    "timeout_presses",
    "active_timestamps",
    "inactive_timestamps",
    "reward_timestamps",
    "timeout_timestamps",
];

pub const SHOCK_COLUMNS: &[&str] = &[
    "rfid",
    "subject",
    "room",
    "cohort",
    "trial_id",
    "drug",
    "box",
    "start_time",
    "end_time",
    "start_date",
    "end_date",
    "total_active_lever_presses",
    "total_inactive_lever_presses",
    "total_shocks",
    "total_reward",
    "rewards_after_first_shock",
    "rewards_got_shock",
    "reward_timestamps",
];

pub fn output_columns(kind: SessionKind) -> &'static [&'static str] {
    match kind {
        SessionKind::ProgressiveRatio => PR_COLUMNS,
        SessionKind::SelfAdmin => SELFADMIN_COLUMNS,
        SessionKind::Shock => SHOCK_COLUMNS,
    }
}

/// Output CSV name for a current-format source (SelfAdmin names are
/// upper-cased on output, matching the destination convention).
pub fn output_name_current(kind: SessionKind, file_stem: &str) -> String {
    match kind {
        SessionKind::SelfAdmin => format!("{}.csv", file_stem.to_uppercase()),
        _ => format!("{}.csv", file_stem),
    }
}

/// Output CSV name for one legacy worksheet.
pub fn output_name_legacy(kind: SessionKind, workbook_stem: &str, worksheet: &str) -> String {
    let ws_stem = worksheet.split('.').next().unwrap_or(worksheet);
    match kind {
        SessionKind::ProgressiveRatio => format!("{}_transformed.csv", ws_stem),
        SessionKind::SelfAdmin => format!("{}.csv", ws_stem),
        SessionKind::Shock => {
            let prefix: String = workbook_stem.chars().take(3).collect();
            format!("{}_{}.csv", prefix, ws_stem)
        }
    }
}

fn ensure_column(table: &mut Table, name: &str, default: Value) {
    if table.col(name).is_none() {
        table.add_const_column(name, default);
    }
}

fn fill_column_nulls(table: &mut Table, name: &str, value: Value) {
    if let Some(c) = table.col(name) {
        for row in &mut table.rows {
            if row[c].is_null() {
                row[c] = value.clone();
            }
        }
    }
}

fn opt_int(v: Option<i64>) -> Value {
    v.map(Value::Int).unwrap_or(Value::Null)
}

/// Builds the normalized record set for one source. Holds only process-wide
/// read-only state; per-file state lives on the stack of each build call.
pub struct SessionBuilder<'a> {
    pub kind: SessionKind,
    pub drug: Drug,
    pub roster: &'a RosterIndex,
}

impl SessionBuilder<'_> {
    fn add_session_meta(&self, table: &mut Table, meta: &SessionMeta) {
        table.add_const_column(
            "room",
            meta.room.clone().map(Value::Text).unwrap_or(Value::Null),
        );
        table.add_const_column("cohort", Value::Int(meta.cohort));
        table.add_const_column("trial_id", Value::Text(meta.trial_id.clone()));
        table.add_const_column("drug", Value::Text(self.drug.label().to_string()));
    }

    /// Derive breakpoint and last_ratio from the final reward count. A
    /// sheet-carried last-ratio column is superseded by the derived one.
    fn add_breakpoints(&self, table: &mut Table) -> Result<(), NormalizeError> {
        let rc = table.require_col("reward_presses")?;
        let ratios = RatioTable::for_drug(self.drug);
        let mut bps = Vec::with_capacity(table.n_rows());
        let mut lrs = Vec::with_capacity(table.n_rows());
        for row in &table.rows {
            let (bp, lr) = ratios.resolve(row[rc].as_int());
            bps.push(opt_int(bp));
            lrs.push(opt_int(lr));
        }
        table.drop_columns(&["breakpoint", "last_ratio"]);
        table.push_column("breakpoint", bps);
        table.push_column("last_ratio", lrs);
        Ok(())
    }

    fn finish(
        &self,
        table: &mut Table,
        source: &str,
        sort_key: &str,
    ) -> Result<(), NormalizeError> {
        let unmatched = attach_rfid(table, "subject", self.roster)?;
        if !unmatched.is_empty() {
            warn!(
                source,
                dropped = unmatched.len(),
                subjects = ?unmatched,
                "subjects missing from roster; rows dropped"
            );
        }
        table.select_columns(output_columns(self.kind))?;
        table.dedup_rows();
        table.sort_by_column(sort_key);
        Ok(())
    }

    /// Normalize one current-format file.
    pub fn build_current(
        &self,
        mut grid: RawGrid,
        file_stem: &str,
    ) -> Result<Table, NormalizeError> {
        if self.kind != SessionKind::SelfAdmin {
            truncate_extra_columns(&mut grid, SUBJECT_PROBE_ROW);
        }
        let mut t = promote_header(&grid)?;
        t.require_col("Subject")?;
        t.drop_columns(BOOKKEEPING_COLUMNS);

        if self.kind == SessionKind::SelfAdmin {
            t.dedup_rows();
            // short sessions with no timeout presses omit the range entirely
            ensure_column(&mut t, "Timeout Press 1", Value::Int(0));
        }

        let plan = plan_coercions(&coercion_rules(self.kind), &t.headers);
        apply_coercions(&mut t, &plan, false);

        match self.kind {
            SessionKind::ProgressiveRatio => {
                compress_ranges(
                    &mut t,
                    &[RangeSpec {
                        start: "Reward 1",
                        bound: RangeBound::End,
                        output: "ratios",
                    }],
                )?;
                t.rename_column("Reward", "Reward Presses");
            }
            SessionKind::SelfAdmin => {
                compress_ranges(
                    &mut t,
                    &[
                        RangeSpec {
                            start: "Active 1",
                            bound: RangeBound::Before("Inactive 1"),
                            output: "Active Timestamps",
                        },
                        RangeSpec {
                            start: "Inactive 1",
                            bound: RangeBound::Before("Reward 1"),
                            output: "Inactive Timestamps",
                        },
                        RangeSpec {
                            start: "Reward 1",
                            bound: RangeBound::Before("Timeout Press 1"),
                            output: "Reward Timestamps",
                        },
                        RangeSpec {
                            start: "Timeout Press 1",
                            bound: RangeBound::End,
                            output: "Timeout Timestamps",
                        },
                    ],
                )?;
                t.rename_column("Reward", "Reward Presses");
                let a = t.require_col("Active Lever Presses")?;
                let r = t.require_col("Reward Presses")?;
                let timeouts: Vec<Value> = t
                    .rows
                    .iter()
                    .map(|row| match (row[a].as_int(), row[r].as_int()) {
                        (Some(active), Some(reward)) => Value::Int(active - reward),
                        _ => Value::Null,
                    })
                    .collect();
                t.push_column("Timeout Presses", timeouts);
            }
            SessionKind::Shock => {
                compress_ranges(
                    &mut t,
                    &[
                        RangeSpec {
                            start: "Reward # Got Shock 1",
                            bound: RangeBound::Before("Reward 1"),
                            output: "Rewards Got Shock",
                        },
                        RangeSpec {
                            start: "Reward 1",
                            bound: RangeBound::Through("Reward 201"),
                            output: "Reward Timestamps",
                        },
                    ],
                )?;
            }
        }

        let meta = session_meta(self.kind, parse_current(self.kind, file_stem)?);
        self.add_session_meta(&mut t, &meta);
        snake_headers(&mut t);
        if self.kind == SessionKind::ProgressiveRatio {
            self.add_breakpoints(&mut t)?;
        }
        self.finish(&mut t, file_stem, "box")?;
        Ok(t)
    }

    /// Normalize one worksheet of a legacy multi-session workbook.
    pub fn build_legacy(
        &self,
        grid: &RawGrid,
        workbook_stem: &str,
        worksheet: &str,
    ) -> Result<Table, NormalizeError> {
        let source = format!("{}:{}", workbook_stem, worksheet);
        let mut t = promote_header(grid)?;
        let id_col = t
            .headers
            .first()
            .cloned()
            .ok_or_else(|| NormalizeError::MalformedLayout("worksheet has no columns".into()))?;

        if self.kind == SessionKind::SelfAdmin {
            let c = 0;
            for row in &mut t.rows {
                if let Value::Text(s) = &row[c] {
                    row[c] = Value::Text(clean_subject_label(s));
                }
            }
        }

        legacy_zero_cleanup(&mut t);

        let aggregates = ["Active Lever Presses", "Inactive Lever Presses", "Reward"];
        let keep_prefixes: &[char] = match self.kind {
            SessionKind::ProgressiveRatio => &['V'],
            SessionKind::SelfAdmin => &['U', 'V', 'Y', 'T'],
            SessionKind::Shock => &[],
        };
        if !keep_prefixes.is_empty() {
            t.retain_columns(|h| {
                h == id_col
                    || aggregates.contains(&h)
                    || h.chars().next().map_or(false, |c| keep_prefixes.contains(&c))
            });
            for h in &mut t.headers {
                if *h != id_col && !aggregates.contains(&h.as_str()) {
                    *h = super::layout::expand_legacy_code(h);
                }
            }
        }

        if self.kind == SessionKind::Shock {
            let plan = plan_coercions(&coercion_rules(self.kind), &t.headers);
            apply_coercions(&mut t, &plan, true);
        }

        let wsname = split_worksheet_name(worksheet);
        let meta = match self.kind {
            SessionKind::Shock => {
                let cohort = workbook_cohort(workbook_stem)?;
                SessionMeta {
                    room: None,
                    cohort,
                    trial_id: reformat_shock_id(&wsname.info.to_uppercase(), cohort),
                }
            }
            _ => {
                let p = parse_legacy(self.kind, &wsname.info)?;
                SessionMeta {
                    room: None,
                    cohort: p.cohort,
                    trial_id: normalize_trial_id(&p.trial_token),
                }
            }
        };

        match self.kind {
            SessionKind::ProgressiveRatio => {
                let (start, end) = t.event_range("Reward 0", RangeBound::End)?;
                t.remove_column_span(start, end);
                t.add_const_column("ratios", Value::Null);
            }
            SessionKind::SelfAdmin => {
                let counts = compress_ranges(
                    &mut t,
                    &[
                        RangeSpec {
                            start: "Inactive 0",
                            bound: RangeBound::Before("Reward 0"),
                            output: "Inactive Timestamps",
                        },
                        RangeSpec {
                            start: "Reward 0",
                            bound: RangeBound::Before("Active 0"),
                            output: "Reward Timestamps",
                        },
                        RangeSpec {
                            start: "Active 0",
                            bound: RangeBound::Before("Timeout Press 1"),
                            output: "Active Timestamps",
                        },
                        RangeSpec {
                            start: "Timeout Press 1",
                            bound: RangeBound::End,
                            output: "Timeout Timestamps",
                        },
                    ],
                )?;
                // legacy sheets carry no timeout total; the trimmed length is it
                let timeouts: Vec<Value> = counts["Timeout Timestamps"]
                    .iter()
                    .map(|n| opt_int(n.map(|l| l as i64)))
                    .collect();
                t.push_column("Timeout Presses", timeouts);
            }
            SessionKind::Shock => {
                compress_ranges(
                    &mut t,
                    &[
                        RangeSpec {
                            start: "Reward # Got Shock 1",
                            bound: RangeBound::Before("Reward 1"),
                            output: "Rewards Got Shock",
                        },
                        RangeSpec {
                            start: "Reward 1",
                            bound: RangeBound::Before("Rewards After First Shock"),
                            output: "Reward Timestamps",
                        },
                    ],
                )?;
            }
        }

        t.rename_column("Reward", "Reward Presses");
        t.rename_column(&id_col, "Subject");
        self.add_session_meta(&mut t, &meta);
        ensure_column(&mut t, "Box", Value::Null);

        let ws_date = wsname.date.map(Value::Date).unwrap_or(Value::Null);
        match self.kind {
            SessionKind::Shock => {
                // sheet-carried start date/time win; the worksheet name
                // backfills sheets that never typed one
                ensure_column(&mut t, "Start Date", Value::Null);
                ensure_column(&mut t, "Start Time", Value::Time(NaiveTime::MIN));
                fill_column_nulls(&mut t, "Start Date", ws_date);
                t.add_const_column("End Date", Value::Null);
                t.add_const_column("End Time", Value::Time(NaiveTime::MIN));
            }
            _ => {
                t.add_const_column("Start Date", ws_date);
                t.add_const_column("Start Time", Value::Time(NaiveTime::MIN));
                t.add_const_column("End Date", Value::Null);
                t.add_const_column("End Time", Value::Time(NaiveTime::MIN));
            }
        }

        snake_headers(&mut t);
        if self.kind == SessionKind::ProgressiveRatio {
            self.add_breakpoints(&mut t)?;
        }

        let unmatched = attach_rfid(&mut t, "subject", self.roster)?;
        if !unmatched.is_empty() {
            warn!(
                source = %source,
                dropped = unmatched.len(),
                subjects = ?unmatched,
                "subjects missing from roster; rows dropped"
            );
        }
        let key = t.require_col("subject")?;
        t.fold_rows_by(key);
        t.select_columns(output_columns(self.kind))?;
        t.dedup_rows();
        t.sort_by_column("subject");
        Ok(t)
    }
}
