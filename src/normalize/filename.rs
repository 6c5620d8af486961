// src/normalize/filename.rs
//
// Recovers {room, cohort, trial} from filename text. Naming changed across
// eras and rooms: older files lead with a bare cohort token ("C05HS..."),
// newer ones with a room token ("MR21BC05HS..."). Each session kind gets an
// ordered grammar list tried in sequence; the first match wins.

use crate::error::NormalizeError;
use crate::normalize::{SessionKind, SessionMeta};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// One pattern grammar. `has_room` says whether group 1 is a room token.
struct Grammar {
    re: Regex,
    has_room: bool,
}

impl Grammar {
    fn new(pattern: &str, has_room: bool) -> Self {
        Self {
            re: Regex::new(pattern).expect("grammar pattern"),
            has_room,
        }
    }
}

static PR_GRAMMARS: Lazy<Vec<Grammar>> = Lazy::new(|| {
    vec![
        Grammar::new(
            r"^(C[0-9]{2})(?:HS)?(?:OXY)?((?:LGA|SHA|PR|TREATMENT)[0-9]+)_OUTPUT",
            false,
        ),
        Grammar::new(
            r"^([A-Z]+[0-9]+[A-Z0-9])(C[0-9]{2})(?:HS)?(?:COCAINE|COC|OXY)?((?:LGA|SHA|PR|TREATMENT)[0-9]+)_OUTPUT",
            true,
        ),
    ]
});

static SELFADMIN_GRAMMARS: Lazy<Vec<Grammar>> = Lazy::new(|| {
    vec![
        Grammar::new(r"^(C[0-9]{2})(?:HS)?(?:OXY)?((?:LGA|SHA)[0-9]{2})", false),
        Grammar::new(
            r"^([A-Z]+[0-9]+[A-Z0-9])(C[0-9]{2})(?:HS|4S)?(?:COCAINE|COC|OXY)?((?:LGA|SHA)[0-9]{2})",
            true,
        ),
    ]
});

static SHOCK_GRAMMARS: Lazy<Vec<Grammar>> = Lazy::new(|| {
    vec![
        Grammar::new(r"^(C[0-9]{2})HS((?:PRESHOCK|SHOCK)[0-9]*)", false),
        Grammar::new(
            r"^([A-Z]+[0-9]+[A-Z0-9])(C[0-9]{2})HS(?:COCAINE)?((?:PRESHOCK|SHOCK)[0-9]*)",
            true,
        ),
    ]
});

/// Legacy worksheet names carry no room token and sometimes no HS marker.
static LEGACY_PR_GRAMMAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(C[0-9]{2})HS(?:OXY)?((?:PR|TREATMENT)[0-9]+)").unwrap());
static LEGACY_SELFADMIN_GRAMMAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(C[0-9]{2})HS(?:OXY)?((?:LGA|SHA)[0-9]{2})").unwrap());

fn grammars(kind: SessionKind) -> &'static [Grammar] {
    match kind {
        SessionKind::ProgressiveRatio => &PR_GRAMMARS,
        SessionKind::SelfAdmin => &SELFADMIN_GRAMMARS,
        SessionKind::Shock => &SHOCK_GRAMMARS,
    }
}

fn parse_cohort(token: &str) -> Result<i64, NormalizeError> {
    token[1..]
        .parse()
        .map_err(|_| NormalizeError::UnparsableFilename(format!("bad cohort token {:?}", token)))
}

/// Raw groups recovered by a grammar, before trial-id normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    pub room: Option<String>,
    pub cohort: i64,
    pub trial_token: String,
}

/// Parse a current-format file stem. Shock filenames write a literal `-`
/// where a stage digit belongs; it reads as 0.
pub fn parse_current(kind: SessionKind, stem: &str) -> Result<ParsedName, NormalizeError> {
    let mut up = stem.to_uppercase();
    if kind == SessionKind::Shock {
        up = up.replace('-', "0");
    }
    for g in grammars(kind) {
        if let Some(caps) = g.re.captures(&up) {
            let (room, cohort_tok, trial) = if g.has_room {
                (
                    Some(caps[1].to_string()),
                    caps[2].to_string(),
                    caps[3].to_string(),
                )
            } else {
                (None, caps[1].to_string(), caps[2].to_string())
            };
            return Ok(ParsedName {
                room,
                cohort: parse_cohort(&cohort_tok)?,
                trial_token: trial,
            });
        }
    }
    Err(NormalizeError::UnparsableFilename(stem.to_string()))
}

/// Parse a legacy worksheet's info segment (PR and SelfAdmin kinds; legacy
/// shock takes its cohort from the workbook name instead).
pub fn parse_legacy(kind: SessionKind, worksheet: &str) -> Result<ParsedName, NormalizeError> {
    let up = worksheet.to_uppercase();
    let re: &Regex = match kind {
        SessionKind::ProgressiveRatio => &LEGACY_PR_GRAMMAR,
        SessionKind::SelfAdmin => &LEGACY_SELFADMIN_GRAMMAR,
        SessionKind::Shock => {
            return Err(NormalizeError::UnparsableFilename(format!(
                "legacy shock worksheet {:?} has no inline cohort",
                worksheet
            )))
        }
    };
    let caps = re
        .captures(&up)
        .ok_or_else(|| NormalizeError::UnparsableFilename(worksheet.to_string()))?;
    Ok(ParsedName {
        room: None,
        cohort: parse_cohort(&caps[1])?,
        trial_token: caps[2].to_string(),
    })
}

/// Zero-pad the numeric suffix of a trial token to two digits. Idempotent;
/// tokens with no digits pass through unchanged.
pub fn normalize_trial_id(token: &str) -> String {
    match token.find(|c: char| c.is_ascii_digit()) {
        None => token.to_string(),
        Some(i) => {
            let (name, num) = token.split_at(i);
            format!("{}{:0>2}", name, num)
        }
    }
}

/// Map a raw shock token to its canonical label. Cohorts 1-5 ran staged
/// shock intensities; later cohorts used one intensity regardless of stage.
pub fn reformat_shock_id(token: &str, cohort: i64) -> String {
    if token.contains("PRESHOCK") {
        return "PRESHOCK".to_string();
    }
    if (1..=5).contains(&cohort) {
        let stage: i64 = token
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(1);
        format!("SHOCK_V{}", stage)
    } else {
        "SHOCK_V3".to_string()
    }
}

/// Finalize session metadata for a parsed name.
pub fn session_meta(kind: SessionKind, parsed: ParsedName) -> SessionMeta {
    let trial_id = match kind {
        SessionKind::Shock => reformat_shock_id(&parsed.trial_token, parsed.cohort),
        _ => normalize_trial_id(&parsed.trial_token),
    };
    SessionMeta {
        room: parsed.room,
        cohort: parsed.cohort,
        trial_id,
    }
}

/// A legacy worksheet name split into its info segment and trailing
/// `YYYYMMDD` date.
#[derive(Debug, Clone, PartialEq)]
pub struct WorksheetName {
    pub info: String,
    pub date: Option<NaiveDate>,
}

/// Split on the worksheet's separator (`_` when present, else `-`); the
/// last segment is the session date.
pub fn split_worksheet_name(worksheet: &str) -> WorksheetName {
    let stem = worksheet.split('.').next().unwrap_or(worksheet);
    let sep = if stem.contains('_') {
        Some('_')
    } else if stem.contains('-') {
        Some('-')
    } else {
        None
    };
    match sep {
        None => WorksheetName {
            info: stem.to_string(),
            date: None,
        },
        Some(sep) => {
            let mut it = stem.rsplitn(2, sep);
            let date_tok = it.next().unwrap_or("");
            let info = it.next().unwrap_or(stem).to_string();
            WorksheetName {
                info,
                date: NaiveDate::parse_from_str(date_tok, "%Y%m%d").ok(),
            }
        }
    }
}

/// Cohort number from a legacy shock workbook stem ("C03_sa.xlsx" → 3).
pub fn workbook_cohort(stem: &str) -> Result<i64, NormalizeError> {
    let up = stem.to_uppercase();
    if !up.starts_with('C') {
        return Err(NormalizeError::UnparsableFilename(stem.to_string()));
    }
    // get(): non-ASCII in the name must parse-fail, not slice mid-char
    up.get(1..3)
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| NormalizeError::UnparsableFilename(stem.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_cohort_selfadmin_name_parses_without_room() {
        let p = parse_current(SessionKind::SelfAdmin, "C05HSLGA03_output").unwrap();
        assert_eq!(
            p,
            ParsedName {
                room: None,
                cohort: 5,
                trial_token: "LGA03".into()
            }
        );
        let meta = session_meta(SessionKind::SelfAdmin, p);
        assert_eq!(meta.trial_id, "LGA03");
        assert_eq!(meta.room, None);
        assert_eq!(meta.cohort, 5);
    }

    #[test]
    fn room_prefixed_pr_name_parses() {
        let p = parse_current(SessionKind::ProgressiveRatio, "MR21BC04HSCOCAINEPR3_output").unwrap();
        assert_eq!(p.room.as_deref(), Some("MR21B"));
        assert_eq!(p.cohort, 4);
        assert_eq!(p.trial_token, "PR3");
        assert_eq!(
            session_meta(SessionKind::ProgressiveRatio, p).trial_id,
            "PR03"
        );
    }

    #[test]
    fn oxy_marker_in_bare_pr_name_is_tolerated() {
        let p = parse_current(SessionKind::ProgressiveRatio, "C09HSOXYTREATMENT1_output").unwrap();
        assert_eq!(p.cohort, 9);
        assert_eq!(p.trial_token, "TREATMENT1");
    }

    #[test]
    fn shock_dash_reads_as_stage_zero_digit() {
        let p = parse_current(SessionKind::Shock, "C02HSSHOCK-2").unwrap();
        assert_eq!(p.trial_token, "SHOCK02");
        assert_eq!(session_meta(SessionKind::Shock, p).trial_id, "SHOCK_V2");
    }

    #[test]
    fn no_grammar_match_is_unparsable() {
        assert!(matches!(
            parse_current(SessionKind::SelfAdmin, "notes_final"),
            Err(NormalizeError::UnparsableFilename(_))
        ));
    }

    #[test]
    fn trial_id_normalization_is_idempotent() {
        assert_eq!(normalize_trial_id("PR3"), "PR03");
        assert_eq!(normalize_trial_id(&normalize_trial_id("PR3")), "PR03");
        assert_eq!(normalize_trial_id("LGA14"), "LGA14");
        assert_eq!(normalize_trial_id("PRESHOCK"), "PRESHOCK");
    }

    #[test]
    fn shock_ids_collapse_for_late_cohorts() {
        assert_eq!(reformat_shock_id("PRESHOCK1", 3), "PRESHOCK");
        assert_eq!(reformat_shock_id("SHOCK02", 3), "SHOCK_V2");
        assert_eq!(reformat_shock_id("SHOCK02", 8), "SHOCK_V3");
        assert_eq!(reformat_shock_id("SHOCK1", 1), "SHOCK_V1");
    }

    #[test]
    fn worksheet_names_split_on_underscore_then_dash() {
        let w = split_worksheet_name("PRESHOCK1_20190101");
        assert_eq!(w.info, "PRESHOCK1");
        assert_eq!(w.date, NaiveDate::from_ymd_opt(2019, 1, 1));

        let w = split_worksheet_name("C04HSSHA01-20180612");
        assert_eq!(w.info, "C04HSSHA01");
        assert_eq!(w.date, NaiveDate::from_ymd_opt(2018, 6, 12));

        assert_eq!(split_worksheet_name("C04HSSHA01").date, None);
    }

    #[test]
    fn legacy_selfadmin_worksheet_parses() {
        let p = parse_legacy(SessionKind::SelfAdmin, "C04HSOXYSHA05").unwrap();
        assert_eq!(p.cohort, 4);
        assert_eq!(p.trial_token, "SHA05");
    }

    #[test]
    fn workbook_cohort_reads_two_digits() {
        assert_eq!(workbook_cohort("C03_sa").unwrap(), 3);
        assert!(workbook_cohort("sa_old").is_err());
        assert!(workbook_cohort("C").is_err());
        // multi-byte characters after the C must error, not panic
        assert!(workbook_cohort("Cö3_sa").is_err());
    }
}
