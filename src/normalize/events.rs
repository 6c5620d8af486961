// src/normalize/events.rs
//
// Collapses a contiguous run of numbered event columns ("Active 1..Active N")
// into one serialized sequence column. Exports pad every run out to a fixed
// width with zeros; the padding is cut exactly once, so zeros interior to
// real data survive.

use crate::error::NormalizeError;
use crate::table::{RangeBound, Table, Value};
use std::collections::HashMap;

/// Right-trim trailing zeros. Not reapplied after serialization.
pub fn trim_trailing_zeros(mut seq: Vec<i64>) -> Vec<i64> {
    while seq.last() == Some(&0) {
        seq.pop();
    }
    seq
}

/// Space-joined serialization; an empty sequence is null, never "".
pub fn serialize(seq: &[i64]) -> Option<String> {
    if seq.is_empty() {
        None
    } else {
        Some(
            seq.iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// Inverse of `serialize` for a non-null field.
pub fn parse_sequence(s: &str) -> Vec<i64> {
    s.split_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect()
}

/// One event-column range to compress: the run starting at `start`, bounded
/// by `bound`, replaced by a serialized column named `output`.
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec<'a> {
    pub start: &'a str,
    pub bound: RangeBound<'a>,
    pub output: &'a str,
}

/// Extract one row's slice as a numeric sequence. Cells that are not
/// numeric are padding: a run with no numeric cell at all is an empty
/// sequence, otherwise non-numeric cells read as zero.
fn row_sequence(row: &[Value], start: usize, end: usize) -> Vec<i64> {
    let slice = &row[start..end];
    if !slice.iter().any(|v| v.as_int().is_some()) {
        return Vec::new();
    }
    let seq: Vec<i64> = slice.iter().map(|v| v.as_int().unwrap_or(0)).collect();
    trim_trailing_zeros(seq)
}

/// Compress every spec'd range. All bounds are resolved against the header
/// before any column moves, so `End`-bounded ranges never swallow the
/// serialized columns appended by earlier specs. Returns the trimmed length
/// per row for each output column (None where the sequence was empty), for
/// derived counts.
pub fn compress_ranges(
    table: &mut Table,
    specs: &[RangeSpec<'_>],
) -> Result<HashMap<String, Vec<Option<usize>>>, NormalizeError> {
    let mut spans = Vec::with_capacity(specs.len());
    for spec in specs {
        spans.push(table.event_range(spec.start, spec.bound)?);
    }

    // extract before mutating
    let mut counts = HashMap::new();
    let mut outputs: Vec<(String, Vec<Value>)> = Vec::with_capacity(specs.len());
    for (spec, &(start, end)) in specs.iter().zip(&spans) {
        let mut serialized = Vec::with_capacity(table.n_rows());
        let mut lens = Vec::with_capacity(table.n_rows());
        for row in &table.rows {
            let seq = row_sequence(row, start, end);
            lens.push(if seq.is_empty() { None } else { Some(seq.len()) });
            serialized.push(match serialize(&seq) {
                Some(s) => Value::Text(s),
                None => Value::Null,
            });
        }
        counts.insert(spec.output.to_string(), lens);
        outputs.push((spec.output.to_string(), serialized));
    }

    // remove spans right-to-left so earlier spans keep their indices
    let mut ordered: Vec<(usize, usize)> = spans;
    ordered.sort_by_key(|&(start, _)| std::cmp::Reverse(start));
    for (start, end) in ordered {
        table.remove_column_span(start, end);
    }

    for (name, values) in outputs {
        table.push_column(&name, values);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn trailing_zeros_trim_once_and_interior_zeros_survive() {
        assert_eq!(trim_trailing_zeros(vec![3, 5, 0, 0, 0]), vec![3, 5]);
        assert_eq!(trim_trailing_zeros(vec![3, 0, 5, 0]), vec![3, 0, 5]);
        assert_eq!(trim_trailing_zeros(vec![0, 0, 0, 0]), Vec::<i64>::new());
    }

    #[test]
    fn serialize_round_trips_trimmed_sequences() {
        let trimmed = trim_trailing_zeros(vec![12, 0, 47, 0, 0]);
        let s = serialize(&trimmed).unwrap();
        assert_eq!(s, "12 0 47");
        assert_eq!(parse_sequence(&s), trimmed);
        assert_eq!(serialize(&[]), None);
    }

    #[test]
    fn compress_replaces_range_with_serialized_column() {
        let mut t = table(
            &["Subject", "Active 1", "Active 2", "Active 3", "Box"],
            vec![vec![
                Value::Text("F101".into()),
                Value::Int(3),
                Value::Int(5),
                Value::Int(0),
                Value::Int(1),
            ]],
        );
        let counts = compress_ranges(
            &mut t,
            &[RangeSpec {
                start: "Active 1",
                bound: RangeBound::Before("Box"),
                output: "Active Timestamps",
            }],
        )
        .unwrap();
        assert_eq!(t.headers, vec!["Subject", "Box", "Active Timestamps"]);
        assert_eq!(t.rows[0][2], Value::Text("3 5".into()));
        assert_eq!(counts["Active Timestamps"], vec![Some(2)]);
    }

    #[test]
    fn all_zero_range_compresses_to_null() {
        let mut t = table(
            &["Subject", "Reward 1", "Reward 2"],
            vec![vec![Value::Text("F101".into()), Value::Int(0), Value::Int(0)]],
        );
        let counts = compress_ranges(
            &mut t,
            &[RangeSpec {
                start: "Reward 1",
                bound: RangeBound::End,
                output: "ratios",
            }],
        )
        .unwrap();
        assert_eq!(t.rows[0][1], Value::Null);
        assert_eq!(counts["ratios"], vec![None]);
    }

    #[test]
    fn non_numeric_placeholder_run_is_empty_not_an_error() {
        let mut t = table(
            &["Subject", "Reward 1", "Reward 2"],
            vec![vec![
                Value::Text("F101".into()),
                Value::Text("-".into()),
                Value::Null,
            ]],
        );
        let counts = compress_ranges(
            &mut t,
            &[RangeSpec {
                start: "Reward 1",
                bound: RangeBound::End,
                output: "ratios",
            }],
        )
        .unwrap();
        assert_eq!(t.rows[0][1], Value::Null);
        assert_eq!(counts["ratios"], vec![None]);
    }

    #[test]
    fn multiple_ranges_resolve_before_any_removal() {
        let mut t = table(
            &[
                "Subject",
                "Active 1",
                "Active 2",
                "Inactive 1",
                "Inactive 2",
            ],
            vec![vec![
                Value::Text("F101".into()),
                Value::Int(7),
                Value::Int(0),
                Value::Int(2),
                Value::Int(9),
            ]],
        );
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
                    bound: RangeBound::End,
                    output: "Inactive Timestamps",
                },
            ],
        )
        .unwrap();
        assert_eq!(
            t.headers,
            vec!["Subject", "Active Timestamps", "Inactive Timestamps"]
        );
        assert_eq!(t.rows[0][1], Value::Text("7".into()));
        assert_eq!(t.rows[0][2], Value::Text("2 9".into()));
    }

    #[test]
    fn missing_bound_is_malformed_layout() {
        let mut t = table(&["Subject"], vec![]);
        let err = compress_ranges(
            &mut t,
            &[RangeSpec {
                start: "Active 1",
                bound: RangeBound::End,
                output: "Active Timestamps",
            }],
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedLayout(_)));
    }
}
