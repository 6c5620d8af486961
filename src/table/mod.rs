// src/table/mod.rs

use crate::error::NormalizeError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::cmp::Ordering;
use std::fmt;

/// One typed field of a session table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    /// A cell carrying both halves; column coercion narrows it to the one
    /// the schema wants.
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering used for row sorts: nulls last, numerics by value, the rest
    /// by rendered text.
    fn cmp_for_sort(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Upper bound of a named event-column range.
#[derive(Debug, Clone, Copy)]
pub enum RangeBound<'a> {
    /// Up to but not including the named column.
    Before(&'a str),
    /// Up to and including the named column.
    Through(&'a str),
    /// Through the last column of the table.
    End,
}

/// A header-indexed table of typed rows. This is the only shape the
/// normalization passes operate on; it exists for one file's lifetime.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.headers.len()
    }

    pub fn col(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_col(&self, name: &str) -> Result<usize, NormalizeError> {
        self.col(name).ok_or_else(|| {
            NormalizeError::MalformedLayout(format!("expected column {:?} not found", name))
        })
    }

    pub fn value(&self, row: usize, col: usize) -> &Value {
        &self.rows[row][col]
    }

    pub fn column_values(&self, col: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |r| &r[col])
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(i) = self.col(from) {
            self.headers[i] = to.to_string();
        }
    }

    /// Append a constant-valued column.
    pub fn add_const_column(&mut self, name: &str, value: Value) {
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    /// Append a column from per-row values. Length must match the row count.
    pub fn push_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.headers.push(name.to_string());
        for (row, v) in self.rows.iter_mut().zip(values) {
            row.push(v);
        }
    }

    /// Drop the named columns where present; absent names are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self
            .headers
            .iter()
            .map(|h| !names.contains(&h.as_str()))
            .collect();
        self.retain_by_mask(&keep);
    }

    /// Keep only the columns whose header satisfies `pred`.
    pub fn retain_columns<F: Fn(&str) -> bool>(&mut self, pred: F) {
        let keep: Vec<bool> = self.headers.iter().map(|h| pred(h)).collect();
        self.retain_by_mask(&keep);
    }

    fn retain_by_mask(&mut self, keep: &[bool]) {
        let mut i = 0;
        self.headers.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
        for row in &mut self.rows {
            let mut i = 0;
            row.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }
    }

    /// Resolve a named column span against the realized header. Fails with
    /// MalformedLayout when a bound is missing or the bounds are inverted,
    /// never by slicing at a wrong index.
    pub fn event_range(
        &self,
        from: &str,
        bound: RangeBound<'_>,
    ) -> Result<(usize, usize), NormalizeError> {
        let start = self.require_col(from)?;
        let end = match bound {
            RangeBound::Before(name) => self.require_col(name)?,
            RangeBound::Through(name) => self.require_col(name)? + 1,
            RangeBound::End => self.n_cols(),
        };
        if end < start {
            return Err(NormalizeError::MalformedLayout(format!(
                "event range starting at {:?} resolves out of order ({}..{})",
                from, start, end
            )));
        }
        Ok((start, end))
    }

    /// Remove the half-open column span `start..end`.
    pub fn remove_column_span(&mut self, start: usize, end: usize) {
        self.headers.drain(start..end);
        for row in &mut self.rows {
            row.drain(start..end);
        }
    }

    /// Remove rows that are exact duplicates of an earlier row.
    pub fn dedup_rows(&mut self) {
        let mut seen: Vec<Vec<Value>> = Vec::new();
        self.rows.retain(|row| {
            if seen.iter().any(|s| s == row) {
                false
            } else {
                seen.push(row.clone());
                true
            }
        });
    }

    /// Stable sort by the named column, nulls last. Missing column is a
    /// no-op (legacy sheets do not always carry a box column).
    pub fn sort_by_column(&mut self, name: &str) {
        if let Some(c) = self.col(name) {
            self.rows.sort_by(|a, b| a[c].cmp_for_sort(&b[c]));
        }
    }

    /// Project onto the named columns in the given order. Every name must be
    /// present; this is the final schema enforcement step.
    pub fn select_columns(&mut self, order: &[&str]) -> Result<(), NormalizeError> {
        let idx: Vec<usize> = order
            .iter()
            .map(|n| self.require_col(n))
            .collect::<Result<_, _>>()?;
        self.rows = self
            .rows
            .iter()
            .map(|row| idx.iter().map(|&i| row[i].clone()).collect())
            .collect();
        self.headers = order.iter().map(|s| s.to_string()).collect();
        Ok(())
    }

    /// Merge rows sharing the value of the key column into one row: the
    /// first row's values win, except that a later row's differing text
    /// value is appended comma-joined. Reconciles multiple technician
    /// entries per subject in legacy exit/tail sheets.
    pub fn fold_rows_by(&mut self, key: usize) {
        let mut folded: Vec<Vec<Value>> = Vec::new();
        for row in std::mem::take(&mut self.rows) {
            match folded.iter_mut().find(|f| f[key] == row[key]) {
                None => folded.push(row),
                Some(base) => {
                    for (c, incoming) in row.into_iter().enumerate() {
                        if c == key {
                            continue;
                        }
                        match (&mut base[c], incoming) {
                            (Value::Text(held), Value::Text(new)) if *held != new => {
                                held.push_str(", ");
                                held.push_str(&new);
                            }
                            (slot @ Value::Null, new) if !new.is_null() => *slot = new,
                            _ => {}
                        }
                    }
                }
            }
        }
        self.rows = folded;
    }
}
