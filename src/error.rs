use thiserror::Error;

/// Structural parse failures. Either one aborts the current file only; the
/// batch moves on to the next file. Identity misses and ratio-table domain
/// misses are per-row data outcomes, not errors, and never appear here.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Header/column-count assumptions violated: header promotion found no
    /// subject column, a named event-range bound is missing, or the bounds
    /// resolve out of order.
    #[error("malformed layout: {0}")]
    MalformedLayout(String),

    /// No filename grammar matched the source name.
    #[error("unparsable filename: {0}")]
    UnparsableFilename(String),
}
