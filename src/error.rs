//! Error taxonomy for the LOTTR pipeline.
//!
//! Configuration errors are raised before any computation, structural errors
//! abort the feed being processed. Missing measurements are not errors at all.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, LottrError>;

#[derive(Debug, thiserror::Error)]
pub enum LottrError {
    /// A requested percentile is outside `0..=100`.
    #[error("percentile {value} is out of range, q1 and q2 must be between 0 and 100")]
    PercentileOutOfRange { value: i32 },

    #[error("{}: missing required column `{column}`", .path.display())]
    MissingColumn { path: PathBuf, column: &'static str },

    /// A row has an empty join key (segment id or timestamp).
    #[error("{}:{line}: empty `{column}`", .path.display())]
    MissingKey {
        path: PathBuf,
        line: u64,
        column: &'static str,
    },

    #[error("{}:{line}: invalid timestamp `{value}`", .path.display())]
    InvalidTimestamp {
        path: PathBuf,
        line: u64,
        value: String,
    },

    #[error("{}:{line}: invalid number `{value}` in `{column}`", .path.display())]
    InvalidNumber {
        path: PathBuf,
        line: u64,
        column: &'static str,
        value: String,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LottrError {
    /// True for errors that stem from the shape or content of an input file.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            LottrError::MissingColumn { .. }
                | LottrError::MissingKey { .. }
                | LottrError::InvalidTimestamp { .. }
                | LottrError::InvalidNumber { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_error_message() {
        let err = LottrError::PercentileOutOfRange { value: 101 };
        assert_eq!(
            err.to_string(),
            "percentile 101 is out of range, q1 and q2 must be between 0 and 100"
        );
        assert!(!err.is_structural());
    }

    #[test]
    fn test_missing_column_is_structural() {
        let err = LottrError::MissingColumn {
            path: PathBuf::from("OHINT23.csv"),
            column: "tmc_code",
        };
        assert!(err.is_structural());
        assert_eq!(err.to_string(), "OHINT23.csv: missing required column `tmc_code`");
    }
}
