use std::path::PathBuf;
use std::time::Duration;

use crate::solver::SolutionStatus;

/// Errors returned while building, limiting or solving an allocation problem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A per-server or per-accelerator table disagrees with the problem size.
    #[error("inconsistent problem size: {table} should be {expected}, got {actual}")]
    SizeMismatch {
        table: &'static str,
        expected: String,
        actual: String,
    },

    /// A table entry lies outside its valid range.
    #[error("invalid {table}[{index}]: {value} ({reason})")]
    InvalidValue {
        table: &'static str,
        index: usize,
        value: f64,
        reason: &'static str,
    },

    /// A limited-mode table disagrees with the number of types or accelerators.
    #[error("inconsistent dimension: {table} should be {expected}, got {actual}")]
    Dimension {
        table: &'static str,
        expected: String,
        actual: String,
    },

    /// The solver finished without an optimal or suboptimal solution.
    #[error("solve failed; status={0}")]
    SolveFailed(SolutionStatus),

    #[error("the solver has timed out after {0:?}")]
    Timeout(Duration),

    /// The external engine could not be started or exited unsuccessfully.
    #[error("external engine failed: {0}")]
    ExternalProcess(String),

    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A replica or unit count does not fit the count type.
    #[error("{0} overflows a replica or unit count")]
    Overflow(String),

    /// The external engine's report could not be understood.
    #[error("malformed engine report: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The solution status recorded on the instance when a solve fails with this error.
    pub fn status(&self) -> SolutionStatus {
        match self {
            Error::SolveFailed(status) => *status,
            Error::Timeout(_) => SolutionStatus::Timeout,
            _ => SolutionStatus::Error,
        }
    }
}
