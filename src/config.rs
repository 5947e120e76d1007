//! Solver configuration, read from YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::external::{
    DEFAULT_COMMAND, DEFAULT_DATA_FILE_NAME, DEFAULT_MODEL_FILE_NAME, DEFAULT_OUTPUT_FILE_NAME,
};

/// Deadline applied to a solve when the instance has no override.
pub const DEFAULT_SOLVER_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(rename = "timeoutSeconds", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Solve through an external engine instead of in-process.
    pub external: Option<ExternalConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalConfig {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(rename = "modelFile", default = "default_model_file")]
    pub model_file: PathBuf,
    #[serde(rename = "dataFile", default = "default_data_file")]
    pub data_file: PathBuf,
    #[serde(rename = "outputFile", default = "default_output_file")]
    pub output_file: PathBuf,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_SOLVER_TIMEOUT_SECS
}
fn default_command() -> String {
    DEFAULT_COMMAND.to_string()
}
fn default_model_file() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_FILE_NAME)
}
fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_FILE_NAME)
}
fn default_output_file() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_FILE_NAME)
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_SOLVER_TIMEOUT_SECS,
            external: None,
        }
    }
}

impl SolverConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// The configured deadline; zero falls back to the default.
    pub fn timeout(&self) -> Duration {
        match self.timeout_seconds {
            0 => Duration::from_secs(DEFAULT_SOLVER_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }
}
