//! Solving through an external optimization engine.
//!
//! The problem is written as a textual data file, the engine is run as a subprocess against a
//! model file written in its own modeling language, and the replica matrix is read back from
//! the engine's textual report.

use std::fmt::{Display, Write as _};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, info};

use crate::config::ExternalConfig;
use crate::decode::{self, Decoding};
use crate::error::{Error, Result};
use crate::problem::{Limits, Outcome, ProblemData};
use crate::solver::{Bounded, SolutionStatus};

pub const DEFAULT_COMMAND: &str = "oplrun";
pub const DEFAULT_MODEL_FILE_NAME: &str = "accelplan.mod";
pub const DEFAULT_DATA_FILE_NAME: &str = "data.dat";
pub const DEFAULT_OUTPUT_FILE_NAME: &str = "out.txt";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

static OBJECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*OBJECTIVE:\s*(\S+)").expect("valid regex"));
static NUM_REPLICAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*numReplicas\s*=").expect("valid regex"));
static SOLUTION_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^//\s*solution\s*\(([^)]*)\)").expect("valid regex"));
static NO_SOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^//\s*no solution").expect("valid regex"));

/// A subprocess-backed engine invoked as `command model_file data_file`.
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    command: String,
    model_file: PathBuf,
    data_file: PathBuf,
    output_file: PathBuf,
}

impl Default for ExternalEngine {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            model_file: PathBuf::from(DEFAULT_MODEL_FILE_NAME),
            data_file: PathBuf::from(DEFAULT_DATA_FILE_NAME),
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE_NAME),
        }
    }
}

impl ExternalEngine {
    pub fn from_config(config: &ExternalConfig) -> Self {
        Self {
            command: config.command.clone(),
            model_file: config.model_file.clone(),
            data_file: config.data_file.clone(),
            output_file: config.output_file.clone(),
        }
    }

    pub fn command(self, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..self
        }
    }

    pub fn model_file(self, model_file: impl Into<PathBuf>) -> Self {
        Self {
            model_file: model_file.into(),
            ..self
        }
    }

    pub fn data_file(self, data_file: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            ..self
        }
    }

    pub fn output_file(self, output_file: impl Into<PathBuf>) -> Self {
        Self {
            output_file: output_file.into(),
            ..self
        }
    }

    /// Writes the data file, runs the engine for at most `timeout` and parses its report.
    ///
    /// The elapsed time covers writing the data file through parsing the report.
    pub fn solve(
        &self,
        data: &ProblemData,
        limits: Option<&Limits>,
        timeout: Duration,
    ) -> Bounded<Report> {
        let start = Instant::now();
        let outcome = self.run(data, limits, timeout);
        Bounded {
            outcome,
            elapsed: start.elapsed(),
        }
    }

    fn run(&self, data: &ProblemData, limits: Option<&Limits>, timeout: Duration) -> Result<Report> {
        fs::write(&self.data_file, write_data_document(data, limits))
            .map_err(|source| io_error(&self.data_file, source))?;

        let output =
            File::create(&self.output_file).map_err(|source| io_error(&self.output_file, source))?;
        info!(
            command = %self.command,
            model = %self.model_file.display(),
            data = %self.data_file.display(),
            "running external engine"
        );
        let mut child = Command::new(&self.command)
            .arg(&self.model_file)
            .arg(&self.data_file)
            .stdout(Stdio::from(output))
            .spawn()
            .map_err(|e| Error::ExternalProcess(format!("could not start {}: {e}", self.command)))?;

        let start = Instant::now();
        loop {
            let exited = child.try_wait().map_err(|e| {
                Error::ExternalProcess(format!("error waiting for {}: {e}", self.command))
            })?;
            if let Some(status) = exited {
                if !status.success() {
                    return Err(Error::ExternalProcess(format!(
                        "{} exited with {status}",
                        self.command
                    )));
                }
                break;
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let report = fs::read_to_string(&self.output_file)
            .map_err(|source| io_error(&self.output_file, source))?;
        debug!(bytes = report.len(), "read engine report");
        parse_report(&report)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `name = value;`
fn scalar(out: &mut String, name: &str, value: impl Display) {
    let _ = writeln!(out, "{name} = {value};");
}

/// `name = [ v1, v2, ..., vn ];`
fn vector<T: Display>(out: &mut String, name: &str, values: &[T]) {
    let _ = writeln!(out, "{name} = [ {} ];", join(values));
}

/// ```text
/// name = [
/// [ v11, ..., v1n ],
/// ...
/// [ vm1, ..., vmn ]
/// ];
/// ```
fn matrix<T: Display>(out: &mut String, name: &str, rows: &[Vec<T>]) {
    let body = rows
        .iter()
        .map(|row| format!("[ {} ]", join(row)))
        .collect::<Vec<_>>()
        .join(",\n");
    let _ = writeln!(out, "{name} = [\n{body}\n];");
}

fn join<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders the data document read by the engine's model. Type tables appear only in limited
/// mode; per-accelerator caps are written as an identity membership matrix.
pub fn write_data_document(data: &ProblemData, limits: Option<&Limits>) -> String {
    let mut out = String::new();

    scalar(&mut out, "numServers", data.num_servers());
    scalar(&mut out, "numAccelerators", data.num_accelerators());
    if let Some(limits) = limits {
        scalar(&mut out, "numAcceleratorTypes", limits.num_types());
    }
    out.push('\n');

    vector(&mut out, "arrivalRates", data.arrival_rates());
    vector(&mut out, "unitCost", data.unit_cost());
    if let Some(limits) = limits {
        vector(&mut out, "unitsAvail", limits.units_avail());
    }
    out.push('\n');

    matrix(&mut out, "numUnitsPerReplica", data.num_units_per_replica());
    matrix(&mut out, "ratePerReplica", data.rate_per_replica());
    if let Some(limits) = limits {
        matrix(&mut out, "acceleratorTypesMatrix", &limits.types_matrix());
    }
    out.push('\n');

    out
}

/// What could be read from an engine report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub status: SolutionStatus,
    pub objective_value: f64,
    /// Flattened `numReplicas` matrix, row by row.
    pub values: Vec<f64>,
}

impl Report {
    pub(crate) fn into_outcome(self, data: &ProblemData) -> Result<Outcome> {
        Ok(Outcome {
            status: self.status,
            objective_value: self.objective_value,
            num_replicas: decode::decode_replicas(&self.values, data, &Decoding::Direct)?,
        })
    }
}

/// Parses an engine report.
///
/// The status comes from a `// solution (...)` or `// no solution` line and defaults to
/// optimal when neither is present. Only optimal and feasible statuses are accepted; any other
/// report fails with [`Error::SolveFailed`].
pub fn parse_report(report: &str) -> Result<Report> {
    let status = parse_status(report);
    if !status.is_solution() {
        return Err(Error::SolveFailed(status));
    }

    let objective = OBJECTIVE
        .captures(report)
        .and_then(|c| c.get(1))
        .ok_or_else(|| Error::Parse("missing OBJECTIVE line".to_string()))?
        .as_str();
    let objective_value = objective
        .parse::<f64>()
        .map_err(|e| Error::Parse(format!("bad objective value {objective:?}: {e}")))?;

    let start = NUM_REPLICAS
        .find(report)
        .ok_or_else(|| Error::Parse("missing numReplicas block".to_string()))?
        .end();
    // The block ends at the `;` closing the assignment.
    let rest = &report[start..];
    let block = rest.split_once(';').map_or(rest, |(block, _)| block);
    let values = block
        .split(|c: char| c.is_whitespace() || "[],".contains(c))
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|e| Error::Parse(format!("bad replica count {token:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Report {
        status,
        objective_value,
        values,
    })
}

fn parse_status(report: &str) -> SolutionStatus {
    if NO_SOLUTION.is_match(report) {
        return SolutionStatus::Infeasible;
    }
    let Some(status) = SOLUTION_STATUS.captures(report).and_then(|c| c.get(1)) else {
        return SolutionStatus::Optimal;
    };
    let status = status.as_str().to_lowercase();
    if status.contains("infeasible") {
        SolutionStatus::Infeasible
    } else if status.contains("optimal") {
        SolutionStatus::Optimal
    } else if status.contains("feasible") {
        SolutionStatus::Suboptimal
    } else {
        SolutionStatus::Error
    }
}
