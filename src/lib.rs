//! Plan accelerator replicas for a set of servers at minimum cost.
//!
//! A [`ProblemInstance`] turns per-(server, accelerator) cost, capacity and throughput tables
//! into a mixed-integer linear program using one of the [`Formulation`]s, solves it under a
//! deadline and decodes the result into replica counts and consumed accelerator units.

pub mod config;
pub mod decode;
pub mod error;
pub mod external;
pub mod formulation;
pub mod problem;
pub mod solver;
pub mod types;

pub use config::SolverConfig;
pub use error::{Error, Result};
pub use external::ExternalEngine;
pub use formulation::{Constraint, Formulation, LinearProgram, Relation, VariableKind};
pub use problem::{Limits, ProblemData, ProblemInstance};
pub use solver::{Cancellation, MicroLpSolver, RawSolution, SolutionStatus, Solver};
pub use types::{ProblemSpec, Solution};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use serde::Deserialize;
    use std::fs::{read_dir, read_to_string};
    use std::path::Path;

    #[derive(Debug, Deserialize)]
    struct Expected {
        solution: ExpectedSolution,
    }

    #[derive(Debug, Deserialize)]
    struct ExpectedSolution {
        #[serde(rename = "objectiveValue")]
        objective_value: f64,
        #[serde(rename = "numReplicas")]
        num_replicas: Vec<Vec<u32>>,
        #[serde(rename = "unitsUsed")]
        units_used: Option<Vec<u32>>,
        #[serde(rename = "unitsUsedByType")]
        units_used_by_type: Option<Vec<u32>>,
    }

    // Helper function to run a test from a test file
    fn run_test_file(test_file: &Path) {
        println!("Running test for file: {:?}", test_file);

        let failure_message = format!("Failed to read test file: {}", test_file.display());
        let yaml_content = read_to_string(test_file).expect(&failure_message);

        // Split the file content at the "solution:" marker to separate input and expected output
        let parts: Vec<&str> = yaml_content.split("solution:").collect();

        let failure_message = format!("Failed to parse input YAML: {}", test_file.display());
        let input_yaml = parts.first().expect("No input found in test file").trim();
        let input: ProblemSpec = serde_yaml::from_str(input_yaml).expect(&failure_message);

        let failure_message = format!("Failed to parse expected YAML: {}", test_file.display());
        let expected_yaml = format!("solution:{}", parts.get(1).expect(&failure_message));
        let expected: Expected = serde_yaml::from_str(&expected_yaml).expect(&failure_message);

        let failure_message = format!("Failed to solve test file: {}", test_file.display());
        let mut problem = input.into_instance().expect(&failure_message);
        let solution = problem.solve().expect(&failure_message).clone();

        println!("expected: {:?}", expected.solution);
        println!("received: {:?}", solution);

        assert_eq!(
            solution.num_replicas,
            expected.solution.num_replicas,
            "{}",
            test_file.display()
        );
        assert_abs_diff_eq!(
            solution.objective_value,
            expected.solution.objective_value,
            epsilon = 1e-6
        );
        if let Some(units_used) = &expected.solution.units_used {
            assert_eq!(&solution.units_used, units_used, "{}", test_file.display());
        }
        if let Some(by_type) = &expected.solution.units_used_by_type {
            assert_eq!(&solution.units_used_by_type, by_type, "{}", test_file.display());
        }

        // Limited solves never exceed any type's availability.
        if let Some(limits) = problem.limits().filter(|_| problem.is_limited()) {
            for (k, (used, avail)) in solution
                .units_used_by_type
                .iter()
                .zip(limits.units_avail())
                .enumerate()
            {
                assert!(used <= avail, "{}: type {k} over capacity", test_file.display());
            }
        }
    }

    #[test]
    fn run_all_test_files() {
        // Read all files from the test_data directory
        let test_data_dir = Path::new("test_data");
        let mut entries: Vec<_> = read_dir(test_data_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.is_file() && path.extension().map(|ext| ext == "yaml").unwrap_or(false)
            })
            .collect();

        // Sort paths lexically by filename
        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        for path in entries {
            run_test_file(&path);
        }
    }
}
