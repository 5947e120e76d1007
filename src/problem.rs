use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{DEFAULT_SOLVER_TIMEOUT_SECS, SolverConfig};
use crate::decode;
use crate::error::{Error, Result};
use crate::external::ExternalEngine;
use crate::formulation::{Formulation, Model};
use crate::solver::{Bounded, MicroLpSolver, SolutionStatus, Solver, solve_with_timeout};
use crate::types::Solution;

/// Immutable description of an allocation instance.
///
/// Per-(server, accelerator) tables are indexed `[server][accelerator]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemData {
    unit_cost: Vec<f64>,
    num_units_per_replica: Vec<Vec<u32>>,
    rate_per_replica: Vec<Vec<f64>>,
    arrival_rates: Vec<f64>,
}

impl ProblemData {
    /// Validates the tables against each other.
    ///
    /// The number of accelerators is taken from `unit_cost` and the number of servers from
    /// `arrival_rates`; every row of both matrices must match.
    pub fn new(
        unit_cost: Vec<f64>,
        num_units_per_replica: Vec<Vec<u32>>,
        rate_per_replica: Vec<Vec<f64>>,
        arrival_rates: Vec<f64>,
    ) -> Result<Self> {
        let num_servers = arrival_rates.len();
        let num_accelerators = unit_cost.len();
        if num_servers == 0 {
            return Err(size_mismatch("arrivalRates", "at least one server", 0));
        }
        if num_accelerators == 0 {
            return Err(size_mismatch("unitCost", "at least one accelerator", 0));
        }
        check_matrix_shape(
            "numUnitsPerReplica",
            &num_units_per_replica,
            num_servers,
            num_accelerators,
        )?;
        check_matrix_shape(
            "ratePerReplica",
            &rate_per_replica,
            num_servers,
            num_accelerators,
        )?;
        check_values("arrivalRates", &arrival_rates, |rate| rate > 0.0, "must be positive")?;
        for row in &rate_per_replica {
            check_values("ratePerReplica", row, |rate| rate >= 0.0, "must not be negative")?;
        }
        check_values("unitCost", &unit_cost, |cost| cost >= 0.0, "must not be negative")?;
        Ok(Self {
            unit_cost,
            num_units_per_replica,
            rate_per_replica,
            arrival_rates,
        })
    }

    pub fn num_servers(&self) -> usize {
        self.arrival_rates.len()
    }

    pub fn num_accelerators(&self) -> usize {
        self.unit_cost.len()
    }

    pub fn unit_cost(&self) -> &[f64] {
        &self.unit_cost
    }

    pub fn num_units_per_replica(&self) -> &[Vec<u32>] {
        &self.num_units_per_replica
    }

    pub fn rate_per_replica(&self) -> &[Vec<f64>] {
        &self.rate_per_replica
    }

    pub fn arrival_rates(&self) -> &[f64] {
        &self.arrival_rates
    }

    /// A pair with zero throughput can never receive replicas.
    pub fn is_excluded(&self, server: usize, accelerator: usize) -> bool {
        self.rate_per_replica[server][accelerator] <= 0.0
    }

    /// Index of the decision variable for a (server, accelerator) pair.
    pub(crate) fn var_index(&self, server: usize, accelerator: usize) -> usize {
        server * self.num_accelerators() + accelerator
    }

    pub(crate) fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.num_servers()).flat_map(move |i| (0..self.num_accelerators()).map(move |j| (i, j)))
    }
}

fn size_mismatch(table: &'static str, expected: impl ToString, actual: usize) -> Error {
    Error::SizeMismatch {
        table,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn check_matrix_shape<T>(
    table: &'static str,
    matrix: &[Vec<T>],
    rows: usize,
    cols: usize,
) -> Result<()> {
    if matrix.len() != rows {
        return Err(size_mismatch(table, format!("{rows} rows"), matrix.len()));
    }
    match matrix.iter().position(|row| row.len() != cols) {
        Some(r) => Err(Error::SizeMismatch {
            table,
            expected: format!("{cols} columns in every row"),
            actual: format!("{} columns in row {r}", matrix[r].len()),
        }),
        None => Ok(()),
    }
}

/// Every entry must be finite and satisfy `valid`.
fn check_values(
    table: &'static str,
    values: &[f64],
    valid: impl Fn(f64) -> bool,
    reason: &'static str,
) -> Result<()> {
    match values.iter().position(|&v| !v.is_finite() || !valid(v)) {
        Some(index) => Err(Error::InvalidValue {
            table,
            index,
            value: values[index],
            reason: if values[index].is_finite() {
                reason
            } else {
                "must be finite"
            },
        }),
        None => Ok(()),
    }
}

/// Capacity caps used in limited mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Limits {
    /// Accelerators map into pooled types through a membership (weight) matrix
    /// `[type][accelerator]`.
    Pooled {
        units_avail: Vec<u32>,
        types_matrix: Vec<Vec<u32>>,
    },
    /// Every accelerator kind is its own pool.
    PerAccelerator { units_avail: Vec<u32> },
}

impl Limits {
    /// Builds pooled limits, checking them against `num_types` and `num_accelerators`.
    pub fn pooled(
        num_types: usize,
        units_avail: Vec<u32>,
        types_matrix: Vec<Vec<u32>>,
        num_accelerators: usize,
    ) -> Result<Self> {
        if units_avail.len() != num_types {
            return Err(Error::Dimension {
                table: "unitsAvail",
                expected: format!("{num_types} entries"),
                actual: units_avail.len().to_string(),
            });
        }
        if types_matrix.len() != num_types {
            return Err(Error::Dimension {
                table: "acceleratorTypesMatrix",
                expected: format!("{num_types} rows"),
                actual: types_matrix.len().to_string(),
            });
        }
        if let Some(row) = types_matrix.iter().find(|row| row.len() != num_accelerators) {
            return Err(Error::Dimension {
                table: "acceleratorTypesMatrix",
                expected: format!("{num_accelerators} columns in every row"),
                actual: row.len().to_string(),
            });
        }
        Ok(Limits::Pooled {
            units_avail,
            types_matrix,
        })
    }

    pub fn per_accelerator(units_avail: Vec<u32>, num_accelerators: usize) -> Result<Self> {
        if units_avail.len() != num_accelerators {
            return Err(Error::Dimension {
                table: "unitsAvail",
                expected: format!("{num_accelerators} entries"),
                actual: units_avail.len().to_string(),
            });
        }
        Ok(Limits::PerAccelerator { units_avail })
    }

    pub fn num_types(&self) -> usize {
        self.units_avail().len()
    }

    pub fn units_avail(&self) -> &[u32] {
        match self {
            Limits::Pooled { units_avail, .. } | Limits::PerAccelerator { units_avail } => {
                units_avail
            }
        }
    }

    /// Membership weight of accelerator `accelerator` in type `ty`.
    pub fn weight(&self, ty: usize, accelerator: usize) -> u32 {
        match self {
            Limits::Pooled { types_matrix, .. } => types_matrix[ty][accelerator],
            Limits::PerAccelerator { .. } => u32::from(ty == accelerator),
        }
    }

    /// The membership matrix; identity for per-accelerator caps.
    pub fn types_matrix(&self) -> Vec<Vec<u32>> {
        match self {
            Limits::Pooled { types_matrix, .. } => types_matrix.clone(),
            Limits::PerAccelerator { units_avail } => {
                let n = units_avail.len();
                (0..n)
                    .map(|k| (0..n).map(|j| u32::from(k == j)).collect())
                    .collect()
            }
        }
    }
}

#[derive(Debug)]
enum Transport {
    InProcess(Arc<dyn Solver>),
    External(ExternalEngine),
}

/// Decoded result of one successful attempt, before unit aggregation.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub status: SolutionStatus,
    pub objective_value: f64,
    pub num_replicas: Vec<Vec<u32>>,
}

/// An allocation problem bound to one formulation.
///
/// Every call to [`solve`](ProblemInstance::solve) formulates the model from scratch; the
/// instance only keeps the last successful [`Solution`] and the status and timing of the last
/// attempt.
#[derive(Debug)]
pub struct ProblemInstance {
    formulation: Formulation,
    data: ProblemData,
    limits: Option<Limits>,
    is_limited: bool,
    solver_timeout: Option<Duration>,
    default_timeout: Duration,
    transport: Transport,
    status: Option<SolutionStatus>,
    solution_time_millis: u64,
    solution: Option<Solution>,
}

impl ProblemInstance {
    /// Creates an unlimited instance solved in-process by [`MicroLpSolver`].
    pub fn new(formulation: Formulation, data: ProblemData) -> Self {
        Self {
            formulation,
            data,
            limits: None,
            is_limited: false,
            solver_timeout: None,
            default_timeout: Duration::from_secs(DEFAULT_SOLVER_TIMEOUT_SECS),
            transport: Transport::InProcess(Arc::new(MicroLpSolver)),
            status: None,
            solution_time_millis: 0,
            solution: None,
        }
    }

    /// Uses another in-process solver.
    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.transport = Transport::InProcess(solver);
        self
    }

    /// Solves through an external engine instead of in-process.
    pub fn with_external_engine(mut self, engine: ExternalEngine) -> Self {
        self.transport = Transport::External(engine);
        self
    }

    /// Applies the default timeout and, if configured, the external engine.
    pub fn with_config(mut self, config: &SolverConfig) -> Self {
        self.default_timeout = config.timeout();
        if let Some(external) = &config.external {
            self.transport = Transport::External(ExternalEngine::from_config(external));
        }
        self
    }

    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    pub fn data(&self) -> &ProblemData {
        &self.data
    }

    /// Limit tables last installed, whether or not limited mode is on.
    pub fn limits(&self) -> Option<&Limits> {
        self.limits.as_ref()
    }

    /// Caps pooled accelerator types.
    ///
    /// Fails for accelerator-indexed formulations, which take per-accelerator caps only.
    pub fn set_limited(
        &mut self,
        num_types: usize,
        units_avail: Vec<u32>,
        types_matrix: Vec<Vec<u32>>,
    ) -> Result<()> {
        if !self.formulation.accepts_pooled_limits() {
            return Err(Error::Dimension {
                table: "acceleratorTypesMatrix",
                expected: format!(
                    "per-accelerator capacities for the {} formulation",
                    self.formulation
                ),
                actual: format!("{num_types} pooled types"),
            });
        }
        let limits = Limits::pooled(
            num_types,
            units_avail,
            types_matrix,
            self.data.num_accelerators(),
        )?;
        self.limits = Some(limits);
        self.is_limited = true;
        Ok(())
    }

    /// Caps every accelerator kind individually.
    pub fn set_limited_by_accelerator(&mut self, units_avail: Vec<u32>) -> Result<()> {
        let limits = Limits::per_accelerator(units_avail, self.data.num_accelerators())?;
        self.limits = Some(limits);
        self.is_limited = true;
        Ok(())
    }

    /// Drops the capacity constraints from subsequent solves. The tables are kept so that
    /// consumption by type can still be reported.
    pub fn unset_limited(&mut self) {
        self.is_limited = false;
    }

    pub fn is_limited(&self) -> bool {
        self.is_limited
    }

    /// Overrides the solver deadline. Zero keeps the current value.
    pub fn set_solver_timeout(&mut self, seconds: u64) {
        if seconds > 0 {
            self.solver_timeout = Some(Duration::from_secs(seconds));
        }
    }

    pub fn solver_timeout(&self) -> Duration {
        self.solver_timeout.unwrap_or(self.default_timeout)
    }

    fn active_limits(&self) -> Option<&Limits> {
        self.limits.as_ref().filter(|_| self.is_limited)
    }

    /// Formulates, solves and decodes the problem.
    ///
    /// On failure the previous solution is kept; the status and elapsed time of the failed
    /// attempt are still recorded.
    pub fn solve(&mut self) -> Result<&Solution> {
        let limits = self.active_limits();
        let timeout = self.solver_timeout();
        let Bounded { outcome, elapsed } = match &self.transport {
            Transport::InProcess(solver) => {
                self.solve_in_process(Arc::clone(solver), limits, timeout)
            }
            Transport::External(engine) => {
                let Bounded { outcome, elapsed } = engine.solve(&self.data, limits, timeout);
                let outcome = outcome.and_then(|report| report.into_outcome(&self.data));
                Bounded { outcome, elapsed }
            }
        };
        let solution_time_millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.solution_time_millis = solution_time_millis;

        let solution = outcome.and_then(|outcome| {
            let units_used = decode::units_used(&self.data, &outcome.num_replicas)?;
            let units_used_by_type =
                decode::units_used_by_type(&units_used, self.limits.as_ref())?;
            Ok(Solution {
                status: outcome.status,
                solution_time_millis,
                objective_value: outcome.objective_value,
                num_replicas: outcome.num_replicas,
                units_used,
                units_used_by_type,
            })
        });
        let solution = match solution {
            Ok(solution) => solution,
            Err(err) => {
                self.status = Some(err.status());
                warn!(
                    formulation = %self.formulation,
                    elapsed_ms = solution_time_millis,
                    error = %err,
                    "solve failed"
                );
                return Err(err);
            }
        };

        info!(
            formulation = %self.formulation,
            status = %solution.status,
            objective = solution.objective_value,
            elapsed_ms = solution_time_millis,
            "solved"
        );
        self.status = Some(solution.status);
        Ok(&*self.solution.insert(solution))
    }

    fn solve_in_process(
        &self,
        solver: Arc<dyn Solver>,
        limits: Option<&Limits>,
        timeout: Duration,
    ) -> Bounded<Outcome> {
        let Model { program, decoding } = match self.formulation.formulate(&self.data, limits) {
            Ok(model) => model,
            Err(err) => {
                return Bounded {
                    outcome: Err(err),
                    elapsed: Duration::ZERO,
                };
            }
        };
        debug!(
            variables = program.num_variables(),
            constraints = program.constraints.len(),
            limited = limits.is_some(),
            "formulated model"
        );
        let Bounded { outcome, elapsed } = solve_with_timeout(solver, program, timeout);
        let outcome = outcome.and_then(|raw| {
            Ok(Outcome {
                status: raw.status,
                objective_value: raw.objective_value,
                num_replicas: decode::decode_replicas(&raw.values, &self.data, &decoding)?,
            })
        });
        Bounded { outcome, elapsed }
    }

    /// Status of the last attempt; `None` before the first solve.
    pub fn solution_status(&self) -> Option<SolutionStatus> {
        self.status
    }

    /// Wall-clock duration of the last attempt.
    pub fn solution_time_millis(&self) -> u64 {
        self.solution_time_millis
    }

    /// The last successful solution.
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    pub fn objective_value(&self) -> Option<f64> {
        self.solution.as_ref().map(|s| s.objective_value)
    }

    pub fn num_replicas(&self) -> Option<&[Vec<u32>]> {
        self.solution.as_ref().map(|s| s.num_replicas.as_slice())
    }

    pub fn units_used(&self) -> Option<&[u32]> {
        self.solution.as_ref().map(|s| s.units_used.as_slice())
    }

    pub fn units_used_by_type(&self) -> Option<&[u32]> {
        self.solution.as_ref().map(|s| s.units_used_by_type.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulation::LinearProgram;
    use crate::solver::{Cancellation, RawSolution};
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn two_by_two(unit_cost: Vec<f64>) -> ProblemData {
        ProblemData::new(
            unit_cost,
            vec![vec![1, 1], vec![1, 1]],
            vec![vec![1.0, 2.0], vec![1.0, 2.0]],
            vec![3.0, 4.0],
        )
        .unwrap()
    }

    fn assert_demand_met(data: &ProblemData, num_replicas: &[Vec<u32>]) {
        for (i, row) in num_replicas.iter().enumerate() {
            let served: f64 = row
                .iter()
                .zip(&data.rate_per_replica()[i])
                .map(|(&n, &rate)| f64::from(n) * rate)
                .sum();
            assert!(served >= data.arrival_rates()[i], "server {i} underserved");
        }
    }

    #[test]
    fn rejects_mismatched_tables() {
        let err = ProblemData::new(
            vec![1.0, 2.0],
            vec![vec![1, 1], vec![1]],
            vec![vec![1.0, 2.0], vec![1.0, 2.0]],
            vec![3.0, 4.0],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                table: "numUnitsPerReplica",
                ..
            }
        ));

        let err = ProblemData::new(
            vec![1.0, 2.0],
            vec![vec![1, 1], vec![1, 1]],
            vec![vec![1.0, 2.0]],
            vec![3.0, 4.0],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                table: "ratePerReplica",
                ..
            }
        ));

        assert!(ProblemData::new(vec![], vec![], vec![], vec![]).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let tables = |arrival_rates: Vec<f64>, rate: f64| {
            ProblemData::new(
                vec![1.0, 2.0],
                vec![vec![1, 1]],
                vec![vec![1.0, rate]],
                arrival_rates,
            )
        };
        for bad in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(
                    tables(vec![bad], 2.0),
                    Err(Error::InvalidValue {
                        table: "arrivalRates",
                        index: 0,
                        ..
                    })
                ),
                "arrival rate {bad}"
            );
        }
        assert!(matches!(
            tables(vec![3.0], -1.0),
            Err(Error::InvalidValue {
                table: "ratePerReplica",
                ..
            })
        ));
        assert!(matches!(
            tables(vec![3.0], f64::NAN),
            Err(Error::InvalidValue {
                table: "ratePerReplica",
                ..
            })
        ));
        // Zero throughput marks an excluded pair and stays valid.
        assert!(tables(vec![3.0], 0.0).is_ok());
    }

    #[test]
    fn rejects_mismatched_limits() {
        let mut problem = ProblemInstance::new(Formulation::Multi, two_by_two(vec![1.0, 2.0]));
        let err = problem
            .set_limited(2, vec![2, 100], vec![vec![1, 0, 0], vec![0, 1, 0]])
            .unwrap_err();
        assert!(matches!(err, Error::Dimension { .. }));
        let err = problem
            .set_limited(2, vec![2], vec![vec![1, 0], vec![0, 1]])
            .unwrap_err();
        assert!(matches!(err, Error::Dimension { .. }));
        assert!(!problem.is_limited());

        let err = problem.set_limited_by_accelerator(vec![2]).unwrap_err();
        assert!(matches!(err, Error::Dimension { .. }));
        assert!(!problem.is_limited());
    }

    #[test]
    fn accelerator_indexed_formulations_take_per_accelerator_caps() {
        let mut problem = ProblemInstance::new(Formulation::Mip, two_by_two(vec![1.0, 2.0]));
        assert!(
            problem
                .set_limited(2, vec![2, 100], vec![vec![1, 0], vec![0, 1]])
                .is_err()
        );
        problem.set_limited_by_accelerator(vec![2, 100]).unwrap();
        assert!(problem.is_limited());
    }

    #[test]
    fn solver_timeout_ignores_zero() {
        let mut problem = ProblemInstance::new(Formulation::Multi, two_by_two(vec![1.0, 2.0]));
        assert_eq!(
            problem.solver_timeout(),
            Duration::from_secs(DEFAULT_SOLVER_TIMEOUT_SECS)
        );
        problem.set_solver_timeout(5);
        assert_eq!(problem.solver_timeout(), Duration::from_secs(5));
        problem.set_solver_timeout(0);
        assert_eq!(problem.solver_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn multi_unlimited_meets_demand_at_minimum_cost() {
        let data = two_by_two(vec![1.0, 2.0]);
        let mut problem = ProblemInstance::new(Formulation::Multi, data.clone());
        let solution = problem.solve().unwrap().clone();
        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert_abs_diff_eq!(solution.objective_value, 7.0, epsilon = 1e-6);
        assert_demand_met(&data, &solution.num_replicas);
        for j in 0..2 {
            let expected: u32 = (0..2).map(|i| solution.num_replicas[i][j]).sum();
            assert_eq!(solution.units_used[j], expected);
        }
        assert!(solution.units_used_by_type.is_empty());
    }

    #[test]
    fn multi_limited_honors_cap() {
        let data = two_by_two(vec![1.0, 2.0]);
        let mut problem = ProblemInstance::new(Formulation::Multi, data.clone());
        problem.set_limited_by_accelerator(vec![2, 100]).unwrap();
        let solution = problem.solve().unwrap();
        assert_abs_diff_eq!(solution.objective_value, 7.0, epsilon = 1e-6);
        assert_eq!(solution.num_replicas, vec![vec![1, 1], vec![0, 2]]);
        assert!(solution.units_used[0] <= 2);
        assert_eq!(solution.units_used_by_type, solution.units_used);
        assert_demand_met(&data, &solution.num_replicas);
    }

    #[test]
    fn pooled_limits_aggregate_by_type() {
        let data = two_by_two(vec![1.0, 3.0]);
        let mut problem = ProblemInstance::new(Formulation::Multi, data);
        // A single pool holding both kinds.
        problem.set_limited(1, vec![100], vec![vec![1, 1]]).unwrap();
        let solution = problem.solve().unwrap();
        assert_eq!(solution.num_replicas, vec![vec![3, 0], vec![4, 0]]);
        assert_eq!(solution.units_used, vec![7, 0]);
        assert_eq!(solution.units_used_by_type, vec![7]);
    }

    #[test]
    fn unset_limited_drops_caps() {
        let mut problem = ProblemInstance::new(Formulation::Multi, two_by_two(vec![1.0, 3.0]));
        problem.set_limited_by_accelerator(vec![2, 100]).unwrap();
        assert_abs_diff_eq!(problem.solve().unwrap().objective_value, 10.0, epsilon = 1e-6);
        problem.unset_limited();
        assert!(!problem.is_limited());
        let solution = problem.solve().unwrap();
        assert_abs_diff_eq!(solution.objective_value, 7.0, epsilon = 1e-6);
        // Tables survive unsetting, so consumption by type is still reported.
        assert_eq!(solution.units_used_by_type, vec![7, 0]);
    }

    #[test]
    fn single_assignment_with_fully_excluded_server_is_infeasible() {
        let data = ProblemData::new(
            vec![1.0, 2.0],
            vec![vec![1, 1], vec![1, 1]],
            vec![vec![0.0, 0.0], vec![1.0, 2.0]],
            vec![3.0, 4.0],
        )
        .unwrap();
        let mut problem = ProblemInstance::new(Formulation::Single, data);
        let err = problem.solve().unwrap_err();
        assert!(matches!(err, Error::SolveFailed(SolutionStatus::Infeasible)));
        assert_eq!(problem.solution_status(), Some(SolutionStatus::Infeasible));
        assert!(problem.solution().is_none());
        assert!(problem.num_replicas().is_none());
    }

    #[test]
    fn replica_counts_beyond_u32_fail_instead_of_saturating() {
        let data = ProblemData::new(vec![1.0], vec![vec![2]], vec![vec![1.0]], vec![5e9]).unwrap();
        let mut problem = ProblemInstance::new(Formulation::Single, data);
        let err = problem.solve().unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
        assert_eq!(problem.solution_status(), Some(SolutionStatus::Error));
        assert!(problem.solution().is_none());
    }

    #[test]
    fn excluded_pairs_get_no_replicas() {
        let data = ProblemData::new(
            vec![1.0, 5.0],
            vec![vec![1, 1], vec![1, 1]],
            vec![vec![0.0, 2.0], vec![1.0, 0.0]],
            vec![3.0, 4.0],
        )
        .unwrap();
        for formulation in [
            Formulation::Single,
            Formulation::Multi,
            Formulation::Mip,
            Formulation::Assignment,
        ] {
            let mut problem = ProblemInstance::new(formulation, data.clone());
            let solution = problem.solve().unwrap();
            assert_eq!(solution.num_replicas[0][0], 0, "{formulation}");
            assert_eq!(solution.num_replicas[1][1], 0, "{formulation}");
            assert_demand_met(&data, &solution.num_replicas);
        }
    }

    #[test]
    fn solving_twice_is_idempotent() {
        let mut problem = ProblemInstance::new(Formulation::Single, two_by_two(vec![1.0, 3.0]));
        let first = problem.solve().unwrap().clone();
        let second = problem.solve().unwrap();
        assert_eq!(first.num_replicas, second.num_replicas);
        assert_abs_diff_eq!(first.objective_value, second.objective_value);
    }

    #[derive(Debug)]
    struct StalledSolver {
        calls: AtomicUsize,
    }

    impl Solver for StalledSolver {
        fn solve(&self, program: &LinearProgram, cancel: &Cancellation) -> RawSolution {
            self.calls.fetch_add(1, Ordering::SeqCst);
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            RawSolution {
                status: SolutionStatus::Optimal,
                values: vec![0.0; program.num_variables()],
                objective_value: 0.0,
            }
        }
    }

    #[test]
    fn timeout_keeps_previous_solution() {
        let data = two_by_two(vec![1.0, 3.0]);
        let mut problem = ProblemInstance::new(Formulation::Multi, data);
        let previous = problem.solve().unwrap().clone();

        let stalled = Arc::new(StalledSolver {
            calls: AtomicUsize::new(0),
        });
        let mut problem = problem.with_solver(stalled.clone());
        problem.set_solver_timeout(1);
        let err = problem.solve().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(stalled.calls.load(Ordering::SeqCst), 1);
        assert_eq!(problem.solution_status(), Some(SolutionStatus::Timeout));
        assert!(problem.solution_time_millis() >= 1000);
        assert_eq!(problem.solution(), Some(&previous));
    }
}
