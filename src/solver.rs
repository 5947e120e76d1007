//! Solving collaborators and the deadline-bounded call around them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use good_lp::Solution as LpSolution;
use good_lp::solvers::microlp::microlp;
use good_lp::{Expression, ResolutionError, SolverModel, Variable, variable, variables};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::formulation::{Constraint, LinearProgram, Relation, VariableKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SolutionStatus {
    Optimal,
    Suboptimal,
    Infeasible,
    Timeout,
    Error,
}

impl SolutionStatus {
    pub fn is_solution(self) -> bool {
        matches!(self, SolutionStatus::Optimal | SolutionStatus::Suboptimal)
    }
}

impl fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolutionStatus::Optimal => "OPTIMAL",
            SolutionStatus::Suboptimal => "SUBOPTIMAL",
            SolutionStatus::Infeasible => "INFEASIBLE",
            SolutionStatus::Timeout => "TIMEOUT",
            SolutionStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// What a solver reports back: status, primal values and objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSolution {
    pub status: SolutionStatus,
    pub values: Vec<f64>,
    pub objective_value: f64,
}

impl RawSolution {
    pub fn failed(status: SolutionStatus) -> Self {
        Self {
            status,
            values: Vec::new(),
            objective_value: 0.0,
        }
    }
}

/// Flag raised by the coordinator once the deadline has passed.
///
/// Solvers that can stop early should poll it; others simply finish and their result is
/// thrown away.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A MILP solving engine.
pub trait Solver: fmt::Debug + Send + Sync {
    fn solve(&self, program: &LinearProgram, cancel: &Cancellation) -> RawSolution;
}

/// In-process branch-and-bound through `good_lp`'s pure-Rust `microlp` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLpSolver;

impl Solver for MicroLpSolver {
    fn solve(&self, program: &LinearProgram, cancel: &Cancellation) -> RawSolution {
        if cancel.is_cancelled() {
            return RawSolution::failed(SolutionStatus::Timeout);
        }

        let mut problem_vars = variables!();
        let vars: Vec<Variable> = program
            .kinds
            .iter()
            .map(|kind| {
                let definition = match kind {
                    VariableKind::Continuous => variable().min(0),
                    VariableKind::Integer => variable().integer().min(0),
                    VariableKind::Binary => variable().binary(),
                };
                problem_vars.add(definition)
            })
            .collect();

        // Empty rows (e.g. demand of a server whose pairs are all excluded) are decided here
        // rather than handed to the backend.
        let (empty, rows): (Vec<&Constraint>, Vec<&Constraint>) =
            program.constraints.iter().partition(|c| c.is_empty());
        if empty.iter().any(|c| !c.relation.holds(0.0, c.rhs)) {
            return RawSolution::failed(SolutionStatus::Infeasible);
        }

        let objective = linear_expression(&vars, &program.objective);
        let model = problem_vars.minimise(objective).using(microlp);
        let model = rows
            .into_iter()
            .fold(model, |m, c| m.with(create_constraint(&vars, c)));

        match model.solve() {
            Ok(solution) => {
                let values: Vec<f64> = vars.iter().map(|&v| solution.value(v)).collect();
                let objective_value = values
                    .iter()
                    .zip(&program.objective)
                    .map(|(x, c)| x * c)
                    .sum();
                RawSolution {
                    status: SolutionStatus::Optimal,
                    values,
                    objective_value,
                }
            }
            Err(ResolutionError::Infeasible) => RawSolution::failed(SolutionStatus::Infeasible),
            Err(err) => {
                warn!(error = %err, "microlp could not solve the model");
                RawSolution::failed(SolutionStatus::Error)
            }
        }
    }
}

fn linear_expression(vars: &[Variable], coefficients: &[f64]) -> Expression {
    vars.iter()
        .zip(coefficients)
        .filter(|&(_, &c)| c != 0.0)
        .fold(Expression::from(0.0), |sum, (&v, &c)| sum + v * c)
}

fn create_constraint(vars: &[Variable], constraint: &Constraint) -> good_lp::Constraint {
    let lhs = linear_expression(vars, &constraint.coefficients);
    match constraint.relation {
        Relation::Le => lhs.leq(constraint.rhs),
        Relation::Ge => lhs.geq(constraint.rhs),
        Relation::Eq => lhs.eq(constraint.rhs),
    }
}

/// Result of a deadline-bounded call together with its wall-clock duration.
#[derive(Debug)]
pub struct Bounded<T> {
    pub outcome: Result<T>,
    pub elapsed: Duration,
}

/// Runs `solver` on a worker thread and waits at most `timeout` for it.
///
/// On expiry the worker is signalled through [`Cancellation`] and abandoned; whatever it
/// produces later is dropped with the channel. A finished solve without an optimal or
/// suboptimal status is reported as [`Error::SolveFailed`].
pub fn solve_with_timeout(
    solver: Arc<dyn Solver>,
    program: LinearProgram,
    timeout: Duration,
) -> Bounded<RawSolution> {
    let cancel = Cancellation::default();
    let (tx, rx) = mpsc::channel::<RawSolution>();

    let start = Instant::now();
    let worker_cancel = cancel.clone();
    std::thread::spawn(move || {
        let raw = solver.solve(&program, &worker_cancel);
        // If it couldn't be sent, the coordinator has already given up on us.
        let _ = tx.send(raw);
    });

    let outcome = match rx.recv_timeout(timeout) {
        Ok(raw) if raw.status.is_solution() => Ok(raw),
        Ok(raw) => Err(Error::SolveFailed(raw.status)),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            cancel.cancel();
            Err(Error::Timeout(timeout))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::SolveFailed(SolutionStatus::Error)),
    };
    let elapsed = start.elapsed();
    debug!(elapsed_ms = elapsed.as_millis() as u64, ok = outcome.is_ok(), "solver returned");

    Bounded { outcome, elapsed }
}
