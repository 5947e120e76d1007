use std::fmt;

use serde::{Deserialize, Serialize};

use crate::decode::Decoding;
use crate::error::{Error, Result};
use crate::problem::{Limits, ProblemData};

/// The ways an allocation problem can be encoded as a MILP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formulation {
    /// One accelerator kind per server, binary choice of a precomputed replica count.
    Single,
    /// Integer replica counts, kinds mixable per server, pooled type caps.
    Multi,
    /// Integer replica counts with one cap per accelerator kind.
    Mip,
    /// Binary single-kind choice with one cap per accelerator kind.
    Assignment,
}

impl fmt::Display for Formulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Formulation::Single => "SINGLE",
            Formulation::Multi => "MULTI",
            Formulation::Mip => "MIP",
            Formulation::Assignment => "ASSIGNMENT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Continuous,
    Integer,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

impl Relation {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Relation::Le => lhs <= rhs,
            Relation::Ge => lhs >= rhs,
            Relation::Eq => lhs == rhs,
        }
    }
}

/// A dense constraint row: `coefficients · x  relation  rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub coefficients: Vec<f64>,
    pub relation: Relation,
    pub rhs: f64,
}

impl Constraint {
    /// A row without any nonzero coefficient, which holds or fails regardless of `x`.
    pub fn is_empty(&self) -> bool {
        self.coefficients.iter().all(|&c| c == 0.0)
    }
}

/// A minimization problem ready to hand to a [`Solver`](crate::Solver).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearProgram {
    pub objective: Vec<f64>,
    pub constraints: Vec<Constraint>,
    pub kinds: Vec<VariableKind>,
}

impl LinearProgram {
    fn new(objective: Vec<f64>, kind: VariableKind) -> Self {
        let kinds = vec![kind; objective.len()];
        Self {
            objective,
            constraints: Vec::new(),
            kinds,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.objective.len()
    }

    fn with(mut self, coefficients: Vec<f64>, relation: Relation, rhs: f64) -> Self {
        self.constraints.push(Constraint {
            coefficients,
            relation,
            rhs,
        });
        self
    }
}

/// A formulated program together with how to read replica counts out of its solution.
#[derive(Debug, Clone)]
pub struct Model {
    pub program: LinearProgram,
    pub decoding: Decoding,
}

impl Formulation {
    /// Whether capacity caps may be expressed over pooled accelerator types.
    pub fn accepts_pooled_limits(self) -> bool {
        matches!(self, Formulation::Single | Formulation::Multi)
    }

    /// Builds the objective, constraints and variable kinds. Capacity rows are emitted only
    /// when `limits` is given.
    pub fn formulate(self, data: &ProblemData, limits: Option<&Limits>) -> Result<Model> {
        match self {
            Formulation::Single | Formulation::Assignment => formulate_assignment(data, limits),
            Formulation::Multi | Formulation::Mip => Ok(formulate_replicas(data, limits)),
        }
    }
}

/// Replicas needed to serve a server entirely with one kind; zero for excluded pairs.
///
/// Fails with [`Error::Overflow`] when a count does not fit in a `u32`.
pub fn max_replicas(data: &ProblemData) -> Result<Vec<Vec<u32>>> {
    (0..data.num_servers())
        .map(|i| {
            (0..data.num_accelerators())
                .map(|j| {
                    if data.is_excluded(i, j) {
                        return Ok(0);
                    }
                    let needed = (data.arrival_rates()[i] / data.rate_per_replica()[i][j]).ceil();
                    if needed > f64::from(u32::MAX) {
                        return Err(Error::Overflow(format!(
                            "replicas needed by server {i} on accelerator {j} ({needed})"
                        )));
                    }
                    Ok(needed as u32)
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

fn formulate_assignment(data: &ProblemData, limits: Option<&Limits>) -> Result<Model> {
    let max_replicas = max_replicas(data)?;
    let units = |i: usize, j: usize| {
        f64::from(data.num_units_per_replica()[i][j]) * f64::from(max_replicas[i][j])
    };

    let objective = data.pairs().map(|(i, j)| units(i, j) * data.unit_cost()[j]).collect();
    let program = LinearProgram::new(objective, VariableKind::Binary);

    let program = constrain_one_kind_per_server(program, data);
    let program = match limits {
        Some(limits) => constrain_capacities(program, data, limits, units),
        None => program,
    };
    let program = constrain_excluded_pairs(program, data);

    Ok(Model {
        program,
        decoding: Decoding::Scaled(max_replicas),
    })
}

fn formulate_replicas(data: &ProblemData, limits: Option<&Limits>) -> Model {
    let units = |i: usize, j: usize| f64::from(data.num_units_per_replica()[i][j]);

    let objective = data.pairs().map(|(i, j)| units(i, j) * data.unit_cost()[j]).collect();
    let program = LinearProgram::new(objective, VariableKind::Integer);

    let program = constrain_demand(program, data);
    let program = match limits {
        Some(limits) => constrain_capacities(program, data, limits, units),
        None => program,
    };
    let program = constrain_excluded_pairs(program, data);

    Model {
        program,
        decoding: Decoding::Direct,
    }
}

/// Exactly one kind is chosen for every server.
fn constrain_one_kind_per_server(program: LinearProgram, data: &ProblemData) -> LinearProgram {
    (0..data.num_servers()).fold(program, |p, i| {
        let mut row = vec![0.0; p.num_variables()];
        for j in 0..data.num_accelerators() {
            row[data.var_index(i, j)] = 1.0;
        }
        p.with(row, Relation::Eq, 1.0)
    })
}

/// Deployed throughput covers every server's arrival rate.
fn constrain_demand(program: LinearProgram, data: &ProblemData) -> LinearProgram {
    (0..data.num_servers()).fold(program, |p, i| {
        let mut row = vec![0.0; p.num_variables()];
        for j in 0..data.num_accelerators() {
            row[data.var_index(i, j)] = data.rate_per_replica()[i][j];
        }
        p.with(row, Relation::Ge, data.arrival_rates()[i])
    })
}

/// Units consumed by every type stay within its availability. `units(i, j)` is what one unit
/// of the (server, accelerator) variable consumes.
fn constrain_capacities(
    program: LinearProgram,
    data: &ProblemData,
    limits: &Limits,
    units: impl Fn(usize, usize) -> f64,
) -> LinearProgram {
    (0..limits.num_types()).fold(program, |p, k| {
        let mut row = vec![0.0; p.num_variables()];
        for (i, j) in data.pairs() {
            let weight = limits.weight(k, j);
            if weight > 0 {
                row[data.var_index(i, j)] = f64::from(weight) * units(i, j);
            }
        }
        p.with(row, Relation::Le, f64::from(limits.units_avail()[k]))
    })
}

/// Zero-throughput pairs are pinned to zero with a single aggregate row.
fn constrain_excluded_pairs(program: LinearProgram, data: &ProblemData) -> LinearProgram {
    let mut row = vec![0.0; program.num_variables()];
    let mut any = false;
    for (i, j) in data.pairs().filter(|&(i, j)| data.is_excluded(i, j)) {
        row[data.var_index(i, j)] = 1.0;
        any = true;
    }
    if any {
        program.with(row, Relation::Eq, 0.0)
    } else {
        program
    }
}
