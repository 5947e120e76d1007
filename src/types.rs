use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::formulation::Formulation;
use crate::problem::{ProblemData, ProblemInstance};
use crate::solver::SolutionStatus;

/// A problem as written in a YAML file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemSpec {
    pub formulation: Formulation,
    #[serde(rename = "unitCost")]
    pub unit_cost: Vec<f64>,
    #[serde(rename = "numUnitsPerReplica")]
    pub num_units_per_replica: Vec<Vec<u32>>,
    #[serde(rename = "ratePerReplica")]
    pub rate_per_replica: Vec<Vec<f64>>,
    #[serde(rename = "arrivalRates")]
    pub arrival_rates: Vec<f64>,
    pub limits: Option<LimitsSpec>,
    #[serde(rename = "solverTimeoutSeconds")]
    pub solver_timeout_seconds: Option<u64>,
}

/// Capacity caps. Without a types matrix every accelerator kind is capped on its own.
#[derive(Debug, Serialize, Deserialize)]
pub struct LimitsSpec {
    #[serde(rename = "unitsAvail")]
    pub units_avail: Vec<u32>,
    #[serde(rename = "acceleratorTypesMatrix")]
    pub accelerator_types_matrix: Option<Vec<Vec<u32>>>,
}

impl ProblemSpec {
    pub fn into_instance(self) -> Result<ProblemInstance> {
        let data = ProblemData::new(
            self.unit_cost,
            self.num_units_per_replica,
            self.rate_per_replica,
            self.arrival_rates,
        )?;
        let mut problem = ProblemInstance::new(self.formulation, data);
        match self.limits {
            Some(LimitsSpec {
                units_avail,
                accelerator_types_matrix: Some(matrix),
            }) => problem.set_limited(matrix.len(), units_avail, matrix)?,
            Some(LimitsSpec {
                units_avail,
                accelerator_types_matrix: None,
            }) => problem.set_limited_by_accelerator(units_avail)?,
            None => problem.unset_limited(),
        }
        if let Some(seconds) = self.solver_timeout_seconds {
            problem.set_solver_timeout(seconds);
        }
        Ok(problem)
    }
}

/// Immutable snapshot of a successful solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub status: SolutionStatus,
    #[serde(rename = "solutionTimeMillis")]
    pub solution_time_millis: u64,
    #[serde(rename = "objectiveValue")]
    pub objective_value: f64,
    /// `[server][accelerator]`
    #[serde(rename = "numReplicas")]
    pub num_replicas: Vec<Vec<u32>>,
    #[serde(rename = "unitsUsed")]
    pub units_used: Vec<u32>,
    #[serde(rename = "unitsUsedByType")]
    pub units_used_by_type: Vec<u32>,
}
