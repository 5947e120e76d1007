//! Maps raw solver values back to replica counts and unit consumption.

use crate::error::{Error, Result};
use crate::problem::{Limits, ProblemData};

/// How the decision variables translate into replica counts.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoding {
    /// Binary choice of a precomputed replica count `[server][accelerator]`.
    Scaled(Vec<Vec<u32>>),
    /// The variable is the replica count itself.
    Direct,
}

/// Nearest integer, with negative noise clamped to zero.
fn round_count(value: f64) -> Result<u32> {
    let rounded = value.round();
    if rounded <= 0.0 {
        Ok(0)
    } else if rounded > f64::from(u32::MAX) {
        Err(Error::Overflow(format!("solver value {value}")))
    } else {
        Ok(rounded as u32)
    }
}

/// Replica counts `[server][accelerator]` from the solver's variable vector.
///
/// For [`Decoding::Scaled`] the 0/1 variable is rounded before it is multiplied by the
/// precomputed count.
pub fn decode_replicas(
    values: &[f64],
    data: &ProblemData,
    decoding: &Decoding,
) -> Result<Vec<Vec<u32>>> {
    let expected = data.num_servers() * data.num_accelerators();
    if values.len() != expected {
        return Err(Error::Parse(format!(
            "expected {expected} replica values, got {}",
            values.len()
        )));
    }
    (0..data.num_servers())
        .map(|i| {
            (0..data.num_accelerators())
                .map(|j| {
                    let chosen = round_count(values[data.var_index(i, j)])?;
                    match decoding {
                        Decoding::Scaled(max_replicas) => {
                            chosen.checked_mul(max_replicas[i][j]).ok_or_else(|| {
                                Error::Overflow(format!("replicas of server {i} on accelerator {j}"))
                            })
                        }
                        Decoding::Direct => Ok(chosen),
                    }
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

/// `units_used[j] = Σ_i num_replicas[i][j] * num_units_per_replica[i][j]`
pub fn units_used(data: &ProblemData, num_replicas: &[Vec<u32>]) -> Result<Vec<u32>> {
    (0..data.num_accelerators())
        .map(|j| {
            num_replicas
                .iter()
                .zip(data.num_units_per_replica())
                .try_fold(0u32, |sum, (replicas, units)| {
                    replicas[j]
                        .checked_mul(units[j])
                        .and_then(|used| sum.checked_add(used))
                })
                .ok_or_else(|| Error::Overflow(format!("units used on accelerator {j}")))
        })
        .collect()
}

/// Units consumed per accelerator type; empty when no type tables are known.
pub fn units_used_by_type(units_used: &[u32], limits: Option<&Limits>) -> Result<Vec<u32>> {
    let Some(limits) = limits else {
        return Ok(Vec::new());
    };
    (0..limits.num_types())
        .map(|k| {
            units_used
                .iter()
                .enumerate()
                .try_fold(0u32, |sum, (j, &used)| {
                    used.checked_mul(limits.weight(k, j))
                        .and_then(|weighted| sum.checked_add(weighted))
                })
                .ok_or_else(|| Error::Overflow(format!("units used by type {k}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> ProblemData {
        ProblemData::new(
            vec![1.0, 2.0],
            vec![vec![1, 2], vec![3, 1]],
            vec![vec![1.0, 2.0], vec![1.0, 1.0]],
            vec![3.0, 4.0],
        )
        .unwrap()
    }

    #[test]
    fn rounds_solver_noise() {
        let values = [2.999_999_7, -1e-9, 0.000_000_4, 4.000_001];
        let replicas = decode_replicas(&values, &data(), &Decoding::Direct).unwrap();
        assert_eq!(replicas, vec![vec![3, 0], vec![0, 4]]);
    }

    #[test]
    fn scaled_rounds_before_multiplying() {
        let decoding = Decoding::Scaled(vec![vec![3, 2], vec![4, 4]]);
        let values = [0.999_999, 0.000_001, 0.49, 0.51];
        let replicas = decode_replicas(&values, &data(), &decoding).unwrap();
        assert_eq!(replicas, vec![vec![3, 0], vec![0, 4]]);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = decode_replicas(&[1.0, 2.0], &data(), &Decoding::Direct).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn aggregates_units() {
        let data = data();
        let used = units_used(&data, &[vec![3, 1], vec![2, 4]]).unwrap();
        assert_eq!(used, vec![3 + 6, 2 + 4]);

        let limits = Limits::pooled(2, vec![0, 0], vec![vec![1, 1], vec![0, 3]], 2).unwrap();
        assert_eq!(units_used_by_type(&used, Some(&limits)).unwrap(), vec![15, 18]);
        assert!(units_used_by_type(&used, None).unwrap().is_empty());
    }

    #[test]
    fn large_counts_overflow_instead_of_wrapping() {
        let data = data();
        let used = units_used(&data, &[vec![u32::MAX, 0], vec![0, 0]]).unwrap();
        assert_eq!(used, vec![u32::MAX, 0]);
        assert!(matches!(
            units_used(&data, &[vec![u32::MAX, 0], vec![1, 0]]),
            Err(Error::Overflow(_))
        ));
        assert!(matches!(
            units_used(&data, &[vec![0, u32::MAX], vec![0, 0]]),
            Err(Error::Overflow(_))
        ));

        let limits = Limits::pooled(1, vec![0], vec![vec![2, 0]], 2).unwrap();
        assert!(matches!(
            units_used_by_type(&[u32::MAX, 0], Some(&limits)),
            Err(Error::Overflow(_))
        ));

        let values = [5e9, 0.0, 0.0, 0.0];
        assert!(matches!(
            decode_replicas(&values, &data, &Decoding::Direct),
            Err(Error::Overflow(_))
        ));
        let scaled = Decoding::Scaled(vec![vec![u32::MAX, 1], vec![1, 1]]);
        assert!(matches!(
            decode_replicas(&[2.0, 0.0, 0.0, 0.0], &data, &scaled),
            Err(Error::Overflow(_))
        ));
    }
}
