//! Engine parameters (`spec.md` §6 "Parameter bag").

use std::collections::HashMap;
use std::sync::Arc;

use derive_builder::Builder;

use crate::errors::Error;
use crate::profile::SubstitutionMatrix;

/// Tunables recognized by [`crate::tiling::get_rp_hmms`] and the
/// forward/backward/pruning entry points.
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Params {
    /// Prune cells/merge-cells whose posterior falls below this value.
    #[builder(default = "0.05")]
    pub posterior_probability_threshold: f64,
    /// Columns/merge-columns shallower than this are never pruned.
    #[builder(default = "10")]
    pub min_column_depth_to_filter: usize,
    /// Hard cap on tiling depth; exceeding it is a [`Error::CoverageExceeded`].
    #[builder(default = "64")]
    pub max_coverage_depth: usize,
    /// The default `A x A` row-major log-substitution matrix.
    pub log_substitution_matrix: Arc<SubstitutionMatrix>,
    /// Per-reference overrides of `log_substitution_matrix`, falling back
    /// to the default above when a reference is not listed.
    #[builder(default)]
    pub per_reference_substitution_matrix: HashMap<String, Arc<SubstitutionMatrix>>,
}

impl Params {
    pub fn substitution_matrix_for(&self, ref_name: &str) -> &Arc<SubstitutionMatrix> {
        self.per_reference_substitution_matrix
            .get(ref_name)
            .unwrap_or(&self.log_substitution_matrix)
    }
}

impl ParamsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(threshold) = self.posterior_probability_threshold {
            if !(threshold > 0.0 && threshold < 1.0) {
                return Err(Error::InvalidPosteriorThreshold { value: threshold }.to_string());
            }
        }
        if let Some(max_depth) = self.max_coverage_depth {
            if max_depth == 0 || max_depth > crate::bitops::MAX_DEPTH {
                return Err(Error::InvalidMaxCoverageDepth { value: max_depth }.to_string());
            }
        }
        if let Some(ref matrix) = self.log_substitution_matrix {
            if matrix.side() != crate::profile::ALPHABET_SIZE {
                return Err(Error::InvalidSubstitutionMatrixShape {
                    alphabet: crate::profile::ALPHABET_SIZE,
                    rows: matrix.side(),
                    cols: matrix.side(),
                }
                .to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ALPHABET_SIZE;
    use approx::assert_abs_diff_eq;

    fn matrix() -> Arc<SubstitutionMatrix> {
        Arc::new(SubstitutionMatrix::uniform_error(ALPHABET_SIZE, 0.01))
    }

    #[test]
    fn defaults_build_successfully() {
        let params = ParamsBuilder::default()
            .log_substitution_matrix(matrix())
            .build()
            .unwrap();
        assert_eq!(params.max_coverage_depth, 64);
        assert_abs_diff_eq!(params.posterior_probability_threshold, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let err = ParamsBuilder::default()
            .log_substitution_matrix(matrix())
            .posterior_probability_threshold(1.5)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_coverage_depth_above_64() {
        let err = ParamsBuilder::default()
            .log_substitution_matrix(matrix())
            .max_coverage_depth(65)
            .build();
        assert!(err.is_err());
    }
}
