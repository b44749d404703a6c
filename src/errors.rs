// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("tiling depth {depth} exceeds the configured maximum of {max}")]
    CoverageExceeded { depth: usize, max: usize },
    #[error("cannot {op} HMMs on different reference sequences ({lhs} vs {rhs})")]
    HmmMismatchReference {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
    #[error("cannot {op} HMMs built against different substitution matrices")]
    HmmMismatchSubstitutionMatrix { op: &'static str },
    #[error("cannot fuse HMMs with overlapping or inverted ranges ({lhs_end} > {rhs_start})")]
    HmmMismatchRange { lhs_end: u64, rhs_start: u64 },
    #[error("cannot cross-product HMMs whose column structure is not aligned")]
    HmmMismatchUnaligned,
    #[error("traceback could not find a compatible merge cell; the HMM was over-pruned")]
    TracebackInfeasible,
    #[error("coordinate interval must be non-empty")]
    InvalidCoordinates,
    #[error("posterior_probability_threshold must lie in (0, 1), got {value}")]
    InvalidPosteriorThreshold { value: f64 },
    #[error("max_coverage_depth must lie in [1, 64], got {value}")]
    InvalidMaxCoverageDepth { value: usize },
    #[error("log_substitution_matrix must be square with side equal to the alphabet size ({alphabet}), got {rows}x{cols}")]
    InvalidSubstitutionMatrixShape {
        alphabet: usize,
        rows: usize,
        cols: usize,
    },
}
