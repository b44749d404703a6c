//! A read-partitioning hidden Markov model engine: phases noisy
//! sequencing reads over a reference into two haplotypes.
//!
//! Each hidden state is a bipartition of the reads spanning a reference
//! column; forward/backward inference over a tiling of aligned reads,
//! followed by a traceback, yields the most probable partition and hence
//! the two read groups. See [`tiling::get_rp_hmms`] for the primary
//! entry point.

pub mod bitops;
pub mod column;
pub mod emission;
pub mod errors;
pub mod forward_backward;
pub mod hmm;
pub mod merge_column;
pub mod params;
pub mod profile;
pub mod tiling;

pub use errors::Error;
pub use forward_backward::{
    backward, cell_posterior, forward, forward_backward, forward_trace_back, merge_cell_posterior,
    partition_sequences_by_state_path, prune, CellRef,
};
pub use hmm::Hmm;
pub use params::{Params, ParamsBuilder};
pub use profile::{ProfileSequence, SubstitutionMatrix, ALPHABET_SIZE};
pub use tiling::{filter_reads_by_coverage_depth, get_rp_hmms, merge_n_paths};
