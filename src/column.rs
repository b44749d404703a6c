//! Columns and cells (`spec.md` §3 "Column"/"Cell", §4.3).

use std::fmt;
use std::sync::Arc;

use bio::stats::LogProb;

use crate::bitops::{self, Partition};
use crate::profile::ProfileSequence;

/// Index of a [`Column`] within its owning [`crate::hmm::Hmm`]'s arena.
pub type ColumnId = usize;
/// Index of a [`crate::merge_column::MergeColumn`] within its owning HMM's
/// arena.
pub type MergeColumnId = usize;

/// A candidate bipartition inside a column: `partition` assigns each of
/// the column's `depth` spanning reads to haplotype 1 (bit set) or 2 (bit
/// clear).
#[derive(Clone)]
pub struct Cell {
    pub partition: Partition,
    pub forward_log_prob: LogProb,
    pub backward_log_prob: LogProb,
}

impl Cell {
    pub fn new(partition: Partition) -> Self {
        Cell {
            partition,
            forward_log_prob: LogProb::ln_zero(),
            backward_log_prob: LogProb::ln_zero(),
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("partition", &format_args!("{:#b}", self.partition))
            .field("forward_log_prob", &self.forward_log_prob)
            .field("backward_log_prob", &self.backward_log_prob)
            .finish()
    }
}

/// A reference subinterval over which the set of spanning reads is
/// constant.
pub struct Column {
    pub ref_start: u64,
    pub length: u64,
    /// Number of reads spanning this column; `seq_headers`/`seqs` both
    /// have this many entries, and every cell's partition is `< 2^depth`.
    pub depth: usize,
    pub seq_headers: Vec<Arc<ProfileSequence>>,
    /// `seqs[i]` is the byte offset into `seq_headers[i].probs()` of this
    /// column's first position, i.e. `(ref_start - seq_headers[i].ref_start())
    /// * ALPHABET_SIZE`.
    pub seqs: Vec<usize>,
    pub cells: Vec<Cell>,
    pub forward_log_prob: LogProb,
    pub backward_log_prob: LogProb,
    pub prev_merge: Option<MergeColumnId>,
    pub next_merge: Option<MergeColumnId>,
}

impl Column {
    /// Build a column spanning `[ref_start, ref_start + length)` over the
    /// given spanning reads, with an empty cell list.
    ///
    /// # Panics
    /// Panics if `length == 0`, `seq_headers.len() > 64`, or
    /// `seq_headers.len() != seqs.len()`.
    pub fn new(ref_start: u64, length: u64, seq_headers: Vec<Arc<ProfileSequence>>, seqs: Vec<usize>) -> Self {
        assert!(length > 0, "bug: column must have non-zero length");
        assert_eq!(seq_headers.len(), seqs.len(), "bug: seq_headers/seqs length mismatch");
        assert!(
            seq_headers.len() <= bitops::MAX_DEPTH,
            "bug: column depth exceeds the 64-read limit"
        );
        let depth = seq_headers.len();
        Column {
            ref_start,
            length,
            depth,
            seq_headers,
            seqs,
            cells: Vec::new(),
            forward_log_prob: LogProb::ln_zero(),
            backward_log_prob: LogProb::ln_zero(),
            prev_merge: None,
            next_merge: None,
        }
    }

    /// A depth-0 "gap" column: no spanning reads, a single empty-partition
    /// cell. Used to pad HMMs to identical reference intervals (`spec.md`
    /// §4.6 AlignColumns) and to bridge a reference gap on `fuse`.
    pub fn empty(ref_start: u64, length: u64) -> Self {
        let mut c = Column::new(ref_start, length, Vec::new(), Vec::new());
        c.cells.push(Cell::new(0));
        c
    }

    /// Populate this column's cell list with every partition in
    /// `0..2^depth`, the default enumeration `spec.md` §3 describes.
    ///
    /// Intended for small depths; at depth 64 the full enumeration is not
    /// materialized (`2^64` cells) and callers must construct cells
    /// directly instead (e.g. via cross-product, which only ever
    /// instantiates observed combinations).
    pub fn populate_all_partitions(&mut self) {
        assert!(
            self.depth < bitops::MAX_DEPTH,
            "bug: cannot enumerate all partitions at depth 64"
        );
        let count = 1u64 << self.depth;
        self.cells = (0..count).map(Cell::new).collect();
    }

    pub fn end(&self) -> u64 {
        self.ref_start + self.length
    }

    /// Split this column at reference offset `k` (`0 < k < length`) into a
    /// left part (this column, truncated) and a right part, returned along
    /// with the identity merge cells needed to install the merge column
    /// between them (`spec.md` §4.3 `split`).
    ///
    /// The caller is responsible for threading the returned right column
    /// and merge cells into the owning HMM's arenas and relinking
    /// neighbors; this only computes the split itself.
    pub fn split_at(&mut self, k: u64) -> (Column, Vec<(Partition, Partition)>) {
        assert!(k > 0 && k < self.length, "bug: split offset must be interior to the column");
        let right_seqs = self
            .seqs
            .iter()
            .map(|&off| off + (k as usize) * crate::profile::ALPHABET_SIZE)
            .collect();
        let right = Column::new(
            self.ref_start + k,
            self.length - k,
            self.seq_headers.clone(),
            right_seqs,
        );
        let identity_cells: Vec<(Partition, Partition)> =
            self.cells.iter().map(|cell| (cell.partition, cell.partition)).collect();
        self.length = k;
        (right, identity_cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileSequence;

    fn seq(ref_start: u64, length: u64) -> Arc<ProfileSequence> {
        Arc::new(ProfileSequence::new("chr1", ref_start, length))
    }

    #[test]
    fn populate_all_partitions_covers_full_state_space() {
        let mut c = Column::new(0, 10, vec![seq(0, 10), seq(0, 10), seq(0, 10)], vec![0, 0, 0]);
        c.populate_all_partitions();
        assert_eq!(c.cells.len(), 8);
        let mut seen: Vec<Partition> = c.cells.iter().map(|c| c.partition).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0u64..8).collect::<Vec<_>>());
    }

    #[test]
    fn split_at_preserves_seq_offsets_and_shrinks_left() {
        let s = seq(0, 10);
        let mut c = Column::new(0, 10, vec![s.clone()], vec![0]);
        c.populate_all_partitions();
        let (right, identity) = c.split_at(4);
        assert_eq!(c.length, 4);
        assert_eq!(right.ref_start, 4);
        assert_eq!(right.length, 6);
        assert_eq!(right.seqs, vec![4 * crate::profile::ALPHABET_SIZE]);
        assert_eq!(identity.len(), 2);
        assert_eq!(identity[0].0, identity[0].1);
    }

    #[test]
    fn empty_column_has_single_zero_cell() {
        let c = Column::empty(5, 3);
        assert_eq!(c.depth, 0);
        assert_eq!(c.cells.len(), 1);
        assert_eq!(c.cells[0].partition, 0);
    }
}
