//! Merge columns and merge cells (`spec.md` §3 "MergeColumn", §4.4).

use std::collections::HashMap;
use std::fmt;

use bio::stats::LogProb;

use crate::bitops::Partition;
use crate::column::{Cell, ColumnId};

/// One `(fromPartition, toPartition)` correspondence across a column
/// boundary, shared by every left-cell/right-cell pair that agree on the
/// boundary's masks.
#[derive(Clone)]
pub struct MergeCell {
    pub from_partition: Partition,
    pub to_partition: Partition,
    pub forward_log_prob: LogProb,
    pub backward_log_prob: LogProb,
}

impl MergeCell {
    pub fn new(from_partition: Partition, to_partition: Partition) -> Self {
        MergeCell {
            from_partition,
            to_partition,
            forward_log_prob: LogProb::ln_zero(),
            backward_log_prob: LogProb::ln_zero(),
        }
    }
}

impl fmt::Debug for MergeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeCell")
            .field("from_partition", &format_args!("{:#b}", self.from_partition))
            .field("to_partition", &format_args!("{:#b}", self.to_partition))
            .field("forward_log_prob", &self.forward_log_prob)
            .field("backward_log_prob", &self.backward_log_prob)
            .finish()
    }
}

/// The boundary between two adjacent columns `L` (`prev_column`) and `R`
/// (`next_column`). `mask_from` selects which bits of `L`'s partition
/// survive into the boundary (0 where a read ends at `L`'s right edge);
/// `mask_to` selects which bits of `R`'s partition existed before the
/// boundary (0 where a read starts at `R`'s left edge).
///
/// `from_index`/`to_index` both map a projected partition to the same
/// `cells` slot; `spec.md` requires their key-sets to coincide at all
/// times, which every mutator here maintains.
pub struct MergeColumn {
    pub mask_from: Partition,
    pub mask_to: Partition,
    pub cells: Vec<MergeCell>,
    from_index: HashMap<Partition, usize>,
    to_index: HashMap<Partition, usize>,
    pub prev_column: ColumnId,
    pub next_column: ColumnId,
}

impl MergeColumn {
    pub fn new(mask_from: Partition, mask_to: Partition, prev_column: ColumnId, next_column: ColumnId) -> Self {
        MergeColumn {
            mask_from,
            mask_to,
            cells: Vec::new(),
            from_index: HashMap::new(),
            to_index: HashMap::new(),
            prev_column,
            next_column,
        }
    }

    /// Number of distinct merge cells, i.e. `|mergeCellsFrom|` in `spec.md`
    /// §4.4.
    pub fn depth(&self) -> usize {
        self.cells.len()
    }

    /// Install `cell`, indexing it by both its from- and to-partition. If
    /// a cell with the same `from_partition` already exists it is reused
    /// (not duplicated), matching "two L-cells whose partitions agree on
    /// maskFrom share one outgoing merge cell".
    pub fn insert(&mut self, from_partition: Partition, to_partition: Partition) -> usize {
        if let Some(&idx) = self.from_index.get(&from_partition) {
            debug_assert_eq!(self.cells[idx].to_partition, to_partition);
            return idx;
        }
        if let Some(&idx) = self.to_index.get(&to_partition) {
            debug_assert_eq!(self.cells[idx].from_partition, from_partition);
            self.from_index.insert(from_partition, idx);
            return idx;
        }
        let idx = self.cells.len();
        self.cells.push(MergeCell::new(from_partition, to_partition));
        self.from_index.insert(from_partition, idx);
        self.to_index.insert(to_partition, idx);
        idx
    }

    /// The merge cell reached from a left-column cell, if any.
    pub fn next_merge_cell_of(&self, cell: &Cell) -> Option<&MergeCell> {
        self.from_index
            .get(&(cell.partition & self.mask_from))
            .map(|&idx| &self.cells[idx])
    }

    pub fn next_merge_cell_index_of(&self, cell: &Cell) -> Option<usize> {
        self.from_index.get(&(cell.partition & self.mask_from)).copied()
    }

    /// The merge cell reached from a right-column cell, if any.
    pub fn previous_merge_cell_of(&self, cell: &Cell) -> Option<&MergeCell> {
        self.to_index
            .get(&(cell.partition & self.mask_to))
            .map(|&idx| &self.cells[idx])
    }

    pub fn previous_merge_cell_index_of(&self, cell: &Cell) -> Option<usize> {
        self.to_index.get(&(cell.partition & self.mask_to)).copied()
    }

    /// Drop every cell whose precomputed posterior (index-aligned with
    /// `self.cells`, since the posterior needs the owning column's
    /// forward/backward totals) falls below `threshold`. The caller is
    /// responsible for never leaving a merge column empty (`spec.md` §4.8
    /// "never drop a column or merge column entirely").
    pub fn retain_posteriors(&mut self, threshold: f64, posteriors: &[f64]) {
        assert_eq!(posteriors.len(), self.cells.len(), "bug: posterior count must match cell count");
        let kept: Vec<MergeCell> = self
            .cells
            .drain(..)
            .zip(posteriors.iter())
            .filter(|(_, &p)| p >= threshold)
            .map(|(cell, _)| cell)
            .collect();
        self.cells = kept;
        self.from_index.clear();
        self.to_index.clear();
        for (idx, cell) in self.cells.iter().enumerate() {
            self.from_index.insert(cell.from_partition, idx);
            self.to_index.insert(cell.to_partition, idx);
        }
    }

    /// Invariant check: the two hash indexes must always reference the
    /// same set of stored cells (`spec.md` §3 invariant, §8 property (f)).
    #[cfg(test)]
    fn indexes_agree(&self) -> bool {
        let mut from_targets: Vec<usize> = self.from_index.values().copied().collect();
        let mut to_targets: Vec<usize> = self.to_index.values().copied().collect();
        from_targets.sort_unstable();
        to_targets.sort_unstable();
        from_targets == to_targets && from_targets.len() == self.cells.len()
    }
}
