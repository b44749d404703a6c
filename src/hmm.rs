//! The HMM itself: a column/merge-column chain over one reference
//! interval, plus the structural operations that build, fuse, align and
//! cross-product such chains (`spec.md` §3 "HMM", §4.6).

use std::sync::Arc;

use bio::stats::LogProb;

use crate::bitops;
use crate::column::{Cell, Column, ColumnId, MergeColumnId};
use crate::errors::Error;
use crate::merge_column::MergeColumn;
use crate::profile::{ProfileSequence, SubstitutionMatrix};

/// A doubly-linked chain of columns and merge columns over one contiguous
/// reference interval (`spec.md` §3 "HMM").
///
/// Columns and merge columns live in arenas owned by the `Hmm`
/// (`spec.md` §9 "Cyclic structures"); the chain links are plain
/// `ColumnId`/`MergeColumnId` indices, not shared ownership.
pub struct Hmm {
    pub ref_name: String,
    pub ref_start: u64,
    pub ref_length: u64,
    pub profile_seqs: Vec<Arc<ProfileSequence>>,
    pub substitution_matrix: Arc<SubstitutionMatrix>,
    pub(crate) columns: Vec<Column>,
    pub(crate) merge_columns: Vec<MergeColumn>,
    pub first_column: Option<ColumnId>,
    pub last_column: Option<ColumnId>,
    pub column_number: usize,
    pub max_depth: usize,
    pub forward_log_prob: LogProb,
    pub backward_log_prob: LogProb,
}

impl Hmm {
    /// Build a singleton HMM from one profile sequence: a single column of
    /// depth 1 with the two trivial cells (`spec.md` §4.6 "Construct from
    /// one seq").
    pub fn from_profile_seq(seq: Arc<ProfileSequence>, substitution_matrix: Arc<SubstitutionMatrix>) -> Hmm {
        let mut col = Column::new(seq.ref_start(), seq.length(), vec![seq.clone()], vec![0]);
        col.cells.push(Cell::new(0));
        col.cells.push(Cell::new(1));
        Hmm {
            ref_name: seq.ref_name().to_string(),
            ref_start: seq.ref_start(),
            ref_length: seq.length(),
            profile_seqs: vec![seq],
            substitution_matrix,
            columns: vec![col],
            merge_columns: Vec::new(),
            first_column: Some(0),
            last_column: Some(0),
            column_number: 1,
            max_depth: 1,
            forward_log_prob: LogProb::ln_zero(),
            backward_log_prob: LogProb::ln_zero(),
        }
    }

    pub fn end(&self) -> u64 {
        self.ref_start + self.ref_length
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, id: ColumnId) -> &Column {
        &self.columns[id]
    }

    pub(crate) fn column_mut(&mut self, id: ColumnId) -> &mut Column {
        &mut self.columns[id]
    }

    pub fn merge_columns(&self) -> &[MergeColumn] {
        &self.merge_columns
    }

    pub fn merge_column(&self, id: MergeColumnId) -> &MergeColumn {
        &self.merge_columns[id]
    }

    pub(crate) fn merge_column_mut(&mut self, id: MergeColumnId) -> &mut MergeColumn {
        &mut self.merge_columns[id]
    }

    /// Column ids from `first_column` to `last_column`, in reference
    /// order.
    pub fn column_ids_in_order(&self) -> Vec<ColumnId> {
        let mut ids = Vec::with_capacity(self.column_number);
        let mut cur = self.first_column;
        while let Some(id) = cur {
            ids.push(id);
            cur = self.columns[id].next_merge.map(|m| self.merge_columns[m].next_column);
        }
        ids
    }

    /// Merge-column ids between consecutive columns, in reference order.
    pub fn merge_column_ids_in_order(&self) -> Vec<MergeColumnId> {
        self.column_ids_in_order()
            .iter()
            .filter_map(|&id| self.columns[id].next_merge)
            .collect()
    }

    fn recompute_max_depth(&mut self) {
        self.max_depth = self.columns.iter().map(|c| c.depth).max().unwrap_or(0);
    }

    fn same_substitution_matrix(a: &Hmm, b: &Hmm) -> bool {
        Arc::ptr_eq(&a.substitution_matrix, &b.substitution_matrix)
            || *a.substitution_matrix == *b.substitution_matrix
    }

    /// Insert a trivial (single-cell, all-zero-mask) merge column between
    /// `left` and `right`. Every merge column this engine creates outside
    /// of [`Column::split_at`] and [`Hmm::cross_product`] is trivial in
    /// this sense: it bridges either a zero-depth gap column or a true
    /// HMM boundary, and by the containment invariant no read spans such
    /// a boundary, so every bit of both masks is 0.
    fn push_trivial_merge(&mut self, left: ColumnId, right: ColumnId) -> MergeColumnId {
        let mc_id = self.merge_columns.len();
        let mut mc = MergeColumn::new(0, 0, left, right);
        mc.insert(0, 0);
        self.merge_columns.push(mc);
        mc_id
    }

    /// Split column `col_id` at reference offset `k` (`spec.md` §4.3).
    pub fn split(&mut self, col_id: ColumnId, k: u64) -> MergeColumnId {
        let depth = self.columns[col_id].depth;
        let old_next_merge = self.columns[col_id].next_merge;
        let (mut right, identity) = self.columns[col_id].split_at(k);
        right.next_merge = old_next_merge;
        let right_id = self.columns.len();

        if let Some(nm) = old_next_merge {
            self.merge_columns[nm].prev_column = right_id;
        } else if self.last_column == Some(col_id) {
            self.last_column = Some(right_id);
        }

        let mask = bitops::accept_mask(depth as u32);
        let mc_id = self.merge_columns.len();
        let mut mc = MergeColumn::new(mask, mask, col_id, right_id);
        for (from_p, to_p) in identity {
            mc.insert(from_p, to_p);
        }
        self.merge_columns.push(mc);
        self.columns.push(right);
        self.columns[col_id].next_merge = Some(mc_id);
        self.columns[right_id].prev_merge = Some(mc_id);
        self.column_number += 1;
        mc_id
    }

    /// Prepend a depth-0 gap column so the HMM starts at `new_start`.
    /// No-op if it already does.
    fn prepend_empty(&mut self, new_start: u64) {
        let old_first = self.first_column.expect("bug: hmm has no columns");
        let old_start = self.columns[old_first].ref_start;
        if new_start >= old_start {
            return;
        }
        let gap = Column::empty(new_start, old_start - new_start);
        let gap_id = self.columns.len();
        self.columns.push(gap);
        let mc_id = self.push_trivial_merge(gap_id, old_first);
        self.columns[gap_id].next_merge = Some(mc_id);
        self.columns[old_first].prev_merge = Some(mc_id);
        self.first_column = Some(gap_id);
        self.ref_length = self.end() - new_start;
        self.ref_start = new_start;
        self.column_number += 1;
    }

    /// Append a depth-0 gap column so the HMM ends at `new_end`. No-op if
    /// it already does.
    fn append_empty(&mut self, new_end: u64) {
        let old_last = self.last_column.expect("bug: hmm has no columns");
        let old_end = self.columns[old_last].end();
        if new_end <= old_end {
            return;
        }
        let gap = Column::empty(old_end, new_end - old_end);
        let gap_id = self.columns.len();
        self.columns.push(gap);
        let mc_id = self.push_trivial_merge(old_last, gap_id);
        self.columns[old_last].next_merge = Some(mc_id);
        self.columns[gap_id].prev_merge = Some(mc_id);
        self.last_column = Some(gap_id);
        self.ref_length = new_end - self.ref_start;
        self.column_number += 1;
    }

    /// Join two HMMs on the same reference, `a` strictly before `b`
    /// (`spec.md` §4.6 "Fuse"). Consumes both inputs.
    pub fn fuse(mut a: Hmm, mut b: Hmm) -> Result<Hmm, Error> {
        if a.ref_name != b.ref_name {
            return Err(Error::HmmMismatchReference {
                op: "fuse",
                lhs: a.ref_name.clone(),
                rhs: b.ref_name.clone(),
            });
        }
        if !Hmm::same_substitution_matrix(&a, &b) {
            return Err(Error::HmmMismatchSubstitutionMatrix { op: "fuse" });
        }
        if a.columns.is_empty() || b.columns.is_empty() {
            return Err(Error::InvalidCoordinates);
        }
        if a.end() > b.ref_start {
            return Err(Error::HmmMismatchRange {
                lhs_end: a.end(),
                rhs_start: b.ref_start,
            });
        }

        let a_last = a.last_column.expect("bug: non-empty hmm without last_column");
        let col_offset = a.columns.len();
        let mc_offset = a.merge_columns.len();

        for col in b.columns.iter_mut() {
            col.prev_merge = col.prev_merge.map(|m| m + mc_offset);
            col.next_merge = col.next_merge.map(|m| m + mc_offset);
        }
        for mc in b.merge_columns.iter_mut() {
            mc.prev_column += col_offset;
            mc.next_column += col_offset;
        }
        let b_first = b.first_column.map(|c| c + col_offset).expect("bug: non-empty hmm without first_column");
        let b_last = b.last_column.map(|c| c + col_offset);
        let b_ref_start = b.ref_start;
        let b_end = b.end();

        a.columns.append(&mut b.columns);
        a.merge_columns.append(&mut b.merge_columns);
        a.profile_seqs.append(&mut b.profile_seqs);
        a.profile_seqs.sort_by_key(|s| s.ref_start());
        a.column_number += b.column_number;

        let gap_len = b_ref_start - a.end();
        if gap_len > 0 {
            let gap = Column::empty(a.end(), gap_len);
            let gap_id = a.columns.len();
            a.columns.push(gap);
            a.column_number += 1;
            let mc1 = a.push_trivial_merge(a_last, gap_id);
            a.columns[a_last].next_merge = Some(mc1);
            a.columns[gap_id].prev_merge = Some(mc1);
            let mc2 = a.push_trivial_merge(gap_id, b_first);
            a.columns[gap_id].next_merge = Some(mc2);
            a.columns[b_first].prev_merge = Some(mc2);
        } else {
            let mc = a.push_trivial_merge(a_last, b_first);
            a.columns[a_last].next_merge = Some(mc);
            a.columns[b_first].prev_merge = Some(mc);
        }

        a.last_column = b_last;
        a.ref_length = b_end - a.ref_start;
        a.recompute_max_depth();
        Ok(a)
    }

    /// Make `a` and `b` span identical reference intervals with identical
    /// column boundaries (`spec.md` §4.6 "AlignColumns"). Idempotent:
    /// aligning already-aligned HMMs is a no-op.
    pub fn align_columns(a: &mut Hmm, b: &mut Hmm) -> Result<(), Error> {
        if a.ref_name != b.ref_name {
            return Err(Error::HmmMismatchReference {
                op: "align",
                lhs: a.ref_name.clone(),
                rhs: b.ref_name.clone(),
            });
        }

        if a.ref_start < b.ref_start {
            b.prepend_empty(a.ref_start);
        } else if b.ref_start < a.ref_start {
            a.prepend_empty(b.ref_start);
        }
        if a.end() < b.end() {
            a.append_empty(b.end());
        } else if b.end() < a.end() {
            b.append_empty(a.end());
        }

        let mut a_id = a.first_column.expect("bug: hmm has no columns");
        let mut b_id = b.first_column.expect("bug: hmm has no columns");
        loop {
            let a_len = a.columns[a_id].length;
            let b_len = b.columns[b_id].length;
            if a_len > b_len {
                a.split(a_id, b_len);
            } else if b_len > a_len {
                b.split(b_id, a_len);
            }

            let a_next = a.columns[a_id].next_merge;
            let b_next = b.columns[b_id].next_merge;
            match (a_next, b_next) {
                (Some(am), Some(bm)) => {
                    a_id = a.merge_columns[am].next_column;
                    b_id = b.merge_columns[bm].next_column;
                }
                (None, None) => break,
                _ => return Err(Error::HmmMismatchUnaligned),
            }
        }

        a.column_number = a.column_ids_in_order().len();
        b.column_number = b.column_ids_in_order().len();
        Ok(())
    }

    /// Build the Cartesian-product HMM of two column-aligned HMMs
    /// (`spec.md` §4.6 "CrossProduct").
    pub fn cross_product(a: &Hmm, b: &Hmm) -> Result<Hmm, Error> {
        if a.ref_name != b.ref_name {
            return Err(Error::HmmMismatchReference {
                op: "cross-product",
                lhs: a.ref_name.clone(),
                rhs: b.ref_name.clone(),
            });
        }
        if !Hmm::same_substitution_matrix(a, b) {
            return Err(Error::HmmMismatchSubstitutionMatrix { op: "cross-product" });
        }

        let a_cols = a.column_ids_in_order();
        let b_cols = b.column_ids_in_order();
        if a_cols.len() != b_cols.len() {
            return Err(Error::HmmMismatchUnaligned);
        }
        for (&ai, &bi) in a_cols.iter().zip(b_cols.iter()) {
            let (ac, bc) = (&a.columns[ai], &b.columns[bi]);
            if ac.ref_start != bc.ref_start || ac.length != bc.length {
                return Err(Error::HmmMismatchUnaligned);
            }
        }

        let mut profile_seqs: Vec<Arc<ProfileSequence>> =
            a.profile_seqs.iter().chain(b.profile_seqs.iter()).cloned().collect();
        profile_seqs.sort_by_key(|s| s.ref_start());

        let mut result = Hmm {
            ref_name: a.ref_name.clone(),
            ref_start: a.ref_start,
            ref_length: a.ref_length,
            profile_seqs,
            substitution_matrix: a.substitution_matrix.clone(),
            columns: Vec::with_capacity(a_cols.len()),
            merge_columns: Vec::with_capacity(a_cols.len().saturating_sub(1)),
            first_column: None,
            last_column: None,
            column_number: 0,
            max_depth: 0,
            forward_log_prob: LogProb::ln_zero(),
            backward_log_prob: LogProb::ln_zero(),
        };

        let mut new_col_ids = Vec::with_capacity(a_cols.len());
        for (&ai, &bi) in a_cols.iter().zip(b_cols.iter()) {
            let ac = &a.columns[ai];
            let bc = &b.columns[bi];
            let mut seq_headers = ac.seq_headers.clone();
            seq_headers.extend(bc.seq_headers.iter().cloned());
            let mut seqs = ac.seqs.clone();
            seqs.extend(bc.seqs.iter().cloned());
            let is_empty = seq_headers.is_empty();
            let mut col = if is_empty {
                Column::empty(ac.ref_start, ac.length)
            } else {
                Column::new(ac.ref_start, ac.length, seq_headers, seqs)
            };
            if !is_empty {
                for a_cell in &ac.cells {
                    for b_cell in &bc.cells {
                        let partition =
                            bitops::merge(a_cell.partition, b_cell.partition, ac.depth as u32, bc.depth as u32);
                        col.cells.push(Cell::new(partition));
                    }
                }
            }
            let depth = col.depth;
            if depth > result.max_depth {
                result.max_depth = depth;
            }
            let col_id = result.columns.len();
            result.columns.push(col);
            new_col_ids.push(col_id);
        }
        result.first_column = new_col_ids.first().copied();
        result.last_column = new_col_ids.last().copied();
        result.column_number = new_col_ids.len();

        let a_mcs = a.merge_column_ids_in_order();
        let b_mcs = b.merge_column_ids_in_order();
        for (i, (&ami, &bmi)) in a_mcs.iter().zip(b_mcs.iter()).enumerate() {
            let amc = &a.merge_columns[ami];
            let bmc = &b.merge_columns[bmi];
            let left_id = new_col_ids[i];
            let right_id = new_col_ids[i + 1];
            let l_a_depth = a.columns[a_cols[i]].depth as u32;
            let l_b_depth = b.columns[b_cols[i]].depth as u32;
            let r_a_depth = a.columns[a_cols[i + 1]].depth as u32;
            let r_b_depth = b.columns[b_cols[i + 1]].depth as u32;
            let mask_from = bitops::merge(amc.mask_from, bmc.mask_from, l_a_depth, l_b_depth);
            let mask_to = bitops::merge(amc.mask_to, bmc.mask_to, r_a_depth, r_b_depth);
            let mut mc = MergeColumn::new(mask_from, mask_to, left_id, right_id);
            for a_cell in &amc.cells {
                for b_cell in &bmc.cells {
                    let from_partition =
                        bitops::merge(a_cell.from_partition, b_cell.from_partition, l_a_depth, l_b_depth);
                    let to_partition = bitops::merge(a_cell.to_partition, b_cell.to_partition, r_a_depth, r_b_depth);
                    mc.insert(from_partition, to_partition);
                }
            }
            let mc_id = result.merge_columns.len();
            result.merge_columns.push(mc);
            result.columns[left_id].next_merge = Some(mc_id);
            result.columns[right_id].prev_merge = Some(mc_id);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ALPHABET_SIZE;

    fn matrix() -> Arc<SubstitutionMatrix> {
        Arc::new(SubstitutionMatrix::uniform_error(ALPHABET_SIZE, 0.01))
    }

    fn seq(ref_start: u64, length: u64) -> Arc<ProfileSequence> {
        Arc::new(ProfileSequence::new("chr1", ref_start, length))
    }

    #[test]
    fn singleton_hmm_has_two_cells() {
        let hmm = Hmm::from_profile_seq(seq(0, 10), matrix());
        assert_eq!(hmm.columns().len(), 1);
        assert_eq!(hmm.column(0).cells.len(), 2);
        assert_eq!(hmm.max_depth, 1);
    }

    #[test]
    fn fuse_rejects_overlapping_ranges() {
        let a = Hmm::from_profile_seq(seq(0, 10), matrix());
        let b = Hmm::from_profile_seq(seq(5, 10), matrix());
        assert!(matches!(Hmm::fuse(a, b), Err(Error::HmmMismatchRange { .. })));
    }

    #[test]
    fn fuse_bridges_gap_with_empty_column() {
        let a = Hmm::from_profile_seq(seq(0, 10), matrix());
        let b = Hmm::from_profile_seq(seq(20, 10), matrix());
        let fused = Hmm::fuse(a, b).unwrap();
        assert_eq!(fused.ref_start, 0);
        assert_eq!(fused.ref_length, 30);
        assert_eq!(fused.column_number, 3);
        let ids = fused.column_ids_in_order();
        assert_eq!(ids.len(), 3);
        assert_eq!(fused.column(ids[1]).depth, 0);
    }

    #[test]
    fn fuse_without_gap_has_two_columns() {
        let a = Hmm::from_profile_seq(seq(0, 10), matrix());
        let b = Hmm::from_profile_seq(seq(10, 10), matrix());
        let fused = Hmm::fuse(a, b).unwrap();
        assert_eq!(fused.column_number, 2);
        assert_eq!(fused.ref_length, 20);
    }

    #[test]
    fn align_columns_pads_and_splits() {
        let mut a = Hmm::from_profile_seq(seq(0, 10), matrix());
        let mut b = Hmm::from_profile_seq(seq(3, 10), matrix());
        Hmm::align_columns(&mut a, &mut b).unwrap();
        assert_eq!(a.ref_start, 0);
        assert_eq!(b.ref_start, 0);
        assert_eq!(a.end(), 13);
        assert_eq!(b.end(), 13);
        let a_ids = a.column_ids_in_order();
        let b_ids = b.column_ids_in_order();
        assert_eq!(a_ids.len(), b_ids.len());
        for (&ai, &bi) in a_ids.iter().zip(b_ids.iter()) {
            assert_eq!(a.column(ai).ref_start, b.column(bi).ref_start);
            assert_eq!(a.column(ai).length, b.column(bi).length);
        }
    }

    #[test]
    fn align_columns_is_idempotent() {
        let mut a = Hmm::from_profile_seq(seq(0, 10), matrix());
        let mut b = Hmm::from_profile_seq(seq(3, 10), matrix());
        Hmm::align_columns(&mut a, &mut b).unwrap();
        let a_before = a.column_ids_in_order().len();
        let b_before = b.column_ids_in_order().len();
        Hmm::align_columns(&mut a, &mut b).unwrap();
        assert_eq!(a.column_ids_in_order().len(), a_before);
        assert_eq!(b.column_ids_in_order().len(), b_before);
    }

    #[test]
    fn cross_product_multiplies_depths_and_unions_seqs() {
        let mut a = Hmm::from_profile_seq(seq(0, 10), matrix());
        let mut b = Hmm::from_profile_seq(seq(0, 10), matrix());
        Hmm::align_columns(&mut a, &mut b).unwrap();
        let cp = Hmm::cross_product(&a, &b).unwrap();
        assert_eq!(cp.profile_seqs.len(), 2);
        assert_eq!(cp.column(cp.first_column.unwrap()).depth, 2);
        assert_eq!(cp.column(cp.first_column.unwrap()).cells.len(), 4);
    }
}
