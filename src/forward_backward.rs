//! Forward/backward message passing, posteriors, pruning and the
//! maximum-posterior traceback (`spec.md` §4.7, §4.8).

use bio::stats::LogProb;

use crate::column::{Cell, ColumnId};
use crate::emission::{self, BitCountVectors};
use crate::errors::Error;
use crate::hmm::Hmm;
use crate::merge_column::MergeColumnId;
use crate::params::Params;

fn reset_forward(hmm: &mut Hmm) {
    hmm.forward_log_prob = LogProb::ln_zero();
    for col in hmm.columns.iter_mut() {
        col.forward_log_prob = LogProb::ln_zero();
        for cell in col.cells.iter_mut() {
            cell.forward_log_prob = LogProb::ln_zero();
        }
    }
    for mc in hmm.merge_columns.iter_mut() {
        for cell in mc.cells.iter_mut() {
            cell.forward_log_prob = LogProb::ln_zero();
        }
    }
}

fn reset_backward(hmm: &mut Hmm) {
    hmm.backward_log_prob = LogProb::ln_zero();
    for col in hmm.columns.iter_mut() {
        col.backward_log_prob = LogProb::ln_zero();
        for cell in col.cells.iter_mut() {
            cell.backward_log_prob = LogProb::ln_zero();
        }
    }
    for mc in hmm.merge_columns.iter_mut() {
        for cell in mc.cells.iter_mut() {
            cell.backward_log_prob = LogProb::ln_zero();
        }
    }
}

/// Head-to-tail message pass (`spec.md` §4.7 step 2). At a column's head
/// cell seeds from the previous merge cell (or `ln_one()` at the HMM's
/// first column); the seed, multiplied by the cell's emission, both
/// becomes the cell's stored forward value and is pushed into the next
/// merge cell (or into `hmm.forward_log_prob` at the last column).
pub fn forward(hmm: &mut Hmm) {
    reset_forward(hmm);
    let col_ids = hmm.column_ids_in_order();
    for col_id in col_ids {
        log::trace!("forward: column {}", col_id);
        let bcv = BitCountVectors::compute(hmm.column(col_id));
        let prev_merge = hmm.column(col_id).prev_merge;
        let next_merge = hmm.column(col_id).next_merge;
        let n_cells = hmm.column(col_id).cells.len();
        let mut column_forward = LogProb::ln_zero();
        for cell_idx in 0..n_cells {
            let partition = hmm.column(col_id).cells[cell_idx].partition;
            let seed = match prev_merge {
                Some(pm) => match hmm.merge_column(pm).previous_merge_cell_of(&hmm.column(col_id).cells[cell_idx]) {
                    Some(mc) => mc.forward_log_prob,
                    None => LogProb::ln_zero(),
                },
                None => LogProb::ln_one(),
            };
            let emitted = emission::emit(hmm.column(col_id), &bcv, partition, &hmm.substitution_matrix);
            let forward = seed + emitted;
            hmm.column_mut(col_id).cells[cell_idx].forward_log_prob = forward;

            match next_merge {
                Some(nm) => {
                    if let Some(idx) = hmm.merge_column(nm).next_merge_cell_index_of(&hmm.column(col_id).cells[cell_idx]) {
                        let updated = hmm.merge_column(nm).cells[idx].forward_log_prob.ln_add_exp(forward);
                        hmm.merge_column_mut(nm).cells[idx].forward_log_prob = updated;
                    }
                }
                None => {
                    hmm.forward_log_prob = hmm.forward_log_prob.ln_add_exp(forward);
                }
            }
            column_forward = column_forward.ln_add_exp(forward);
        }
        hmm.column_mut(col_id).forward_log_prob = column_forward;
    }
    log::debug!("forward total: {:?}", hmm.forward_log_prob);
}

/// Tail-to-head message pass (`spec.md` §4.7 step 3). Unlike `forward`,
/// the value stored on the cell itself (`backward_log_prob`) is the bare
/// seed from the next merge cell, *not* combined with this column's
/// emission: that keeps the usual forward/backward convention that a
/// cell's backward value accounts only for what happens strictly after
/// it, so `cell.forward + cell.backward` double-counts no emission. The
/// combined `seed + emission` quantity is what propagates to the
/// previous merge cell and what the column total accumulates (this is
/// the fix to the earlier bug of re-deriving the column total from the
/// forward accumulator instead of from the backward one).
pub fn backward(hmm: &mut Hmm) {
    reset_backward(hmm);
    let col_ids = hmm.column_ids_in_order();
    for col_id in col_ids.into_iter().rev() {
        log::trace!("backward: column {}", col_id);
        let bcv = BitCountVectors::compute(hmm.column(col_id));
        let prev_merge = hmm.column(col_id).prev_merge;
        let next_merge = hmm.column(col_id).next_merge;
        let n_cells = hmm.column(col_id).cells.len();
        let mut column_backward = LogProb::ln_zero();
        for cell_idx in 0..n_cells {
            let partition = hmm.column(col_id).cells[cell_idx].partition;
            let seed = match next_merge {
                Some(nm) => match hmm.merge_column(nm).next_merge_cell_of(&hmm.column(col_id).cells[cell_idx]) {
                    Some(mc) => mc.backward_log_prob,
                    None => LogProb::ln_zero(),
                },
                None => LogProb::ln_one(),
            };
            hmm.column_mut(col_id).cells[cell_idx].backward_log_prob = seed;

            let emitted = emission::emit(hmm.column(col_id), &bcv, partition, &hmm.substitution_matrix);
            let combined = seed + emitted;

            match prev_merge {
                Some(pm) => {
                    if let Some(idx) = hmm.merge_column(pm).previous_merge_cell_index_of(&hmm.column(col_id).cells[cell_idx]) {
                        let updated = hmm.merge_column(pm).cells[idx].backward_log_prob.ln_add_exp(combined);
                        hmm.merge_column_mut(pm).cells[idx].backward_log_prob = updated;
                    }
                }
                None => {
                    hmm.backward_log_prob = hmm.backward_log_prob.ln_add_exp(combined);
                }
            }
            column_backward = column_backward.ln_add_exp(combined);
        }
        hmm.column_mut(col_id).backward_log_prob = column_backward;
    }
    log::debug!("backward total: {:?}", hmm.backward_log_prob);
}

/// The one composite operation client code calls: a forward pass followed
/// by a backward pass, leaving every cell and merge cell's posterior
/// ingredients populated.
pub fn forward_backward(hmm: &mut Hmm) {
    forward(hmm);
    backward(hmm);
}

/// `post(x, c) = exp(x.forward + x.backward - (c.forward + c.backward))`,
/// clamped to `[0, 1]` against floating-point drift.
pub fn cell_posterior(hmm: &Hmm, col_id: ColumnId, cell_idx: usize) -> f64 {
    let col = hmm.column(col_id);
    let cell = &col.cells[cell_idx];
    let numerator = cell.forward_log_prob + cell.backward_log_prob;
    let denom = col.forward_log_prob + col.backward_log_prob;
    (numerator - denom).0.exp().clamp(0.0, 1.0)
}

/// The merge-cell analog, normalized against its right column's total.
pub fn merge_cell_posterior(hmm: &Hmm, mc_id: MergeColumnId, cell_idx: usize) -> f64 {
    let mc = hmm.merge_column(mc_id);
    let cell = &mc.cells[cell_idx];
    let right_col = hmm.column(mc.next_column);
    let numerator = cell.forward_log_prob + cell.backward_log_prob;
    let denom = right_col.forward_log_prob + right_col.backward_log_prob;
    (numerator - denom).0.exp().clamp(0.0, 1.0)
}

/// Drop cells and merge cells whose posterior falls below
/// `params.posterior_probability_threshold`, skipping any column or
/// merge column shallower than `params.min_column_depth_to_filter`.
/// Never leaves a column or merge column entirely empty (`spec.md` §4.8):
/// if every cell would be pruned, the single highest-posterior cell is
/// kept instead. Must run after [`forward_backward`].
pub fn prune(hmm: &mut Hmm, params: &Params) {
    let col_ids = hmm.column_ids_in_order();
    for col_id in col_ids {
        let depth = hmm.column(col_id).depth;
        if depth < params.min_column_depth_to_filter {
            continue;
        }
        let n = hmm.column(col_id).cells.len();
        let posteriors: Vec<f64> = (0..n).map(|i| cell_posterior(hmm, col_id, i)).collect();
        let col = hmm.column_mut(col_id);
        let mut kept: Vec<Cell> = col
            .cells
            .iter()
            .cloned()
            .zip(posteriors.iter())
            .filter(|(_, &p)| p >= params.posterior_probability_threshold)
            .map(|(cell, _)| cell)
            .collect();
        if kept.is_empty() {
            let best = posteriors
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(i, _)| i)
                .expect("bug: column has no cells to prune");
            kept.push(col.cells[best].clone());
        }
        log::trace!("pruned column {}: {} -> {} cells", col_id, n, kept.len());
        col.cells = kept;
    }

    let mc_ids = hmm.merge_column_ids_in_order();
    for mc_id in mc_ids {
        let depth = hmm.merge_column(mc_id).depth();
        if depth < params.min_column_depth_to_filter {
            continue;
        }
        let n = hmm.merge_column(mc_id).cells.len();
        let posteriors: Vec<f64> = (0..n).map(|i| merge_cell_posterior(hmm, mc_id, i)).collect();
        let effective = if posteriors.iter().all(|&p| p < params.posterior_probability_threshold) {
            let best = posteriors
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(i, _)| i)
                .expect("bug: merge column has no cells to prune");
            let mut forced = vec![f64::NEG_INFINITY; n];
            forced[best] = f64::INFINITY;
            forced
        } else {
            posteriors
        };
        log::trace!("pruned merge column {}", mc_id);
        hmm.merge_column_mut(mc_id)
            .retain_posteriors(params.posterior_probability_threshold, &effective);
    }
}

/// A single step of the maximum-posterior state path: the cell at
/// `column` with index `cell_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRef {
    pub column: ColumnId,
    pub cell_index: usize,
}

/// Trace the maximum-forward-probability path from the last column back
/// to the first (`spec.md` §4.7 "Traceback"). Fails with
/// [`Error::TracebackInfeasible`] if pruning has removed every candidate
/// at some step, which signals the HMM was over-pruned.
pub fn forward_trace_back(hmm: &Hmm) -> Result<Vec<CellRef>, Error> {
    let col_ids = hmm.column_ids_in_order();
    let last_id = *col_ids.last().ok_or(Error::InvalidCoordinates)?;
    let last_col = hmm.column(last_id);
    let (tail_idx, _) = last_col
        .cells
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.forward_log_prob.0.partial_cmp(&b.1.forward_log_prob.0).unwrap())
        .ok_or(Error::TracebackInfeasible)?;

    let mut path = vec![CellRef { column: last_id, cell_index: tail_idx }];
    let mut cur_col = last_id;
    let mut cur_idx = tail_idx;

    loop {
        let prev_merge = match hmm.column(cur_col).prev_merge {
            Some(pm) => pm,
            None => break,
        };
        let tail_cell = &hmm.column(cur_col).cells[cur_idx];
        let m_idx = hmm
            .merge_column(prev_merge)
            .previous_merge_cell_index_of(tail_cell)
            .ok_or(Error::TracebackInfeasible)?;
        let prev_col_id = hmm.merge_column(prev_merge).prev_column;
        let prev_col = hmm.column(prev_col_id);
        let candidate = prev_col
            .cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| hmm.merge_column(prev_merge).next_merge_cell_index_of(cell) == Some(m_idx))
            .max_by(|a, b| a.1.forward_log_prob.0.partial_cmp(&b.1.forward_log_prob.0).unwrap())
            .map(|(idx, _)| idx)
            .ok_or(Error::TracebackInfeasible)?;

        path.push(CellRef { column: prev_col_id, cell_index: candidate });
        cur_col = prev_col_id;
        cur_idx = candidate;
    }

    path.reverse();
    log::debug!("traceback path length: {}", path.len());
    Ok(path)
}

/// Union, across every cell in `path`, the reads whose bit equals
/// `haplotype_index` (`0` or `1`) in that cell's partition (`spec.md` §6
/// `partitionSequencesByStatePath`).
pub fn partition_sequences_by_state_path(
    hmm: &Hmm,
    path: &[CellRef],
    haplotype_index: u8,
) -> Vec<std::sync::Arc<crate::profile::ProfileSequence>> {
    assert!(haplotype_index <= 1, "bug: haplotype_index must be 0 or 1");
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for step in path {
        let col = hmm.column(step.column);
        let partition = col.cells[step.cell_index].partition;
        for (local_idx, seq) in col.seq_headers.iter().enumerate() {
            let in_hap1 = crate::bitops::in_haplotype1(partition, local_idx as u32);
            let matches = in_hap1 == (haplotype_index == 1);
            if matches && seen.insert(std::sync::Arc::as_ptr(seq)) {
                result.push(seq.clone());
            }
        }
    }
    result
}
