//! Emission probabilities from bit-packed partitions (`spec.md` §4.5).
//!
//! The central trick of the engine: instead of iterating over a column's
//! spanning reads for every candidate partition, we precompute one
//! *bit-count vector* per `(position, base, quantization bit)` — a 64-bit
//! word whose bit `i` says whether read `i` has that bit set in its
//! quantized emission byte — and then recover any partition's expected
//! base counts via a population count against that word.

use bio::stats::LogProb;

use crate::bitops::Partition;
use crate::column::Column;
use crate::profile::{SubstitutionMatrix, ALPHABET_SIZE};

const BITS_PER_BYTE: usize = 8;

/// Precomputed `BCV(c, pos, k, b)` for every position/base/bit of a
/// column, built once per column per forward or backward pass
/// (`spec.md` §4.7 step 1).
pub struct BitCountVectors {
    length: usize,
    /// Flattened `[pos][k][b]`, row-major.
    data: Vec<u64>,
}

impl BitCountVectors {
    /// Compute the bit-count vectors for `column`.
    ///
    /// The reduction across reads is a bitwise OR: bit `i` of the vector
    /// is set iff read `i` has bit `b` set at `(pos, k)`. A naive `&=`
    /// reduction would zero the vector unconditionally; `|=` is correct.
    pub fn compute(column: &Column) -> Self {
        let length = column.length as usize;
        let mut data = vec![0u64; length * ALPHABET_SIZE * BITS_PER_BYTE];
        for (i, (seq, &offset)) in column.seq_headers.iter().zip(column.seqs.iter()).enumerate() {
            let probs = seq.probs();
            for pos in 0..length {
                for k in 0..ALPHABET_SIZE {
                    let byte = probs[offset + pos * ALPHABET_SIZE + k];
                    for b in 0..BITS_PER_BYTE {
                        let bit = (byte >> b) & 1;
                        if bit == 1 {
                            data[Self::index(length, pos, k, b)] |= 1u64 << i;
                        }
                    }
                }
            }
        }
        BitCountVectors { length, data }
    }

    fn index(length: usize, pos: usize, k: usize, b: usize) -> usize {
        debug_assert!(pos < length);
        (pos * ALPHABET_SIZE + k) * BITS_PER_BYTE + b
    }

    fn get(&self, pos: usize, k: usize, b: usize) -> u64 {
        self.data[Self::index(self.length, pos, k, b)]
    }

    /// `E(pos, k, P)`: expected number of reads carrying base `k` at
    /// `pos` under partition `P`, clamped to `[0, depth]`.
    pub fn expected_count(&self, pos: usize, k: usize, partition: Partition, depth: usize) -> f64 {
        if depth == 0 {
            return 0.0;
        }
        let mut total = 0u32;
        for b in 0..BITS_PER_BYTE {
            let masked = self.get(pos, k, b) & partition;
            total += masked.count_ones() * (1u32 << b);
        }
        (total as f64 / (255.0 * depth as f64)).clamp(0.0, depth as f64)
    }
}

/// `L(c, pos, P)`: the per-position log-probability under partition `P`.
fn position_log_prob(
    bcv: &BitCountVectors,
    pos: usize,
    partition: Partition,
    depth: usize,
    substitution_matrix: &SubstitutionMatrix,
) -> LogProb {
    let per_src: Vec<LogProb> = (0..ALPHABET_SIZE)
        .map(|src| {
            let mut acc = 0.0;
            for k in 0..ALPHABET_SIZE {
                acc += substitution_matrix.get(src, k) * bcv.expected_count(pos, k, partition, depth);
            }
            LogProb(acc)
        })
        .collect();
    LogProb::ln_sum_exp(&per_src)
}

/// Column log-probability under partition `P`, summed over every
/// position in the column.
pub fn partition_log_prob(
    column: &Column,
    bcv: &BitCountVectors,
    partition: Partition,
    substitution_matrix: &SubstitutionMatrix,
) -> LogProb {
    let mut total = LogProb::ln_one();
    for pos in 0..column.length as usize {
        total = total + position_log_prob(bcv, pos, partition, column.depth, substitution_matrix);
    }
    total
}

/// `emit(c, cell)`: the cell's emission log-probability, summing the
/// column log-probability under the cell's partition and under its
/// haplotype-2 complement (`spec.md` §4.5).
pub fn emit(
    column: &Column,
    bcv: &BitCountVectors,
    partition: Partition,
    substitution_matrix: &SubstitutionMatrix,
) -> LogProb {
    let complement = crate::bitops::complement(partition, column.depth as u32);
    partition_log_prob(column, bcv, partition, substitution_matrix)
        + partition_log_prob(column, bcv, complement, substitution_matrix)
}
