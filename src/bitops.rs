//! Bit-packed partition operations (`spec.md` §4.1).
//!
//! A partition is a 64-bit word over the reads spanning a column: bit `i`
//! set means read `i` is assigned to haplotype 1, unset means haplotype 2.
//! Only the low `depth` bits of a partition are ever meaningful; callers
//! are responsible for masking with [`accept_mask`] before storing one in
//! a `Cell`.

/// A bipartition of the reads spanning a column or merge column.
pub type Partition = u64;

/// The largest depth (number of concurrently spanning reads) this engine
/// supports. `spec.md` Non-goals cap concurrent overlap at 64 reads.
pub const MAX_DEPTH: usize = 64;

/// Concatenate two partitions of widths `d1` and `d2` into one partition
/// of width `d1 + d2`, with `p1` occupying the high bits.
///
/// # Panics
/// Panics (in debug builds) if `d1 + d2 > 64` or either partition has
/// stray bits above its stated width.
pub fn merge(p1: Partition, p2: Partition, d1: u32, d2: u32) -> Partition {
    debug_assert!(d1 + d2 <= MAX_DEPTH as u32, "bug: merged depth overflows 64 bits");
    debug_assert_eq!(p1 & !accept_mask(d1), 0, "bug: p1 has bits above its depth");
    debug_assert_eq!(p2 & !accept_mask(d2), 0, "bug: p2 has bits above its depth");
    (p1 << d2) | p2
}

/// Project `p` onto the bits selected by `m`.
pub fn mask(p: Partition, m: Partition) -> Partition {
    p & m
}

/// Is read `i` assigned to haplotype 1 under partition `p`?
pub fn in_haplotype1(p: Partition, i: u32) -> bool {
    debug_assert!(i < MAX_DEPTH as u32);
    (p >> i) & 1 == 1
}

/// All-ones mask covering the low `d` bits (the full state space of a
/// column/merge-column of depth `d`).
pub fn accept_mask(d: u32) -> Partition {
    if d == 0 {
        0
    } else if d >= MAX_DEPTH as u32 {
        Partition::MAX
    } else {
        (1u64 << d) - 1
    }
}

/// The complementary haplotype-2 partition for a depth-`depth` cell.
pub fn complement(p: Partition, depth: u32) -> Partition {
    !p & accept_mask(depth)
}
