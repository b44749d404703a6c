//! Synthetic haplotype/read simulator shared by the scenario tests.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rphmm::{ProfileSequence, SubstitutionMatrix, ALPHABET_SIZE};

/// A reproducible RNG for a scenario test.
pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A simulated locus: a reference plus two divergent haplotype sequences
/// (as base indices, not profile bytes) agreeing everywhere except at
/// heterozygous sites.
pub struct SimulatedLocus {
    pub ref_name: String,
    pub ref_length: u64,
    pub haplotype1: Vec<usize>,
    pub haplotype2: Vec<usize>,
}

pub fn simulate_haplotypes(rng: &mut StdRng, ref_name: &str, ref_length: u64, het_rate: f64) -> SimulatedLocus {
    let mut haplotype1 = Vec::with_capacity(ref_length as usize);
    let mut haplotype2 = Vec::with_capacity(ref_length as usize);
    for _ in 0..ref_length {
        let base: usize = rng.gen_range(0..ALPHABET_SIZE);
        haplotype1.push(base);
        if rng.gen::<f64>() < het_rate {
            let mut alt = rng.gen_range(0..ALPHABET_SIZE);
            while alt == base {
                alt = rng.gen_range(0..ALPHABET_SIZE);
            }
            haplotype2.push(alt);
        } else {
            haplotype2.push(base);
        }
    }
    SimulatedLocus { ref_name: ref_name.to_string(), ref_length, haplotype1, haplotype2 }
}

/// Draw one noisy read of `read_length` from haplotype `hap` (0 or 1) of
/// `locus`, starting at reference offset `ref_start`, with i.i.d.
/// substitution errors at `err_rate` and a near-certain (but not quite
/// 255) quantized confidence, the way real base callers report it.
pub fn simulate_read(
    rng: &mut StdRng,
    locus: &SimulatedLocus,
    hap: usize,
    ref_start: u64,
    read_length: u64,
    err_rate: f64,
) -> Arc<ProfileSequence> {
    let haplotype = if hap == 0 { &locus.haplotype1 } else { &locus.haplotype2 };
    let mut probs = vec![0u8; (read_length as usize) * ALPHABET_SIZE];
    for i in 0..read_length as usize {
        let true_base = haplotype[ref_start as usize + i];
        let observed = if rng.gen::<f64>() < err_rate {
            let mut alt = rng.gen_range(0..ALPHABET_SIZE);
            while alt == true_base {
                alt = rng.gen_range(0..ALPHABET_SIZE);
            }
            alt
        } else {
            true_base
        };
        let confidence = 250 + rng.gen_range(0..6) as u8;
        probs[i * ALPHABET_SIZE + observed] = confidence;
    }
    Arc::new(ProfileSequence::from_probs(locus.ref_name.clone(), ref_start, read_length, probs))
}

/// `coverage` fixed-length reads per non-overlapping window spanning the
/// whole locus (scenarios 1 and 2). Returns the reads alongside, in the
/// same order, which haplotype each was truly drawn from.
pub fn simulate_fixed_coverage(
    rng: &mut StdRng,
    locus: &SimulatedLocus,
    coverage: usize,
    read_length: u64,
    err_rate: f64,
) -> (Vec<Arc<ProfileSequence>>, Vec<usize>) {
    let n_windows = (locus.ref_length / read_length).max(1);
    let mut reads = Vec::new();
    let mut truth = Vec::new();
    for w in 0..n_windows {
        let ref_start = (w * read_length).min(locus.ref_length - read_length);
        for _ in 0..coverage {
            let hap = rng.gen_range(0..2);
            reads.push(simulate_read(rng, locus, hap, ref_start, read_length, err_rate));
            truth.push(hap);
        }
    }
    (reads, truth)
}

/// Reads of random length in `[min_len, max_len]` at random overlapping
/// start positions, at roughly `coverage`x total depth (scenario 3).
pub fn simulate_variable_length_coverage(
    rng: &mut StdRng,
    locus: &SimulatedLocus,
    coverage: usize,
    min_len: u64,
    max_len: u64,
    err_rate: f64,
) -> Vec<Arc<ProfileSequence>> {
    let mean_len = (min_len + max_len) / 2;
    let n_reads = (locus.ref_length / mean_len).max(1) * coverage as u64;
    let mut reads = Vec::with_capacity(n_reads as usize);
    for _ in 0..n_reads {
        let read_length = rng.gen_range(min_len..=max_len).min(locus.ref_length);
        let max_start = locus.ref_length - read_length;
        let ref_start = if max_start == 0 { 0 } else { rng.gen_range(0..=max_start) };
        let hap = rng.gen_range(0..2);
        reads.push(simulate_read(rng, locus, hap, ref_start, read_length, err_rate));
    }
    reads
}

pub fn uniform_matrix(err_rate: f64) -> Arc<SubstitutionMatrix> {
    Arc::new(SubstitutionMatrix::uniform_error(ALPHABET_SIZE, err_rate))
}
