//! Tiling paths and the recursive pairwise merge driver (`spec.md` §4.9).
//!
//! Arbitrarily overlapping HMMs are first packed into non-overlapping
//! tiling paths, then paths are merged pairwise (recursively halving, so
//! disjoint halves can run in parallel) until one path of non-overlapping
//! HMMs covering every input remains.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::errors::Error;
use crate::forward_backward::{forward_backward, prune};
use crate::hmm::Hmm;
use crate::params::Params;
use crate::profile::ProfileSequence;

/// Lexicographic on `(refName, refStart, refLength)`.
fn compare_hmms(a: &Hmm, b: &Hmm) -> Ordering {
    a.ref_name
        .cmp(&b.ref_name)
        .then(a.ref_start.cmp(&b.ref_start))
        .then(a.ref_length.cmp(&b.ref_length))
}

fn overlaps(a: &Hmm, b: &Hmm) -> bool {
    a.ref_name == b.ref_name && a.ref_start.max(b.ref_start) < a.end().min(b.end())
}

/// Greedily pack `hmms` into maximal non-overlapping chains. Each round
/// picks the smallest remaining HMM to start a chain, then repeatedly
/// extends it with the closest remaining HMM on the same reference whose
/// `ref_start` is at or past the chain's current end; the round's
/// leftovers seed the next chain.
fn tiling_paths(mut hmms: Vec<Hmm>) -> Vec<Vec<Hmm>> {
    hmms.sort_by(compare_hmms);
    let mut remaining = hmms;
    let mut paths = Vec::new();

    while !remaining.is_empty() {
        let first = remaining.remove(0);
        let ref_name = first.ref_name.clone();
        let mut end = first.end();
        let mut chain = vec![first];

        let mut i = 0;
        while i < remaining.len() {
            if remaining[i].ref_name == ref_name && remaining[i].ref_start >= end {
                let next = remaining.remove(i);
                end = next.end();
                chain.push(next);
                i = 0;
            } else {
                i += 1;
            }
        }
        paths.push(chain);
    }
    paths
}

/// A group of HMMs from one or both paths that transitively overlap.
/// `Singleton` passes through unchanged; `Paired` holds, from each path,
/// the (already internally non-overlapping) sub-chain to fuse before
/// aligning and cross-producting.
enum Component {
    Singleton(Hmm),
    Paired { left: Vec<Hmm>, right: Vec<Hmm> },
}

/// Two-pointer scan grouping overlapping HMMs from `path1` and `path2`
/// under the transitive closure of the overlap relation (`spec.md` §4.9
/// "Overlap components of two paths").
fn overlap_components(path1: Vec<Hmm>, path2: Vec<Hmm>) -> Vec<Component> {
    let mut left: VecDeque<Hmm> = path1.into();
    let mut right: VecDeque<Hmm> = path2.into();
    let mut components = Vec::new();

    while !left.is_empty() || !right.is_empty() {
        let should_pair = matches!((left.front(), right.front()), (Some(l), Some(r)) if overlaps(l, r));

        if should_pair {
            let l0 = left.pop_front().unwrap();
            let r0 = right.pop_front().unwrap();
            let mut end = l0.end().max(r0.end());
            let mut l_group = vec![l0];
            let mut r_group = vec![r0];
            loop {
                let mut grew = false;
                if left.front().map_or(false, |l| l.ref_start < end) {
                    let l = left.pop_front().unwrap();
                    end = end.max(l.end());
                    l_group.push(l);
                    grew = true;
                }
                if right.front().map_or(false, |r| r.ref_start < end) {
                    let r = right.pop_front().unwrap();
                    end = end.max(r.end());
                    r_group.push(r);
                    grew = true;
                }
                if !grew {
                    break;
                }
            }
            components.push(Component::Paired { left: l_group, right: r_group });
        } else {
            let take_left = match (left.front(), right.front()) {
                (Some(l), Some(r)) => compare_hmms(l, r) == Ordering::Less,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => unreachable!("loop condition guarantees at least one side is non-empty"),
            };
            let singleton = if take_left { left.pop_front() } else { right.pop_front() };
            components.push(Component::Singleton(singleton.unwrap()));
        }
    }
    components
}

fn fuse_chain(chain: Vec<Hmm>) -> Result<Hmm, Error> {
    let mut iter = chain.into_iter();
    let mut acc = iter.next().expect("bug: overlap component holds an empty chain");
    for next in iter {
        acc = Hmm::fuse(acc, next)?;
    }
    Ok(acc)
}

/// Merge two tiling paths into one (`spec.md` §4.9 "Merge two paths"):
/// fuse, align, cross-product and forward-backward-prune every
/// overlapping component, pass singletons through, and return the result
/// sorted by coordinate.
fn merge_two_paths(path1: Vec<Hmm>, path2: Vec<Hmm>, params: &Params) -> Result<Vec<Hmm>, Error> {
    let components = overlap_components(path1, path2);
    let mut result = Vec::with_capacity(components.len());
    for component in components {
        match component {
            Component::Singleton(hmm) => result.push(hmm),
            Component::Paired { left, right } => {
                let mut a = fuse_chain(left)?;
                let mut b = fuse_chain(right)?;
                Hmm::align_columns(&mut a, &mut b)?;
                let mut cp = Hmm::cross_product(&a, &b)?;
                forward_backward(&mut cp);
                prune(&mut cp, params);
                result.push(cp);
            }
        }
    }
    result.sort_by(compare_hmms);
    Ok(result)
}

/// Recursive pairwise halving merge of `paths` (`spec.md` §4.9 "Merge N
/// paths"); the two halves are independent and run concurrently via
/// [`rayon::join`]. Checks `paths.len() <= min(maxCoverageDepth, 64)`
/// once, at the top level, since recursion only ever shrinks the count.
pub fn merge_n_paths(paths: Vec<Vec<Hmm>>, params: &Params) -> Result<Vec<Hmm>, Error> {
    let max_depth = params.max_coverage_depth.min(crate::bitops::MAX_DEPTH);
    if paths.len() > max_depth {
        return Err(Error::CoverageExceeded { depth: paths.len(), max: max_depth });
    }
    merge_n_paths_inner(paths, params)
}

fn merge_n_paths_inner(mut paths: Vec<Vec<Hmm>>, params: &Params) -> Result<Vec<Hmm>, Error> {
    match paths.len() {
        0 => Ok(Vec::new()),
        1 => Ok(paths.pop().unwrap()),
        n => {
            let right = paths.split_off(n / 2);
            let left = paths;
            let (left_result, right_result) =
                rayon::join(|| merge_n_paths_inner(left, params), || merge_n_paths_inner(right, params));
            merge_two_paths(left_result?, right_result?, params)
        }
    }
}

/// Build one singleton HMM per profile sequence, tile them, and merge all
/// tiling paths into the final non-overlapping set (`spec.md` §6
/// `getRPHmms`, the primary entry point).
pub fn get_rp_hmms(profile_seqs: Vec<Arc<ProfileSequence>>, params: &Params) -> Result<Vec<Hmm>, Error> {
    let hmms: Vec<Hmm> = profile_seqs
        .into_iter()
        .map(|seq| {
            let matrix = params.substitution_matrix_for(seq.ref_name()).clone();
            Hmm::from_profile_seq(seq, matrix)
        })
        .collect();
    log::debug!("tiling {} singleton hmms", hmms.len());
    let paths = tiling_paths(hmms);
    log::debug!("built {} tiling paths", paths.len());
    let mut result = merge_n_paths(paths, params)?;
    // Recursive merging already ran forward/backward on every HMM it
    // produced by cross-product, but an input path with nothing to merge
    // passes straight through untouched; re-run here unconditionally so
    // every returned HMM's totals are normalized (`spec.md` §9 open
    // question #3: forward/backward runs once per merge for pruning, and
    // once more at the end for renormalization).
    for hmm in result.iter_mut() {
        forward_backward(hmm);
    }
    Ok(result)
}

/// Tile `profile_seqs` and discard whole paths, deepest first, until the
/// remaining tiling depth is at most `maxCoverageDepth` (`spec.md` §6
/// `filterReadsByCoverageDepth`). Tiling packs the densest region into
/// the earliest paths, so the paths built last hold the comparatively
/// shallow leftovers; those are the ones dropped.
pub fn filter_reads_by_coverage_depth(
    profile_seqs: Vec<Arc<ProfileSequence>>,
    params: &Params,
) -> (Vec<Arc<ProfileSequence>>, Vec<Arc<ProfileSequence>>) {
    let hmms: Vec<Hmm> = profile_seqs
        .into_iter()
        .map(|seq| {
            let matrix = params.substitution_matrix_for(seq.ref_name()).clone();
            Hmm::from_profile_seq(seq, matrix)
        })
        .collect();
    let mut paths = tiling_paths(hmms);
    let max_depth = params.max_coverage_depth.min(crate::bitops::MAX_DEPTH);

    let mut discarded = Vec::new();
    while paths.len() > max_depth {
        if let Some(dropped) = paths.pop() {
            for hmm in dropped {
                discarded.extend(hmm.profile_seqs);
            }
        }
    }
    let mut kept = Vec::new();
    for path in paths {
        for hmm in path {
            kept.extend(hmm.profile_seqs);
        }
    }
    log::debug!("kept {} reads, discarded {} over coverage depth {}", kept.len(), discarded.len(), max_depth);
    (kept, discarded)
}
