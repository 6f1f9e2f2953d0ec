//! Deterministic enumeration of experimental settings.
//!
//! One setting = a non-empty subset of candidates, an ordering of that
//! subset over the guide paths, and a sample number. The enumeration order
//! (subsets by size then lexicographically, orderings lexicographically,
//! samples innermost) is part of the contract: the monotonic setting index
//! decides frame identity, so regenerating a given index must reproduce the
//! same configuration.

/// One concrete experimental configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    /// Monotonic index across the whole enumeration.
    pub index: usize,
    /// Pairs of (candidate, guide) indices; the i-th selected candidate is
    /// placed on the i-th guide.
    pub assignment: Vec<(usize, usize)>,
    /// Sample number within this configuration, 0-based.
    pub sample: usize,
}

impl Setting {
    /// Candidates selected in this setting, in assignment order.
    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.assignment.iter().map(|&(c, _)| c)
    }
}

/// Enumerate every setting for the given candidate/guide counts.
///
/// Subsets larger than `max_subset` (when given) or larger than the number
/// of guides are skipped.
pub fn enumerate_settings(
    n_candidates: usize,
    n_guides: usize,
    samples: usize,
    max_subset: Option<usize>,
) -> Vec<Setting> {
    let cap = max_subset.unwrap_or(n_candidates).min(n_guides);

    let mut out = Vec::new();
    let mut index = 0;
    for k in 1..=n_candidates.min(cap) {
        for subset in combinations(n_candidates, k) {
            for ordering in permutations(&subset) {
                for sample in 0..samples {
                    out.push(Setting {
                        index,
                        assignment: ordering
                            .iter()
                            .enumerate()
                            .map(|(guide, &candidate)| (candidate, guide))
                            .collect(),
                        sample,
                    });
                    index += 1;
                }
            }
        }
    }
    out
}

/// k-combinations of 0..n in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k == 0 || k > n {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        // Advance to the next combination, rightmost index first.
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if idx[i] != i + n - k {
                break;
            }
            if i == 0 {
                return out;
            }
        }
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// All orderings of the given items, lexicographic by position.
fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for tail in permutations(&rest) {
            let mut p = Vec::with_capacity(items.len());
            p.push(head);
            p.extend(tail);
            out.push(p);
        }
    }
    out
}
