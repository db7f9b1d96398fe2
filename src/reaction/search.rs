//! Search program generation.
//!
//! Cross-constrained inputs of a reaction are searched by a small linear
//! program, precomputed when the site is installed. Independent inputs
//! never appear in it; they are picked separately, without backtracking.
use std::collections::HashMap;

use super::Reaction;

/// One instruction of the match-search program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SearchOp {
    /// Iterate candidate values for input `i` consistent with previous
    /// choices; for repeated inputs, already-chosen copies are skipped.
    ChooseMol(usize),
    /// Filter the current branch by cross guard `k`.
    ConstrainGuard(usize),
    /// End of a connected component: choices made before this point are
    /// final for the branch.
    CloseGroup,
}

/// Per-input classification: true when the input participates in no cross
/// guard and, if its molecule is repeated, every occurrence is irrefutable
/// and unguarded.
pub(crate) fn independent_inputs(rx: &Reaction) -> Vec<bool> {
    let n = rx.inputs.len();
    let mut in_guard = vec![false; n];
    for g in &rx.cross_guards {
        for &ix in &g.indices {
            in_guard[ix] = true;
        }
    }

    let mut occurrences: HashMap<usize, Vec<usize>> = HashMap::new();
    for (ix, input) in rx.inputs.iter().enumerate() {
        occurrences.entry(input.mol.uid()).or_default().push(ix);
    }

    (0..n)
        .map(|ix| {
            if in_guard[ix] {
                return false;
            }
            let occ = &occurrences[&rx.inputs[ix].mol.uid()];
            occ.len() == 1
                || occ
                    .iter()
                    .all(|&o| !rx.inputs[o].pattern.is_refutable() && !in_guard[o])
        })
        .collect()
}

/// Generate the search program over the non-independent inputs of `rx`.
///
/// Connectivity: two inputs are connected when they share a cross guard or
/// consume the same (repeated) molecule. Within a component, inputs are
/// ordered by decreasing number of cross-group memberships, refutable
/// matchers later on ties; each guard is emitted immediately after the
/// last input it references; every component ends with `CloseGroup`.
pub(crate) fn build_program(rx: &Reaction) -> Vec<SearchOp> {
    let n = rx.inputs.len();
    let independent = independent_inputs(rx);
    let searched: Vec<usize> = (0..n).filter(|&ix| !independent[ix]).collect();
    if searched.is_empty() {
        return Vec::new();
    }

    // Union-find over all inputs; only searched ones end up grouped.
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    fn union(parent: &mut Vec<usize>, a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[rb] = ra;
        }
    }

    for g in &rx.cross_guards {
        for w in g.indices.windows(2) {
            union(&mut parent, w[0], w[1]);
        }
    }
    let mut occurrences: HashMap<usize, Vec<usize>> = HashMap::new();
    for &ix in &searched {
        occurrences
            .entry(rx.inputs[ix].mol.uid())
            .or_default()
            .push(ix);
    }
    for occ in occurrences.values() {
        for w in occ.windows(2) {
            union(&mut parent, w[0], w[1]);
        }
    }

    // Cross-group membership count: guards containing the input, plus one
    // when the molecule is repeated.
    let memberships: Vec<usize> = (0..n)
        .map(|ix| {
            let guards = rx
                .cross_guards
                .iter()
                .filter(|g| g.indices.contains(&ix))
                .count();
            let repeated = occurrences
                .get(&rx.inputs[ix].mol.uid())
                .map_or(false, |o| o.len() > 1);
            guards + repeated as usize
        })
        .collect();

    // Components keyed by root, ordered by their smallest input index.
    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for &ix in &searched {
        let root = find(&mut parent, ix);
        components.entry(root).or_default().push(ix);
    }
    let mut component_list: Vec<Vec<usize>> = components.into_iter().map(|(_, v)| v).collect();
    component_list.sort_by_key(|c| *c.iter().min().unwrap());

    let mut program = Vec::new();
    let mut chosen = vec![false; n];
    let mut guard_emitted = vec![false; rx.cross_guards.len()];
    for mut component in component_list {
        component.sort_by(|&a, &b| {
            memberships[b]
                .cmp(&memberships[a])
                .then(rx.inputs[a].pattern.is_refutable().cmp(&rx.inputs[b].pattern.is_refutable()))
                .then(a.cmp(&b))
        });
        for ix in component {
            program.push(SearchOp::ChooseMol(ix));
            chosen[ix] = true;
            for (k, g) in rx.cross_guards.iter().enumerate() {
                if !guard_emitted[k] && g.indices.iter().all(|&gi| chosen[gi]) {
                    guard_emitted[k] = true;
                    program.push(SearchOp::ConstrainGuard(k));
                }
            }
        }
        program.push(SearchOp::CloseGroup);
    }
    program
}
