//! Match search over the bags of one site.
//!
//! Each reaction gets a [`MatchPlan`] at install time: which bag serves
//! each input, the multiset requirements, which inputs are independent,
//! and the search program for the cross-constrained remainder. A
//! scheduling attempt runs `try_match` per reaction under the site lock;
//! a successful match returns one bag index per input, which the site
//! then removes atomically.
//!
//! [`MatchPlan`]: struct.MatchPlan.html
use std::any::Any;
use std::collections::HashMap;

use crate::bag::Bag;
use crate::reaction::{build_program, independent_inputs, Reaction, SearchOp};

pub(crate) struct MatchPlan {
    /// Site molecule index serving each input.
    pub(crate) mol_of_input: Vec<usize>,
    /// Required copies per site molecule index.
    pub(crate) required: Vec<(usize, usize)>,
    /// Inputs picked without backtracking, in declaration order.
    pub(crate) independent: Vec<usize>,
    /// Search program over the cross-constrained inputs.
    pub(crate) program: Vec<SearchOp>,
}

impl MatchPlan {
    pub(crate) fn build(rx: &Reaction, mol_index_of: &HashMap<usize, usize>) -> Self {
        let mol_of_input: Vec<usize> = rx
            .inputs
            .iter()
            .map(|i| mol_index_of[&i.mol.uid()])
            .collect();
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for &m in &mol_of_input {
            *counts.entry(m).or_insert(0) += 1;
        }
        let mut required: Vec<(usize, usize)> = counts.into_iter().collect();
        required.sort_unstable();
        let independent: Vec<usize> = independent_inputs(rx)
            .into_iter()
            .enumerate()
            .filter_map(|(ix, indep)| if indep { Some(ix) } else { None })
            .collect();
        MatchPlan {
            mol_of_input,
            required,
            independent,
            program: build_program(rx),
        }
    }
}

/// Bag indices already claimed for `mol` by other inputs of the same
/// reaction.
fn claimed(picks: &[Option<usize>], plan: &MatchPlan, mol: usize, except: usize) -> Vec<usize> {
    picks
        .iter()
        .enumerate()
        .filter_map(|(input_ix, pick)| match pick {
            Some(bag_ix) if input_ix != except && plan.mol_of_input[input_ix] == mol => {
                Some(*bag_ix)
            }
            _ => None,
        })
        .collect()
}

/// Search the bags for a runnable instance of `rx`. Returns one bag index
/// per input. The static guard is the caller's business.
pub(crate) fn try_match(
    rx: &Reaction,
    plan: &MatchPlan,
    bags: &[Box<dyn Bag>],
    pipelined: &[bool],
) -> Option<Vec<usize>> {
    for &(mol, count) in &plan.required {
        if bags[mol].count() < count {
            return None;
        }
    }

    let mut picks: Vec<Option<usize>> = vec![None; rx.inputs.len()];

    // Independent inputs: a conditional pick scans (pipelined molecules
    // expose only the first live value), an irrefutable pick takes the
    // first free copies.
    for &input_ix in &plan.independent {
        let mol = plan.mol_of_input[input_ix];
        let bag = &bags[mol];
        let pattern = &rx.inputs[input_ix].pattern;
        let head_only = pipelined[mol] && pattern.is_refutable();
        let used = claimed(&picks, plan, mol, input_ix);
        let mut found = None;
        for bag_ix in 0..bag.count() {
            if used.contains(&bag_ix) {
                continue;
            }
            let probe = match bag.probe(bag_ix) {
                Some(p) => p,
                None => break,
            };
            if probe.stale {
                continue;
            }
            if pattern.admits(probe.value) {
                found = Some(bag_ix);
            }
            if head_only || found.is_some() {
                break;
            }
        }
        picks[input_ix] = Some(found?);
    }

    if !plan.program.is_empty() && !run_program(&plan.program, 0, rx, plan, bags, &mut picks) {
        return None;
    }

    Some(picks.into_iter().map(|p| p.unwrap()).collect())
}

fn run_program(
    ops: &[SearchOp],
    pos: usize,
    rx: &Reaction,
    plan: &MatchPlan,
    bags: &[Box<dyn Bag>],
    picks: &mut Vec<Option<usize>>,
) -> bool {
    if pos == ops.len() {
        return true;
    }
    match ops[pos] {
        SearchOp::ChooseMol(input_ix) => {
            let mol = plan.mol_of_input[input_ix];
            let pattern = &rx.inputs[input_ix].pattern;
            for bag_ix in 0..bags[mol].count() {
                if claimed(picks, plan, mol, input_ix).contains(&bag_ix) {
                    continue;
                }
                let admitted = match bags[mol].probe(bag_ix) {
                    Some(probe) => !probe.stale && pattern.admits(probe.value),
                    None => false,
                };
                if !admitted {
                    continue;
                }
                picks[input_ix] = Some(bag_ix);
                if run_program(ops, pos + 1, rx, plan, bags, picks) {
                    return true;
                }
                picks[input_ix] = None;
            }
            false
        }
        SearchOp::ConstrainGuard(k) => {
            let guard = &rx.cross_guards[k];
            let values: Vec<&dyn Any> = guard
                .indices
                .iter()
                .map(|&gi| {
                    let mol = plan.mol_of_input[gi];
                    bags[mol]
                        .probe(picks[gi].expect("guard evaluated before its inputs"))
                        .expect("picked index vanished during search")
                        .value
                })
                .collect();
            (guard.pred)(&values) && run_program(ops, pos + 1, rx, plan, bags, picks)
        }
        SearchOp::CloseGroup => run_program(ops, pos + 1, rx, plan, bags, picks),
    }
}
