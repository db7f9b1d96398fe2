//! Output shrinking.
//!
//! An emission inside a chooser block is conditional: it happens in one
//! clause out of several. When every clause of a chooser emits the same
//! molecule, the emission as a whole is unconditional and the per-clause
//! patterns merge (equal constants survive, anything else becomes
//! "other"). Shrinking repeats until nothing changes; one level of
//! chooser nesting is supported.
//!
//! The shrunken output list feeds livelock detection and static-molecule
//! validation; it never affects matching.
use std::collections::HashMap;

use super::{OutputDef, OutputEnv, OutputPattern};

pub(crate) fn shrink_outputs(outs: &[OutputDef]) -> Vec<OutputDef> {
    let mut current: Vec<OutputDef> = outs.to_vec();
    loop {
        let (next, changed) = shrink_once(current);
        current = next;
        if !changed {
            return current;
        }
    }
}

fn merge_patterns(defs: &[&OutputDef]) -> OutputPattern {
    let mut merged: Option<&super::ConstMatcher> = None;
    for d in defs {
        match &d.pattern {
            OutputPattern::Constant(c) => match merged {
                None => merged = Some(c),
                Some(m) if m.same(c) => {}
                Some(_) => return OutputPattern::Other,
            },
            OutputPattern::Other => return OutputPattern::Other,
        }
    }
    match merged {
        Some(c) => OutputPattern::Constant(c.clone()),
        None => OutputPattern::Other,
    }
}

fn shrink_once(outs: Vec<OutputDef>) -> (Vec<OutputDef>, bool) {
    // Only single-level chooser emissions are merge candidates.
    let mut groups: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (ix, out) in outs.iter().enumerate() {
        if let [OutputEnv::ChooserClause { id, .. }] = out.envs.as_slice() {
            groups.entry((*id, out.mol.uid())).or_default().push(ix);
        }
    }

    let mut consumed: Vec<bool> = vec![false; outs.len()];
    let mut merged_outputs: Vec<OutputDef> = Vec::new();
    for ((_, _), members) in groups {
        let total = match outs[members[0]].envs[0] {
            OutputEnv::ChooserClause { total, .. } => total,
            _ => continue,
        };
        // One representative emission per clause; bail unless every
        // clause is covered.
        let mut per_clause: Vec<Option<usize>> = vec![None; total];
        for &ix in &members {
            if let OutputEnv::ChooserClause { clause, total: t, .. } = outs[ix].envs[0] {
                if t == total && clause < total && per_clause[clause].is_none() {
                    per_clause[clause] = Some(ix);
                }
            }
        }
        if per_clause.iter().all(|c| c.is_some()) {
            let picked: Vec<usize> = per_clause.into_iter().map(|c| c.unwrap()).collect();
            let defs: Vec<&OutputDef> = picked.iter().map(|&ix| &outs[ix]).collect();
            merged_outputs.push(OutputDef {
                mol: outs[picked[0]].mol.clone(),
                pattern: merge_patterns(&defs),
                envs: Vec::new(),
            });
            for ix in picked {
                consumed[ix] = true;
            }
        }
    }

    let changed = !merged_outputs.is_empty();
    let mut next: Vec<OutputDef> = outs
        .into_iter()
        .zip(consumed)
        .filter_map(|(o, used)| if used { None } else { Some(o) })
        .collect();
    next.append(&mut merged_outputs);
    (next, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::Molecule;

    fn render(outs: &[OutputDef]) -> Vec<String> {
        let mut v: Vec<String> = outs
            .iter()
            .map(|o| {
                let pat = match &o.pattern {
                    OutputPattern::Constant(c) => format!("={}", c.show()),
                    OutputPattern::Other => "*".to_string(),
                };
                format!("{}({}) envs:{}", o.mol.name(), pat, o.envs.len())
            })
            .collect();
        v.sort();
        v
    }

    #[test]
    fn full_coverage_merges_to_unconditional() {
        let m = Molecule::<i32>::new("m");
        let outs = vec![
            m.emits_value(1).in_clause(0, 0, 2),
            m.emits_value(1).in_clause(0, 1, 2),
        ];
        let shrunk = shrink_outputs(&outs);
        assert_eq!(render(&shrunk), vec!["m(=1) envs:0"]);
    }

    #[test]
    fn unequal_constants_merge_to_other() {
        let m = Molecule::<i32>::new("m");
        let outs = vec![
            m.emits_value(1).in_clause(0, 0, 2),
            m.emits_value(2).in_clause(0, 1, 2),
        ];
        let shrunk = shrink_outputs(&outs);
        assert_eq!(render(&shrunk), vec!["m(*) envs:0"]);
    }

    #[test]
    fn partial_coverage_is_kept_conditional() {
        let m = Molecule::<i32>::new("m");
        let n = Molecule::<i32>::new("n");
        let outs = vec![
            m.emits_value(1).in_clause(0, 0, 2),
            n.emits_value(9).in_clause(0, 1, 2),
        ];
        let shrunk = shrink_outputs(&outs);
        assert_eq!(
            render(&shrunk),
            vec!["m(=1) envs:1", "n(=9) envs:1"]
        );
    }

    #[test]
    fn surplus_emissions_survive_the_merge() {
        let m = Molecule::<i32>::new("m");
        let outs = vec![
            m.emits_value(1).in_clause(0, 0, 2),
            m.emits_value(1).in_clause(0, 1, 2),
            m.emits_value(7).in_clause(0, 1, 2),
        ];
        let shrunk = shrink_outputs(&outs);
        assert_eq!(render(&shrunk), vec!["m(=1) envs:0", "m(=7) envs:1"]);
    }

    #[test]
    fn shrink_is_idempotent() {
        let m = Molecule::<i32>::new("m");
        let n = Molecule::<i32>::new("n");
        let outs = vec![
            m.emits_value(1).in_clause(0, 0, 2),
            m.emits_value(2).in_clause(0, 1, 2),
            n.emits().in_call(),
            m.emits(),
        ];
        let once = shrink_outputs(&outs);
        let twice = shrink_outputs(&once);
        assert_eq!(render(&once), render(&twice));
    }
}
