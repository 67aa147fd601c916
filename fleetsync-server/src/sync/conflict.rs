use super::types::{ChangeEntry, Conflict, ConflictChoice, RootPlan};
use std::collections::{BTreeMap, BTreeSet};

/// Paths written in both directions of one root, sorted by path.
///
/// A delete on one side against a write on the other is not a conflict.
pub fn find_conflicts(root: &str, a_to_b: &[ChangeEntry], b_to_a: &[ChangeEntry]) -> Vec<Conflict> {
    let written = |changes: &[ChangeEntry]| -> BTreeSet<String> {
        changes
            .iter()
            .filter(|c| c.writes())
            .map(|c| c.path.clone())
            .collect()
    };

    let forward = written(a_to_b);
    let backward = written(b_to_a);

    forward
        .intersection(&backward)
        .map(|path| Conflict {
            root: root.to_string(),
            path: path.clone(),
            choices: ConflictChoice::ALL.to_vec(),
        })
        .collect()
}

/// Conflicts of every bidirectional root, in `roots` order.
pub fn find_all_conflicts(roots: &[String], by_root: &BTreeMap<String, RootPlan>) -> Vec<Conflict> {
    roots
        .iter()
        .filter_map(|root| match by_root.get(root) {
            Some(RootPlan::Bidirectional { a_to_b, b_to_a, .. }) => {
                Some(find_conflicts(root, a_to_b, b_to_a))
            }
            _ => None,
        })
        .flatten()
        .collect()
}
