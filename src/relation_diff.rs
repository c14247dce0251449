//! Set reconciliation for many-to-many relations.
//!
//! Given the identifiers currently linked to an owner and the identifiers a
//! caller wants linked, [`compute_diff`] produces the connect / disconnect
//! operations that move one to the other without dropping and recreating
//! every link. In upsert mode desired entities are emitted as upserts so
//! their payload can be written whether or not the row already exists.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;

/// Anything that can take part in a relation diff.
///
/// Plain identifiers return themselves; entities return their identifier
/// field, or `None` when they have not been persisted yet.
pub trait Relation {
    fn relation_id(&self) -> Option<&str>;
}

impl Relation for String {
    fn relation_id(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl Relation for &str {
    fn relation_id(&self) -> Option<&str> {
        Some(*self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub upsert: bool,
}

impl DiffOptions {
    pub fn upsert() -> Self {
        DiffOptions { upsert: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffOp<T> {
    Connect(String),
    Disconnect(String),
    /// `id` is `None` for entities that carry no identifier; such an upsert
    /// is a plain create.
    Upsert {
        id: Option<String>,
        create: T,
        update: T,
    },
}

impl<T> DiffOp<T> {
    pub fn id(&self) -> Option<&str> {
        match self {
            DiffOp::Connect(id) | DiffOp::Disconnect(id) => Some(id),
            DiffOp::Upsert { id, .. } => id.as_deref(),
        }
    }
}

/// Concatenates `first` and `second`, keeping the first occurrence of every item.
pub fn merge<T>(first: &[T], second: &[T]) -> Vec<T>
where
    T: Clone + Eq + Hash,
{
    merge_by(first, second, |item| item.clone())
}

/// Like [`merge`], but items are considered equal when `key` yields equal values.
pub fn merge_by<T, K, F>(first: &[T], second: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    first
        .iter()
        .chain(second)
        .filter(|item| seen.insert(key(*item)))
        .cloned()
        .collect()
}

enum Candidate<'a, T> {
    Keyed(&'a str),
    Unkeyed(&'a T),
}

/// Computes the operations reconciling `current` into `desired`.
///
/// Order follows the merged traversal (desired first in upsert mode,
/// current first otherwise). Callers must only rely on the set of
/// operations, not on their order.
pub fn compute_diff<T>(current: &[T], desired: &[T], options: DiffOptions) -> Vec<DiffOp<T>>
where
    T: Relation + Clone,
{
    let current_ids: HashSet<&str> = current.iter().filter_map(Relation::relation_id).collect();
    let mut desired_by_id: HashMap<&str, &T> = HashMap::new();
    for item in desired {
        if let Some(id) = item.relation_id() {
            desired_by_id.entry(id).or_insert(item);
        }
    }

    let (first, second) = if options.upsert {
        (desired, current)
    } else {
        (current, desired)
    };

    let mut seen = HashSet::new();
    let mut candidates = Vec::with_capacity(first.len() + second.len());
    for item in first.iter().chain(second) {
        match item.relation_id() {
            Some(id) => {
                if seen.insert(id) {
                    candidates.push(Candidate::Keyed(id));
                }
            }
            None if options.upsert => candidates.push(Candidate::Unkeyed(item)),
            None => {}
        }
    }

    let mut ops = Vec::new();
    for candidate in candidates {
        match candidate {
            Candidate::Unkeyed(item) => ops.push(DiffOp::Upsert {
                id: None,
                create: item.clone(),
                update: item.clone(),
            }),
            Candidate::Keyed(id) => {
                let wanted = desired_by_id.get(id).copied();
                let linked = current_ids.contains(id);
                match (wanted, linked) {
                    (Some(item), _) if options.upsert => ops.push(DiffOp::Upsert {
                        id: Some(id.to_string()),
                        create: item.clone(),
                        update: item.clone(),
                    }),
                    (Some(_), false) => ops.push(DiffOp::Connect(id.to_string())),
                    (None, true) => ops.push(DiffOp::Disconnect(id.to_string())),
                    _ => {}
                }
            }
        }
    }
    ops
}

/// Identifiers touched by a diff, grouped by operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub connected: BTreeSet<String>,
    pub disconnected: BTreeSet<String>,
    pub upserted: BTreeSet<String>,
    pub created: usize,
}

impl DiffSummary {
    pub fn from_ops<T>(ops: &[DiffOp<T>]) -> Self {
        let mut summary = DiffSummary::default();
        for op in ops {
            match op {
                DiffOp::Connect(id) => {
                    summary.connected.insert(id.clone());
                }
                DiffOp::Disconnect(id) => {
                    summary.disconnected.insert(id.clone());
                }
                DiffOp::Upsert { id: Some(id), .. } => {
                    summary.upserted.insert(id.clone());
                }
                DiffOp::Upsert { id: None, .. } => summary.created += 1,
            }
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
            && self.disconnected.is_empty()
            && self.upserted.is_empty()
            && self.created == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Flag {
        id: Option<String>,
        label: String,
    }

    impl Relation for Flag {
        fn relation_id(&self) -> Option<&str> {
            self.id.as_deref()
        }
    }

    fn flag(id: Option<&str>, label: &str) -> Flag {
        Flag {
            id: id.map(str::to_string),
            label: label.to_string(),
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn connects_and_disconnects_the_difference() {
        let ops = compute_diff(&ids(&["1", "2", "3"]), &ids(&["1", "2", "4"]), DiffOptions::default());
        let summary = DiffSummary::from_ops(&ops);
        assert_eq!(ops.len(), 2);
        assert_eq!(summary.disconnected, BTreeSet::from(["3".to_string()]));
        assert_eq!(summary.connected, BTreeSet::from(["4".to_string()]));
    }

    #[test]
    fn identical_sets_produce_no_operations() {
        let set = ids(&["a", "b"]);
        assert!(compute_diff(&set, &set, DiffOptions::default()).is_empty());
    }

    #[test]
    fn upsert_mode_emits_desired_payload_for_shared_ids() {
        let current = vec![flag(Some("f1"), "old")];
        let desired = vec![flag(Some("f1"), "new")];
        let ops = compute_diff(&current, &desired, DiffOptions::upsert());
        assert_eq!(
            ops,
            vec![DiffOp::Upsert {
                id: Some("f1".into()),
                create: flag(Some("f1"), "new"),
                update: flag(Some("f1"), "new"),
            }]
        );
    }

    #[test]
    fn upsert_mode_creates_entities_without_id() {
        let desired = vec![flag(None, "fresh")];
        let ops = compute_diff(&[], &desired, DiffOptions::upsert());
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], DiffOp::Upsert { id: None, create, .. } if create.label == "fresh"));
        assert_eq!(DiffSummary::from_ops(&ops).created, 1);
    }

    #[test]
    fn upsert_mode_still_disconnects_removed_ids() {
        let current = vec![flag(Some("f1"), "a"), flag(Some("f2"), "b")];
        let desired = vec![flag(Some("f2"), "b2")];
        let summary = DiffSummary::from_ops(&compute_diff(&current, &desired, DiffOptions::upsert()));
        assert_eq!(summary.disconnected, BTreeSet::from(["f1".to_string()]));
        assert_eq!(summary.upserted, BTreeSet::from(["f2".to_string()]));
    }

    #[test]
    fn entities_without_id_are_skipped_outside_upsert_mode() {
        let desired = vec![flag(None, "orphan"), flag(Some("f9"), "kept")];
        let ops = compute_diff(&[], &desired, DiffOptions::default());
        assert_eq!(ops, vec![DiffOp::Connect("f9".into())]);
    }

    #[test]
    fn traversal_order_is_current_first_without_upsert() {
        let ops = compute_diff(&ids(&["x"]), &ids(&["y"]), DiffOptions::default());
        assert_eq!(ops, vec![DiffOp::Disconnect("x".into()), DiffOp::Connect("y".into())]);
    }

    #[test]
    fn merge_preserves_first_seen_order() {
        let merged = merge(&["a", "b", "c"], &["a", "c", "d"]);
        assert_eq!(merged, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn merge_by_uses_accessor_key() {
        let first = vec![flag(Some("1"), "first")];
        let second = vec![flag(Some("1"), "second"), flag(Some("2"), "other")];
        let merged = merge_by(&first, &second, |f| f.id.clone());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].label, "first");
    }
}
