use std::collections::BTreeMap;

use vev_core::{Node, NodeKey, Value};

use crate::canonical::CanonicalFact;
use crate::error::ReplicationError;

/// Rebuilds node graphs from canonical fact sets.
pub struct Materializer;

/// Intermediate per-predicate tree; converted to a `Value` once every fact
/// for the predicate has been placed.
enum Slot {
    Leaf(Value),
    Branch(BTreeMap<String, Slot>),
}

impl Materializer {
    /// Group facts by subject, rebuild nested property trees, and re-link
    /// references as node handles.
    ///
    /// Reference targets whose own facts are absent from the set still get a
    /// stub node in the returned collection; later facts for the same key
    /// fill the stub in place.
    pub fn materialize(facts: &[CanonicalFact]) -> Result<Vec<Node>, ReplicationError> {
        let mut nodes: BTreeMap<NodeKey, Node> = BTreeMap::new();
        let mut trees: BTreeMap<(NodeKey, String), Slot> = BTreeMap::new();

        for canonical in facts {
            let fact = &canonical.fact;
            validate_segments(fact)?;

            ensure_node(&mut nodes, fact.path.subject.clone());
            let value = if fact.is_reference {
                let target_key = fact
                    .target()
                    .ok_or_else(|| ReplicationError::MalformedReference(fact.value.to_string()))?;
                Value::Ref(ensure_node(&mut nodes, target_key))
            } else {
                Value::from(fact.value.clone())
            };

            place(
                &mut trees,
                fact.path.subject.clone(),
                fact.path.predicate.clone(),
                &fact.path.sub_path,
                value,
            );
        }

        for ((key, predicate), slot) in trees {
            // The subject node exists: ensure_node ran for every fact.
            if let Some(node) = nodes.get(&key) {
                node.set(predicate, slot_to_value(slot));
            }
        }

        Ok(nodes.into_values().collect())
    }
}

fn ensure_node(nodes: &mut BTreeMap<NodeKey, Node>, key: NodeKey) -> Node {
    nodes
        .entry(key.clone())
        .or_insert_with(|| Node::stub(key))
        .clone()
}

/// Empty path segments would silently corrupt the rebuilt graph; fail fast.
fn validate_segments(fact: &vev_core::Fact) -> Result<(), ReplicationError> {
    let path = &fact.path;
    let empty = path.subject.ty.is_empty()
        || path.subject.id.is_empty()
        || path.predicate.is_empty()
        || path.sub_path.iter().any(String::is_empty);
    if empty {
        return Err(ReplicationError::MalformedPath(path.to_string()));
    }
    Ok(())
}

fn place(
    trees: &mut BTreeMap<(NodeKey, String), Slot>,
    subject: NodeKey,
    predicate: String,
    sub_path: &[String],
    value: Value,
) {
    let slot = trees
        .entry((subject, predicate))
        .or_insert_with(|| Slot::Branch(BTreeMap::new()));
    place_in_slot(slot, sub_path, value);
}

fn place_in_slot(slot: &mut Slot, sub_path: &[String], value: Value) {
    let Some((head, rest)) = sub_path.split_first() else {
        *slot = Slot::Leaf(value);
        return;
    };
    // A leaf in the way of a deeper path is overwritten, mirroring the
    // flattener's silent last-write-wins on identical paths.
    if !matches!(slot, Slot::Branch(_)) {
        *slot = Slot::Branch(BTreeMap::new());
    }
    let Slot::Branch(children) = slot else {
        unreachable!()
    };
    let child = children
        .entry(head.clone())
        .or_insert_with(|| Slot::Branch(BTreeMap::new()));
    place_in_slot(child, rest, value);
}

/// A branch whose keys are exactly the contiguous decimal indices `0..n`
/// rebuilds as a list; anything else rebuilds as a map.
fn slot_to_value(slot: Slot) -> Value {
    match slot {
        Slot::Leaf(value) => value,
        Slot::Branch(children) => {
            let is_list = !children.is_empty()
                && (0..children.len()).all(|i| children.contains_key(&i.to_string()));
            if is_list {
                let mut by_index: Vec<(usize, Slot)> = children
                    .into_iter()
                    .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                    .collect();
                by_index.sort_by_key(|(i, _)| *i);
                Value::List(by_index.into_iter().map(|(_, v)| slot_to_value(v)).collect())
            } else {
                Value::Map(
                    children
                        .into_iter()
                        .map(|(k, v)| (k, slot_to_value(v)))
                        .collect(),
                )
            }
        }
    }
}
