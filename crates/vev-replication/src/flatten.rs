use std::collections::{BTreeMap, HashSet};

use vev_core::{Fact, FactPath, Node, NodeIdentity, Value};

/// Decomposes node graphs into flat fact sets.
pub struct Flattener;

impl Flattener {
    /// Flatten every given node and everything it transitively references.
    ///
    /// Each top-level argument gets its own visited set, so sibling arguments
    /// that share a referenced sub-node each emit that sub-node's facts again.
    /// The duplicates land on identical paths and overwrite silently.
    ///
    /// Pure given identical inputs; no I/O.
    pub fn flatten(nodes: &[Node]) -> Vec<Fact> {
        let mut facts: BTreeMap<FactPath, Fact> = BTreeMap::new();
        for node in nodes {
            let mut visited = HashSet::new();
            Self::flatten_graph(node, &mut visited, &mut facts);
        }
        facts.into_values().collect()
    }

    /// Walk one node graph with an explicit worklist. The visited set is
    /// keyed on object identity: two structurally equal node instances are
    /// both visited, a true cycle is not revisited.
    fn flatten_graph(
        root: &Node,
        visited: &mut HashSet<NodeIdentity>,
        facts: &mut BTreeMap<FactPath, Fact>,
    ) {
        let mut worklist = vec![root.clone()];
        while let Some(node) = worklist.pop() {
            if !visited.insert(node.identity()) {
                continue;
            }
            for (predicate, value) in node.props() {
                Self::flatten_value(&node, &predicate, &[], &value, facts, &mut worklist);
            }
        }
    }

    /// Depth-first walk of one property value. Plain structures extend the
    /// sub-path; a node reference is a leaf and queues the target for its
    /// own flattening pass.
    fn flatten_value(
        subject: &Node,
        predicate: &str,
        sub_path: &[String],
        value: &Value,
        facts: &mut BTreeMap<FactPath, Fact>,
        worklist: &mut Vec<Node>,
    ) {
        match value {
            Value::Ref(target) => {
                let path = FactPath::new(subject.key().clone(), predicate)
                    .with_sub_path(sub_path.to_vec());
                facts.insert(path.clone(), Fact::reference(path, target.key()));
                worklist.push(target.clone());
            }
            Value::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    let mut deeper = sub_path.to_vec();
                    deeper.push(index.to_string());
                    Self::flatten_value(subject, predicate, &deeper, item, facts, worklist);
                }
            }
            Value::Map(entries) => {
                for (key, item) in entries {
                    let mut deeper = sub_path.to_vec();
                    deeper.push(key.clone());
                    Self::flatten_value(subject, predicate, &deeper, item, facts, worklist);
                }
            }
            leaf => {
                if let Some(scalar) = leaf.to_scalar() {
                    let path = FactPath::new(subject.key().clone(), predicate)
                        .with_sub_path(sub_path.to_vec());
                    facts.insert(path.clone(), Fact::literal(path, scalar));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use vev_core::{NodeKey, Scalar};

    fn node(ty: &str, id: &str) -> Node {
        Node::new(ty, id, Map::new())
    }

    fn find<'a>(facts: &'a [Fact], path: &str) -> &'a Fact {
        facts
            .iter()
            .find(|f| f.path.to_string() == path)
            .unwrap_or_else(|| panic!("no fact at {path}"))
    }

    #[test]
    fn test_flatten_with_reference_visits_target() {
        let u2 = node("user", "u2");
        u2.set("name", Value::text("Bob"));
        let u1 = node("user", "u1");
        u1.set("name", Value::text("Ann"));
        u1.set("friend", Value::Ref(u2));

        let facts = Flattener::flatten(&[u1]);
        assert_eq!(facts.len(), 3);

        let name = find(&facts, "user/u1/name");
        assert_eq!(name.value, Scalar::text("Ann"));
        assert!(!name.is_reference);

        let friend = find(&facts, "user/u1/friend");
        assert_eq!(friend.value, Scalar::text("user:u2"));
        assert!(friend.is_reference);
        assert_eq!(friend.target(), Some(NodeKey::new("user", "u2")));

        assert_eq!(find(&facts, "user/u2/name").value, Scalar::text("Bob"));
    }

    #[test]
    fn test_flatten_nested_structures_build_sub_paths() {
        let place = node("place", "oslo");
        place.set(
            "address",
            Value::Map(Map::from([
                ("street".to_string(), Value::text("Karl Johans gate")),
                ("zip".to_string(), Value::Int(154)),
            ])),
        );
        place.set(
            "tags",
            Value::List(vec![Value::text("capital"), Value::text("harbor")]),
        );

        let facts = Flattener::flatten(&[place]);
        assert_eq!(facts.len(), 4);
        assert_eq!(
            find(&facts, "place/oslo/address/street").value,
            Scalar::text("Karl Johans gate")
        );
        assert_eq!(find(&facts, "place/oslo/address/zip").value, Scalar::Int(154));
        assert_eq!(find(&facts, "place/oslo/tags/0").value, Scalar::text("capital"));
        assert_eq!(find(&facts, "place/oslo/tags/1").value, Scalar::text("harbor"));
    }

    #[test]
    fn test_reference_nested_in_structure_is_a_leaf() {
        let u2 = node("user", "u2");
        u2.set("name", Value::text("Bob"));
        let u1 = node("user", "u1");
        u1.set("friends", Value::List(vec![Value::Ref(u2)]));

        let facts = Flattener::flatten(&[u1]);
        let entry = find(&facts, "user/u1/friends/0");
        assert!(entry.is_reference);
        assert_eq!(entry.value, Scalar::text("user:u2"));
        assert_eq!(find(&facts, "user/u2/name").value, Scalar::text("Bob"));
    }

    #[test]
    fn test_self_cycle_terminates() {
        let u1 = node("user", "u1");
        u1.set("name", Value::text("Ann"));
        u1.set("me", Value::Ref(u1.clone()));

        let facts = Flattener::flatten(&[u1]);
        assert_eq!(facts.len(), 2);
        assert_eq!(find(&facts, "user/u1/me").value, Scalar::text("user:u1"));
    }

    #[test]
    fn test_mutual_cycle_terminates() {
        let a = node("user", "a");
        let b = node("user", "b");
        a.set("friend", Value::Ref(b.clone()));
        b.set("friend", Value::Ref(a.clone()));

        let facts = Flattener::flatten(&[a]);
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn test_diamond_visited_once_per_argument() {
        let shared = node("user", "shared");
        shared.set("name", Value::text("S"));
        let left = node("user", "left");
        left.set("friend", Value::Ref(shared.clone()));
        let right = node("user", "right");
        right.set("friend", Value::Ref(shared.clone()));

        // Two arguments each re-emit the shared node's facts; the duplicates
        // collapse onto one path each.
        let facts = Flattener::flatten(&[left, right]);
        assert_eq!(facts.len(), 3);
        assert_eq!(find(&facts, "user/shared/name").value, Scalar::text("S"));
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let u1 = node("user", "u1");
        u1.set("name", Value::text("Ann"));
        u1.set("age", Value::Int(40));

        let first = Flattener::flatten(std::slice::from_ref(&u1));
        let second = Flattener::flatten(&[u1]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_structures_emit_no_facts() {
        let u1 = node("user", "u1");
        u1.set("empty_list", Value::List(vec![]));
        u1.set("empty_map", Value::Map(Map::new()));

        assert!(Flattener::flatten(&[u1]).is_empty());
    }
}
