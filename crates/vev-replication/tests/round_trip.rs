//! End-to-end flatten/replicate/materialize round trips over the in-memory
//! stores.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use vev_core::{LocalStore, MemoryLocal, MemoryServer, Node, NodeKey, NodeObserver, Value};
use vev_replication::Replicator;

#[derive(Default)]
struct Collect {
    nodes: Mutex<Vec<Node>>,
}

impl NodeObserver for Collect {
    fn on_node(&self, node: &Node) {
        self.nodes.lock().unwrap().push(node.clone());
    }
}

impl Collect {
    fn find(&self, key: &NodeKey) -> Node {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.key() == key)
            .cloned()
            .unwrap_or_else(|| panic!("no node {key}"))
    }
}

fn replicator(
    server: Arc<MemoryServer>,
    observer: Arc<Collect>,
) -> (
    Arc<Replicator<MemoryLocal, MemoryServer, Collect>>,
    Arc<MemoryLocal>,
) {
    let local = Arc::new(MemoryLocal::new());
    let rep = Replicator::new(Some(local.clone()), Some(server), observer);
    (rep, local)
}

fn ann_and_bob() -> Node {
    let bob = Node::new(
        "user",
        "u2",
        BTreeMap::from([("name".to_string(), Value::text("Bob"))]),
    );
    Node::new(
        "user",
        "u1",
        BTreeMap::from([
            ("name".to_string(), Value::text("Ann")),
            ("friend".to_string(), Value::Ref(bob)),
        ]),
    )
}

#[tokio::test]
async fn push_then_pull_reconstructs_the_graph() {
    let server = Arc::new(MemoryServer::new());
    let (writer, _) = replicator(server.clone(), Arc::new(Collect::default()));
    let outcomes = writer.push(&[ann_and_bob()]).await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));

    let observer = Arc::new(Collect::default());
    let (reader, _) = replicator(server, observer.clone());
    reader.pull().await.unwrap();

    let u1 = observer.find(&NodeKey::new("user", "u1"));
    let u2 = observer.find(&NodeKey::new("user", "u2"));
    assert_eq!(u1.get("name"), Some(Value::text("Ann")));
    assert_eq!(u2.get("name"), Some(Value::text("Bob")));

    // The friend comes back as the reconstructed node object, not the
    // "user:u2" string.
    let Some(Value::Ref(friend)) = u1.get("friend") else {
        panic!("friend must be a reference");
    };
    assert!(friend.same_object(&u2));
    assert_eq!(friend.get("name"), Some(Value::text("Bob")));
}

#[tokio::test]
async fn round_trip_preserves_nested_structures() {
    let original = Node::new(
        "place",
        "oslo",
        BTreeMap::from([
            (
                "address".to_string(),
                Value::Map(BTreeMap::from([
                    ("street".to_string(), Value::text("Karl Johans gate")),
                    ("zip".to_string(), Value::Int(154)),
                ])),
            ),
            (
                "tags".to_string(),
                Value::List(vec![Value::text("capital"), Value::text("harbor")]),
            ),
            ("open".to_string(), Value::Bool(true)),
        ]),
    );

    let server = Arc::new(MemoryServer::with_page_size(2));
    let (writer, _) = replicator(server.clone(), Arc::new(Collect::default()));
    writer.push(std::slice::from_ref(&original)).await;

    let observer = Arc::new(Collect::default());
    let (reader, _) = replicator(server, observer.clone());
    reader.reset_local().await.unwrap();

    let rebuilt = observer.find(&NodeKey::new("place", "oslo"));
    assert_eq!(rebuilt, original);
}

#[tokio::test]
async fn cyclic_graph_survives_the_round_trip() {
    let a = Node::new("user", "a", BTreeMap::new());
    let b = Node::new("user", "b", BTreeMap::new());
    a.set("friend", Value::Ref(b.clone()));
    b.set("friend", Value::Ref(a.clone()));

    let server = Arc::new(MemoryServer::new());
    let (writer, _) = replicator(server.clone(), Arc::new(Collect::default()));
    let outcomes = writer.push(&[a]).await;
    assert_eq!(outcomes.len(), 2);

    let observer = Arc::new(Collect::default());
    let (reader, _) = replicator(server, observer.clone());
    reader.pull().await.unwrap();

    let ra = observer.find(&NodeKey::new("user", "a"));
    let Some(Value::Ref(rb)) = ra.get("friend") else {
        panic!()
    };
    let Some(Value::Ref(back)) = rb.get("friend") else {
        panic!()
    };
    assert!(back.same_object(&ra));
}

#[tokio::test]
async fn two_writers_converge_deterministically() {
    let server = Arc::new(MemoryServer::new());

    let (writer_a, _) = replicator(server.clone(), Arc::new(Collect::default()));
    let (writer_b, _) = replicator(server.clone(), Arc::new(Collect::default()));

    // Both writers push batch 1 for the same entity with different values;
    // their write hashes differ, and canonicalization picks the smallest.
    writer_a
        .push(&[Node::new(
            "user",
            "u1",
            BTreeMap::from([("name".to_string(), Value::text("from-a"))]),
        )])
        .await;
    writer_b
        .push(&[Node::new(
            "user",
            "u1",
            BTreeMap::from([("name".to_string(), Value::text("from-b"))]),
        )])
        .await;

    let obs_one = Arc::new(Collect::default());
    let (reader_one, local_one) = replicator(server.clone(), obs_one.clone());
    reader_one.reset_local().await.unwrap();

    let obs_two = Arc::new(Collect::default());
    let (reader_two, local_two) = replicator(server, obs_two.clone());
    reader_two.reset_local().await.unwrap();

    // Same winner for every reader, whatever it is.
    assert_eq!(
        local_one.list(&[]).await.unwrap().chunk,
        local_two.list(&[]).await.unwrap().chunk
    );
    assert_eq!(
        obs_one.find(&NodeKey::new("user", "u1")).get("name"),
        obs_two.find(&NodeKey::new("user", "u1")).get("name")
    );
}
