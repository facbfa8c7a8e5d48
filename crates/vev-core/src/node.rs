use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::fact::Scalar;

/// `(type, id)` pair uniquely identifying a node.
///
/// `id` is derived deterministically from the node's properties by the
/// schema layer, so identical logical entities always carry identical keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub ty: String,
    pub id: String,
}

impl NodeKey {
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
        }
    }

    /// Parse the `"type:id"` wire form used by reference facts.
    pub fn parse(s: &str) -> Option<Self> {
        let (ty, id) = s.split_once(':')?;
        if ty.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(ty, id))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ty, self.id)
    }
}

/// A property value: a scalar leaf, a plain nested structure, or a
/// reference to another node.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Ref(Node),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// The scalar form of a leaf value, or `None` for structures and refs.
    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Int(n) => Some(Scalar::Int(*n)),
            Value::Float(x) => Some(Scalar::Float(*x)),
            Value::Text(s) => Some(Scalar::Text(s.clone())),
            _ => None,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(n) => Value::Int(n),
            Scalar::Float(x) => Value::Float(x),
            Scalar::Text(t) => Value::Text(t),
        }
    }
}

// References compare by target key, not by deep structure. This keeps
// equality total on cyclic graphs.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.key() == b.key(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(entries) => f.debug_map().entries(entries).finish(),
            Value::Ref(node) => write!(f, "Ref({})", node.key()),
        }
    }
}

/// Pointer identity of a node handle, used as the cycle-guard key during
/// flattening. Two structurally equal nodes are distinct identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdentity(usize);

/// A typed, identified entity with arbitrary properties.
///
/// Cheap to clone (all clones share the same underlying object). Properties
/// are interior-mutable so application code can close reference cycles after
/// construction and the materializer can fill stub nodes in place.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    key: NodeKey,
    props: RwLock<BTreeMap<String, Value>>,
}

impl Node {
    pub fn new(ty: impl Into<String>, id: impl Into<String>, props: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                key: NodeKey::new(ty, id),
                props: RwLock::new(props),
            }),
        }
    }

    /// A node with no properties yet; the materializer creates these to
    /// satisfy references whose own facts have not been seen.
    pub fn stub(key: NodeKey) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                key,
                props: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    pub fn ty(&self) -> &str {
        &self.inner.key.ty
    }

    pub fn id(&self) -> &str {
        &self.inner.key.id
    }

    /// Snapshot of the properties. Referenced nodes are shared handles, not
    /// deep copies.
    pub fn props(&self) -> BTreeMap<String, Value> {
        self.inner.props.read().expect("props lock poisoned").clone()
    }

    pub fn get(&self, predicate: &str) -> Option<Value> {
        self.inner
            .props
            .read()
            .expect("props lock poisoned")
            .get(predicate)
            .cloned()
    }

    /// Set a property, replacing any previous value under the predicate.
    pub fn set(&self, predicate: impl Into<String>, value: Value) {
        self.inner
            .props
            .write()
            .expect("props lock poisoned")
            .insert(predicate.into(), value);
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity(Arc::as_ptr(&self.inner) as usize)
    }

    /// Whether two handles point at the same underlying object.
    pub fn same_object(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        if self.same_object(other) {
            return true;
        }
        self.key() == other.key() && self.props() == other.props()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.key())
    }
}
