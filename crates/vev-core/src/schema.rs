use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::node::{Node, Value};

/// Property names stamped by the constructor; callers may not supply them.
const RESERVED: [&str; 2] = ["id", "type"];

type IdFn = dyn Fn(&BTreeMap<String, Value>) -> String + Send + Sync;
type ValidateFn = dyn Fn(&BTreeMap<String, Value>) -> Result<(), ValidationError> + Send + Sync;

/// A named entity type: constructor, validator, and type predicate.
///
/// The id function derives a stable id from the other properties, which is
/// what makes pushing the same logical entity idempotent. The replication
/// engine itself depends only on the resulting node's `type`/`id` fields.
pub struct NodeType {
    name: String,
    id_fn: Arc<IdFn>,
    validate: Option<Arc<ValidateFn>>,
}

impl NodeType {
    pub fn new(
        name: impl Into<String>,
        id_fn: impl Fn(&BTreeMap<String, Value>) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            id_fn: Arc::new(id_fn),
            validate: None,
        }
    }

    pub fn with_validator(
        mut self,
        validate: impl Fn(&BTreeMap<String, Value>) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(validate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate the given properties and stamp them with `type` and the
    /// derived `id`.
    pub fn construct(&self, props: BTreeMap<String, Value>) -> Result<Node, ValidationError> {
        for reserved in RESERVED {
            if props.contains_key(reserved) {
                return Err(ValidationError::ReservedProperty(reserved.to_string()));
            }
        }
        if let Some(validate) = &self.validate {
            validate(&props)?;
        }
        let id = (self.id_fn)(&props);
        if id.is_empty() {
            return Err(ValidationError::EmptyId(self.name.clone()));
        }
        Ok(Node::new(&self.name, id, props))
    }

    /// Whether the node is a valid instance of this type.
    pub fn is_instance(&self, node: &Node) -> bool {
        if node.ty() != self.name {
            return false;
        }
        match &self.validate {
            Some(validate) => validate(&node.props()).is_ok(),
            None => true,
        }
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeType").field("name", &self.name).finish()
    }
}

/// Require a text property, for use inside validators.
pub fn require_text(
    props: &BTreeMap<String, Value>,
    property: &str,
) -> Result<String, ValidationError> {
    match props.get(property) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::WrongKind {
            property: property.to_string(),
            expected: "text",
        }),
        None => Err(ValidationError::MissingProperty(property.to_string())),
    }
}
