use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeKey;

/// A typed leaf value as carried through the stores.
///
/// The wire stringification of scalars is the injected store's concern;
/// in-process the value stays typed so flatten/materialize round-trips are
/// lossless. Reference facts carry `Text("type:id")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn text(s: impl Into<String>) -> Self {
        Scalar::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Address of one fact: the owning node, the top-level property name, and
/// the keys needed to reach a leaf nested inside a plain structure under
/// that property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactPath {
    pub subject: NodeKey,
    pub predicate: String,
    pub sub_path: Vec<String>,
}

impl FactPath {
    pub fn new(subject: NodeKey, predicate: impl Into<String>) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            sub_path: Vec::new(),
        }
    }

    pub fn with_sub_path(mut self, sub_path: Vec<String>) -> Self {
        self.sub_path = sub_path;
        self
    }

    /// The bare store key: `[type, id, predicate, ...sub_path]`.
    pub fn segments(&self) -> Vec<String> {
        let mut segs = Vec::with_capacity(3 + self.sub_path.len());
        segs.push(self.subject.ty.clone());
        segs.push(self.subject.id.clone());
        segs.push(self.predicate.clone());
        segs.extend(self.sub_path.iter().cloned());
        segs
    }

    /// Parse a bare store key back into a path. Needs at least
    /// `[type, id, predicate]`.
    pub fn parse(segments: &[String]) -> Option<Self> {
        let [ty, id, predicate, sub @ ..] = segments else {
            return None;
        };
        Some(Self {
            subject: NodeKey::new(ty.clone(), id.clone()),
            predicate: predicate.clone(),
            sub_path: sub.to_vec(),
        })
    }
}

impl fmt::Display for FactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subject.ty, self.subject.id, self.predicate)?;
        for seg in &self.sub_path {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

/// The atomic unit of storage: a path, a leaf value, and whether that value
/// is a node reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub path: FactPath,
    pub value: Scalar,
    pub is_reference: bool,
}

impl Fact {
    pub fn literal(path: FactPath, value: Scalar) -> Self {
        Self {
            path,
            value,
            is_reference: false,
        }
    }

    pub fn reference(path: FactPath, target: &NodeKey) -> Self {
        Self {
            path,
            value: Scalar::Text(target.to_string()),
            is_reference: true,
        }
    }

    /// The referenced node's key, if this fact is a reference.
    pub fn target(&self) -> Option<NodeKey> {
        if !self.is_reference {
            return None;
        }
        self.value.as_text().and_then(NodeKey::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_path_segments_round_trip() {
        let path = FactPath::new(NodeKey::new("user", "u1"), "address")
            .with_sub_path(vec!["street".to_string()]);

        let segs = path.segments();
        assert_eq!(segs, ["user", "u1", "address", "street"]);
        assert_eq!(FactPath::parse(&segs), Some(path));
    }

    #[test]
    fn test_fact_path_parse_too_short() {
        let segs = vec!["user".to_string(), "u1".to_string()];
        assert_eq!(FactPath::parse(&segs), None);
    }

    #[test]
    fn test_reference_fact_target() {
        let path = FactPath::new(NodeKey::new("user", "u1"), "friend");
        let fact = Fact::reference(path.clone(), &NodeKey::new("user", "u2"));

        assert!(fact.is_reference);
        assert_eq!(fact.value, Scalar::text("user:u2"));
        assert_eq!(fact.target(), Some(NodeKey::new("user", "u2")));

        let literal = Fact::literal(path, Scalar::text("user:u2"));
        assert_eq!(literal.target(), None);
    }

    #[test]
    fn test_scalar_display() {
        assert_eq!(Scalar::Bool(true).to_string(), "true");
        assert_eq!(Scalar::Int(-7).to_string(), "-7");
        assert_eq!(Scalar::text("Ann").to_string(), "Ann");
    }

    #[test]
    fn test_scalar_wire_form() {
        let json = serde_json::to_string(&Scalar::Int(42)).unwrap();
        assert_eq!(json, r#"{"kind":"Int","value":42}"#);
        let back: Scalar = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Scalar::Int(42));
    }
}
