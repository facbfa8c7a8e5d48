use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Write rejected at {path}: {reason}")]
    WriteRejected { path: String, reason: String },

    #[error("Unknown listing cursor: {0}")]
    UnknownCursor(u64),

    #[error("Listing not done but no continuation cursor returned")]
    MissingCursor,
}

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Missing required property: {0}")]
    MissingProperty(String),

    #[error("Property {property} has wrong kind: expected {expected}")]
    WrongKind {
        property: String,
        expected: &'static str,
    },

    #[error("Reserved property name: {0}")]
    ReservedProperty(String),

    #[error("Derived id is empty for type {0}")]
    EmptyId(String),
}
