//! Vev Core - Entity model, fact model, schema layer, and store contracts.
//!
//! This crate contains the domain types for the Vev graph replication
//! engine. It has no dependency on the replication crate.

pub mod error;
pub mod fact;
pub mod node;
pub mod observer;
pub mod schema;
pub mod store;

// Re-exports for convenience
pub use error::{StoreError, ValidationError};
pub use fact::{Fact, FactPath, Scalar};
pub use node::{Node, NodeIdentity, NodeKey, Value};
pub use observer::{NodeObserver, NoopObserver};
pub use schema::NodeType;
pub use store::{
    ChangeNotice, ListCursor, ListPage, LocalStore, RawFact, ServerStore, NEW_BATCH_CHANNEL,
};

#[cfg(any(test, feature = "test-utils"))]
pub use store::memory::{MemoryLocal, MemoryServer};
