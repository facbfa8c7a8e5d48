//! Vev Replication - Flattening, canonicalization, and the push/pull/resync
//! state machine.

pub mod canonical;
pub mod error;
pub mod flatten;
pub mod materialize;
pub mod replicator;

pub use canonical::{canonicalize_listing, CanonicalFact, Canonicalizer};
pub use error::ReplicationError;
pub use flatten::Flattener;
pub use materialize::Materializer;
pub use replicator::{PushOutcome, Replicator};
