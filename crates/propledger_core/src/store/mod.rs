//! Entity Graph Store and its snapshot format.
//!
//! # Responsibility
//! - Own the in-memory registry graph (`GraphStore`).
//! - Parse and render the persisted snapshot (`Snapshot`).
//! - Provide the additive merge and back-reference primitives the
//!   interpreter and normalizer build on.
//!
//! # Invariants
//! - `GraphStore::serialize(GraphStore::load(s)) == s` for well-formed `s`,
//!   modulo key ordering and explicit `null` values.
//! - The store is an explicit value; there is no process-wide instance.

pub mod graph;
pub mod links;
pub mod merge;
pub mod snapshot;

pub use graph::{GraphStore, Staging};
pub use snapshot::Snapshot;
