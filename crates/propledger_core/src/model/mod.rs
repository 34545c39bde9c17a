//! Domain model for the property-management registry.
//!
//! # Responsibility
//! - Define identity primitives, persisted record shapes and the instruction
//!   stream consumed by the interpreter.
//! - Coerce loosely typed field values into their semantic types.
//!
//! # Invariants
//! - Every entity is identified by a stable string id.
//! - Entities are never deleted by the core.

pub mod coerce;
pub mod entity;
pub mod instruction;
pub mod record;
