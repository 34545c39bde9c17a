//! Registry use-case services.
//!
//! # Responsibility
//! - Turn instruction batches into store mutations (`interpreter`).
//! - Repair and reshape the stored graph (`normalizer`).
//!
//! # See also
//! - `store` for the graph these services operate on.

pub mod fields;
pub mod interpreter;
pub mod normalizer;
