//! Error types shared across the registry core.
//!
//! # Responsibility
//! - Separate fatal snapshot errors from per-instruction errors.
//!
//! # Invariants
//! - Only `SchemaError` aborts a batch; `InstructionError` is always captured
//!   into the failed-instruction list.
//! - Error messages never embed sensitive field values (SSN, tax id).

use crate::model::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Malformed persisted snapshot. Fatal for `load`.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Document is not JSON or not shaped like a snapshot.
    #[error("snapshot parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    /// Top-level key appears twice.
    #[error("snapshot declares top-level key `{0}` more than once")]
    DuplicateCollection(String),
    /// A collection entry has no `id` field.
    #[error("{collection} entry `{key}` is missing its `id` field")]
    MissingId {
        collection: &'static str,
        key: String,
    },
    /// A collection entry has a blank identifier.
    #[error("{collection} entry `{key}` has an empty id")]
    EmptyId {
        collection: &'static str,
        key: String,
    },
    /// Map key and record id disagree.
    #[error("{collection} entry `{key}` carries mismatching id `{id}`")]
    KeyMismatch {
        collection: &'static str,
        key: String,
        id: String,
    },
    /// Same identifier listed twice in one collection.
    #[error("duplicate id `{id}` in {collection}")]
    DuplicateId { collection: &'static str, id: String },
    /// Record fields do not match the expected shape.
    #[error("{collection} entry `{key}` is invalid: {source}")]
    InvalidRecord {
        collection: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Classification of a per-instruction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionErrorKind {
    /// Referenced entity could not be found (or was ambiguous).
    Resolution,
    /// Field value could not be coerced to its semantic type.
    Validation,
    /// Relationship would point to an entity of the wrong type.
    Integrity,
}

impl Display for InstructionErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Resolution => "resolution",
            Self::Validation => "validation",
            Self::Integrity => "integrity",
        };
        f.write_str(label)
    }
}

/// Per-instruction failure. Recorded, never raised past the batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstructionError {
    #[error("resolution error: {0}")]
    Resolution(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl InstructionError {
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    pub fn kind(&self) -> InstructionErrorKind {
        match self {
            Self::Resolution(_) => InstructionErrorKind::Resolution,
            Self::Validation(_) => InstructionErrorKind::Validation,
            Self::Integrity(_) => InstructionErrorKind::Integrity,
        }
    }

    /// Human-readable reason without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Resolution(message) | Self::Validation(message) | Self::Integrity(message) => {
                message
            }
        }
    }
}

/// Outcome of resolving a key against one collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Nothing matches the key.
    #[error("no {kind} matches {key}")]
    NotFound { kind: EntityKind, key: String },
    /// More than one entity matches the natural key.
    #[error("{key} matches {count} {kind} records")]
    Ambiguous {
        kind: EntityKind,
        key: String,
        count: usize,
    },
    /// The identifier exists, but in another collection.
    #[error("id `{id}` belongs to a {actual}, not a {expected}")]
    WrongKind {
        id: String,
        expected: EntityKind,
        actual: EntityKind,
    },
    /// The kind has no natural-key attribute.
    #[error("{kind} records can only be referenced by id")]
    NoNaturalKey { kind: EntityKind },
}

impl ResolveError {
    /// Maps a resolution failure onto the instruction error taxonomy.
    pub fn into_instruction_error(self) -> InstructionError {
        match self {
            Self::NotFound { .. } | Self::Ambiguous { .. } => {
                InstructionError::resolution(self.to_string())
            }
            Self::WrongKind { .. } => InstructionError::integrity(self.to_string()),
            Self::NoNaturalKey { .. } => InstructionError::validation(self.to_string()),
        }
    }
}
