//! Core registry logic for propledger.
//! This crate owns the entity graph, the instruction interpreter and the
//! relationship normalizer; the CLI only wires them to files.

pub mod collab;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{Config, ConfigError, StorageBackend};
pub use error::{InstructionError, InstructionErrorKind, ResolveError, SchemaError};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::entity::{EntityId, EntityKind, EntityRef, Key, UpsertOutcome};
pub use model::instruction::{BatchOutcome, FailedInstruction, Instruction, Operation};
pub use model::record::AnyRecord;
pub use repo::{
    BackupId, JsonFileSnapshotRepository, RepoError, RepoResult, SnapshotRepository,
    SqliteSnapshotRepository,
};
pub use service::interpreter::{CollisionPolicy, EnrichmentMode, Interpreter, InterpreterConfig};
pub use service::normalizer::{
    build_hierarchy, normalize, reconcile, Hierarchy, Normalized, ReconcileReport,
};
pub use store::{GraphStore, Snapshot};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
