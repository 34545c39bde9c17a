//! Instruction stream model.
//!
//! # Responsibility
//! - Define the semi-trusted change request consumed by the interpreter.
//! - Define batch outcome records (applied, failed, pending).
//!
//! # Invariants
//! - `fields` is kept as raw JSON; shape validation happens per target kind
//!   inside the interpreter, never at parse time.
//! - A failed instruction is always reported with its original JSON form.

use crate::error::{InstructionError, InstructionErrorKind};
use crate::model::entity::{EntityKind, Key, UpsertOutcome};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Requested mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Resolve or create the target, then merge fields additively.
    #[default]
    CreateOrUpdate,
    /// Write relationship fields only.
    Link,
    /// Append items to id collections or inline expense lists.
    AppendCollectionItem,
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let normalized = raw.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "create-or-update" | "create" | "update" | "upsert" => Ok(Self::CreateOrUpdate),
            "link" => Ok(Self::Link),
            "append-collection-item" | "append" | "append-item" => {
                Ok(Self::AppendCollectionItem)
            }
            _ => Err(de::Error::custom(format!("unknown operation `{raw}`"))),
        }
    }
}

/// Where an instruction came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionSource {
    /// Extracted directly from user text or documents.
    #[default]
    #[serde(alias = "direct_extraction", alias = "extraction")]
    Direct,
    /// Suggested by the enrichment collaborator; approval-gated.
    Enrichment,
}

/// One structured change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    #[serde(alias = "target_type", alias = "entityType", alias = "entity_type")]
    pub target_type: EntityKind,
    /// Absent means "create a new entity with a generated id".
    #[serde(
        default,
        alias = "target_key",
        alias = "identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_key: Option<Key>,
    #[serde(default, alias = "action")]
    pub operation: Operation,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub source: InstructionSource,
    /// Producer confidence in `[0, 1]`; meaningful for enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Instruction {
    /// Creates a direct create-or-update instruction.
    pub fn upsert(target_type: EntityKind, target_key: Option<Key>, fields: Value) -> Self {
        Self::new(target_type, target_key, Operation::CreateOrUpdate, fields)
    }

    /// Creates a direct instruction with an explicit operation.
    ///
    /// Non-object `fields` values are treated as empty.
    pub fn new(
        target_type: EntityKind,
        target_key: Option<Key>,
        operation: Operation,
        fields: Value,
    ) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            target_type,
            target_key,
            operation,
            fields,
            source: InstructionSource::Direct,
            confidence: None,
        }
    }

    /// Marks this instruction as an enrichment suggestion.
    pub fn as_enrichment(mut self, confidence: Option<f64>) -> Self {
        self.source = InstructionSource::Enrichment;
        self.confidence = confidence;
        self
    }

    pub fn is_enrichment(&self) -> bool {
        self.source == InstructionSource::Enrichment
    }

    /// JSON form used in failure reports.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Failed-instruction record surfaced for human inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedInstruction {
    /// Position in the submitted batch.
    pub index: usize,
    pub original_instruction: Value,
    pub kind: InstructionErrorKind,
    pub reason: String,
}

impl FailedInstruction {
    pub fn new(index: usize, original_instruction: Value, error: &InstructionError) -> Self {
        Self {
            index,
            original_instruction,
            kind: error.kind(),
            reason: error.reason().to_string(),
        }
    }
}

/// Result of one `apply` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// Number of instructions applied.
    pub applied: usize,
    /// Failures in input order.
    pub failed: Vec<FailedInstruction>,
    /// Enrichment instructions held back for approval, in input order.
    pub pending: Vec<Instruction>,
    /// Entities touched by applied instructions, in application order.
    pub touched: Vec<UpsertOutcome>,
}

impl BatchOutcome {
    pub fn applied_count(&self) -> usize {
        self.applied
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Whether every submitted instruction was applied.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Instruction, InstructionSource, Operation};
    use crate::model::entity::{EntityKind, Key};
    use serde_json::json;

    #[test]
    fn instruction_wire_defaults() {
        let instruction: Instruction = serde_json::from_value(json!({
            "targetType": "Tenant",
            "targetKey": "John Smith",
            "fields": {"contactInfo": {"phone": "555-1212"}}
        }))
        .unwrap();

        assert_eq!(instruction.target_type, EntityKind::Tenant);
        assert_eq!(instruction.target_key, Some(Key::natural("John Smith")));
        assert_eq!(instruction.operation, Operation::CreateOrUpdate);
        assert_eq!(instruction.source, InstructionSource::Direct);
    }

    #[test]
    fn operation_accepts_aliases() {
        let parsed: Operation = serde_json::from_value(json!("append_collection_item")).unwrap();
        assert_eq!(parsed, Operation::AppendCollectionItem);
        let parsed: Operation = serde_json::from_value(json!("update")).unwrap();
        assert_eq!(parsed, Operation::CreateOrUpdate);
        assert!(serde_json::from_value::<Operation>(json!("delete")).is_err());
    }

    #[test]
    fn enrichment_marker_roundtrips() {
        let instruction = Instruction::upsert(
            EntityKind::Property,
            Some(Key::id("prop-1")),
            json!({"name": "Wood St"}),
        )
        .as_enrichment(Some(0.9));

        let value = instruction.to_value();
        assert_eq!(value["source"], "enrichment");
        assert_eq!(value["targetKey"], json!({"id": "prop-1"}));
        let decoded: Instruction = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, instruction);
    }
}
