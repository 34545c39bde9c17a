use propledger_core::collab::{mark_as_enrichment, EnrichmentProducer, ProducerError};
use propledger_core::{
    EnrichmentMode, EntityKind, GraphStore, Interpreter, InterpreterConfig, Snapshot,
};
use serde_json::{json, Value};

/// Suggests a contact phone for every tenant the source text mentions.
struct DirectoryLookup;

impl EnrichmentProducer for DirectoryLookup {
    fn suggest(&self, snapshot: &Snapshot, source_text: &str) -> Result<Vec<Value>, ProducerError> {
        let tenants = snapshot
            .collection(EntityKind::Tenant)
            .ok_or_else(|| ProducerError("snapshot has no tenants".to_string()))?;
        let suggestions = tenants
            .iter()
            .filter_map(|(_, record)| record["name"].as_str())
            .filter(|name| source_text.contains(name))
            .map(|name| {
                json!({
                    "targetType": "tenant",
                    "targetKey": name,
                    "fields": {"phone": "555-010-0000"}
                })
            })
            .collect();
        Ok(mark_as_enrichment(suggestions, Some(0.7)))
    }
}

fn registry() -> GraphStore {
    GraphStore::from_json_str(
        r#"{"tenants": {
            "ten-1": {"id": "ten-1", "name": "Jane Doe"},
            "ten-2": {"id": "ten-2", "name": "Sam Lee"}
        }}"#,
    )
    .unwrap()
}

#[test]
fn suggestions_wait_for_approval_then_apply() {
    let mut store = registry();
    let snapshot = store.serialize().unwrap();
    let suggestions = DirectoryLookup
        .suggest(&snapshot, "Called Jane Doe about the water heater.")
        .unwrap();
    assert_eq!(suggestions.len(), 1);

    let interpreter = Interpreter::default();
    let outcome = interpreter.apply_json(&mut store, &suggestions);
    assert_eq!(outcome.pending.len(), 1);
    assert_eq!(store, registry());

    let approved = interpreter.apply_approved(&mut store, &outcome.pending);
    assert!(approved.is_clean());
    let jane = store.tenant("ten-1").unwrap();
    assert_eq!(
        jane.contact_info.as_ref().unwrap().phone.as_deref(),
        Some("555-010-0000")
    );
    assert!(store.tenant("ten-2").unwrap().contact_info.is_none());
}

#[test]
fn low_confidence_suggestions_stay_pending_in_apply_mode() {
    let mut store = registry();
    let snapshot = store.serialize().unwrap();
    let suggestions = DirectoryLookup
        .suggest(&snapshot, "Jane Doe and Sam Lee renewed.")
        .unwrap();

    let interpreter = Interpreter::new(InterpreterConfig {
        enrichment_mode: EnrichmentMode::Apply,
        ..InterpreterConfig::default()
    });
    let outcome = interpreter.apply_json(&mut store, &suggestions);
    assert_eq!(outcome.applied_count(), 0);
    assert_eq!(outcome.pending.len(), 2);

    let relaxed = Interpreter::new(InterpreterConfig {
        enrichment_mode: EnrichmentMode::Apply,
        min_enrichment_confidence: 0.6,
        ..InterpreterConfig::default()
    });
    let outcome = relaxed.apply_json(&mut store, &suggestions);
    assert_eq!(outcome.applied_count(), 2);
    assert!(outcome.pending.is_empty());
}

#[test]
fn producer_errors_surface_without_touching_the_store() {
    let store = GraphStore::new();
    let err = DirectoryLookup
        .suggest(&store.serialize().unwrap(), "Jane Doe")
        .unwrap_err();
    assert_eq!(err.to_string(), "snapshot has no tenants");
}
