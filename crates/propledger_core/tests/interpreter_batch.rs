use propledger_core::{
    CollisionPolicy, EnrichmentMode, EntityKind, GraphStore, Instruction, InstructionErrorKind,
    Interpreter, InterpreterConfig, Key,
};
use serde_json::{json, Value};

fn interpreter_with(config: InterpreterConfig) -> Interpreter {
    Interpreter::new(config)
}

fn registry_batch() -> Vec<Value> {
    vec![
        json!({"targetType": "owner", "targetKey": "Acme Holdings", "fields": {"ownershipType": "LLC"}}),
        json!({"targetType": "property", "targetKey": "Maple Court", "fields": {
            "owner": "Acme Holdings",
            "address": "12 Maple St, Springfield, IL 62701"
        }}),
        json!({"targetType": "unit", "targetKey": "1A", "fields": {"property": "Maple Court"}}),
        json!({"targetType": "tenant", "targetKey": "Jane Doe", "fields": {"email": "jane@example.com"}}),
        json!({"targetType": "unit", "targetKey": "1A", "operation": "link", "fields": {
            "property": "Maple Court",
            "currentTenant": "Jane Doe"
        }}),
    ]
}

#[test]
fn phone_then_email_updates_one_tenant() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "tenant", "targetKey": "John Smith", "fields": {"phone": "555-123-4567"}}),
            json!({"targetType": "tenant", "targetKey": "john  smith", "fields": {"email": "john@example.com"}}),
        ],
    );

    assert_eq!(outcome.applied_count(), 2);
    assert!(outcome.failed.is_empty());
    assert!(outcome.touched[0].created);
    assert!(!outcome.touched[1].created);
    assert_eq!(outcome.touched[0].entity, outcome.touched[1].entity);

    assert_eq!(store.len(EntityKind::Tenant), 1);
    let tenant = store.tenants().next().unwrap();
    assert_eq!(tenant.name.as_deref(), Some("John Smith"));
    let contact = tenant.contact_info.as_ref().unwrap();
    assert_eq!(contact.phone.as_deref(), Some("555-123-4567"));
    assert_eq!(contact.email.as_deref(), Some("john@example.com"));
}

#[test]
fn lease_for_unknown_tenant_fails_and_leaves_store_unchanged() {
    let mut store = GraphStore::from_json_str(r#"{"tenants": {}, "leases": {}}"#).unwrap();
    let before = store.clone();

    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[json!({"targetType": "lease", "fields": {"tenant": "Jane Doe", "rent": "$1,200"}})],
    );

    assert_eq!(outcome.applied_count(), 0);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, 0);
    assert_eq!(outcome.failed[0].kind, InstructionErrorKind::Resolution);
    assert_eq!(outcome.failed[0].original_instruction["fields"]["tenant"], "Jane Doe");
    assert_eq!(store, before);
}

#[test]
fn forward_reference_resolves_on_retry() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "lease", "fields": {"tenant": "Jane Doe", "rentAmount": 1200, "startDate": "2024-01-01"}}),
            json!({"targetType": "tenant", "targetKey": "Jane Doe"}),
        ],
    );

    assert!(outcome.is_clean());
    assert_eq!(outcome.applied_count(), 2);
    let tenant = store.tenants().next().unwrap();
    let lease = store.leases().next().unwrap();
    assert_eq!(lease.tenant_id.as_deref(), Some(tenant.id.as_str()));
    assert_eq!(tenant.lease_id.as_deref(), Some(lease.id.as_str()));
    assert_eq!(lease.rent_amount.as_ref().unwrap().as_f64(), 1200.0);
}

#[test]
fn reapplying_a_keyed_batch_changes_nothing() {
    let interpreter = Interpreter::default();
    let mut store = GraphStore::new();
    let first = interpreter.apply_json(&mut store, &registry_batch());
    assert!(first.is_clean(), "{:?}", first.failed);
    let after_first = store.clone();

    let second = interpreter.apply_json(&mut store, &registry_batch());
    assert!(second.is_clean());
    assert!(second.touched.iter().all(|touched| !touched.created));
    assert_eq!(store, after_first);

    let owner = store.owners().next().unwrap();
    let property = store.properties().next().unwrap();
    let unit = store.units().next().unwrap();
    let tenant = store.tenants().next().unwrap();
    assert_eq!(owner.property_ids, Some(vec![property.id.clone()]));
    assert_eq!(property.owner_id.as_deref(), Some(owner.id.as_str()));
    assert_eq!(property.unit_ids, Some(vec![unit.id.clone()]));
    assert_eq!(unit.current_tenant_id.as_deref(), Some(tenant.id.as_str()));
}

#[test]
fn enrichment_waits_for_approval_by_default() {
    let mut store = GraphStore::new();
    let suggestion = Instruction::upsert(
        EntityKind::Tenant,
        Some(Key::natural("Jane Doe")),
        json!({"phone": "555-000-1111"}),
    )
    .as_enrichment(Some(0.95));

    let interpreter = Interpreter::default();
    let outcome = interpreter.apply(&mut store, &[suggestion.clone()]);
    assert_eq!(outcome.applied_count(), 0);
    assert_eq!(outcome.pending, vec![suggestion]);
    assert!(store.is_empty());

    let approved = interpreter.apply_approved(&mut store, &outcome.pending);
    assert_eq!(approved.applied_count(), 1);
    assert_eq!(store.len(EntityKind::Tenant), 1);
}

#[test]
fn apply_mode_honours_the_confidence_threshold() {
    let interpreter = interpreter_with(InterpreterConfig {
        enrichment_mode: EnrichmentMode::Apply,
        min_enrichment_confidence: 0.8,
        ..InterpreterConfig::default()
    });
    let mut store = GraphStore::new();
    let outcome = interpreter.apply_json(
        &mut store,
        &[
            json!({"targetType": "owner", "targetKey": "Confident", "source": "enrichment", "confidence": 0.9}),
            json!({"targetType": "owner", "targetKey": "Unsure", "source": "enrichment", "confidence": 0.5}),
            json!({"targetType": "owner", "targetKey": "Unscored", "source": "enrichment"}),
        ],
    );

    assert_eq!(outcome.applied_count(), 1);
    assert_eq!(outcome.pending.len(), 2);
    assert_eq!(store.len(EntityKind::Owner), 1);
    assert!(store.resolve(EntityKind::Owner, &Key::natural("confident")).is_ok());
}

#[test]
fn merge_policy_treats_same_name_as_same_entity() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "tenant", "targetKey": "John Smith", "fields": {"phone": "555-111-2222"}}),
            json!({"targetType": "tenant", "targetKey": "John Smith", "fields": {"phone": "555-333-4444"}}),
        ],
    );

    assert!(outcome.is_clean());
    assert_eq!(store.len(EntityKind::Tenant), 1);
    let tenant = store.tenants().next().unwrap();
    assert_eq!(
        tenant.contact_info.as_ref().unwrap().phone.as_deref(),
        Some("555-333-4444")
    );
}

#[test]
fn disambiguate_policy_splits_conflicting_namesakes() {
    let interpreter = interpreter_with(InterpreterConfig {
        collision_policy: CollisionPolicy::Disambiguate,
        ..InterpreterConfig::default()
    });
    let mut store = GraphStore::new();
    let outcome = interpreter.apply_json(
        &mut store,
        &[
            json!({"targetType": "tenant", "targetKey": "John Smith", "fields": {"phone": "555-111-2222"}}),
            json!({"targetType": "tenant", "targetKey": "John Smith", "fields": {"phone": "555-333-4444"}}),
            json!({"targetType": "unit", "targetKey": "2B", "fields": {"currentTenant": "John Smith"}}),
        ],
    );

    assert_eq!(store.len(EntityKind::Tenant), 2);
    assert!(outcome.touched[1].created);
    assert_eq!(outcome.applied_count(), 2);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, 2);
    assert_eq!(outcome.failed[0].kind, InstructionErrorKind::Resolution);
    assert!(outcome.failed[0].reason.contains("matches 2"));
}

#[test]
fn disambiguate_policy_merges_into_preexisting_entities() {
    let interpreter = interpreter_with(InterpreterConfig {
        collision_policy: CollisionPolicy::Disambiguate,
        ..InterpreterConfig::default()
    });
    let mut store = GraphStore::from_json_str(
        r#"{"tenants": {"ten-1": {"id": "ten-1", "name": "John Smith", "contactInfo": {"phone": "555-111-2222"}}}}"#,
    )
    .unwrap();
    let outcome = interpreter.apply_json(
        &mut store,
        &[json!({"targetType": "tenant", "targetKey": "John Smith", "fields": {"phone": "555-333-4444"}})],
    );

    assert!(outcome.is_clean());
    assert_eq!(store.len(EntityKind::Tenant), 1);
}

#[test]
fn identifier_of_another_kind_is_an_integrity_failure() {
    let mut store = GraphStore::from_json_str(
        r#"{"tenants": {"ten-1": {"id": "ten-1", "name": "Jane"}}, "properties": {}}"#,
    )
    .unwrap();
    let before = store.clone();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[json!({"targetType": "property", "targetKey": "Maple Court", "fields": {"ownerId": "ten-1"}})],
    );

    assert_eq!(outcome.failed[0].kind, InstructionErrorKind::Integrity);
    assert_eq!(store, before);
}

#[test]
fn photos_cannot_attach_to_tenants() {
    let mut store =
        GraphStore::from_json_str(r#"{"tenants": {"ten-1": {"id": "ten-1", "name": "Jane"}}}"#)
            .unwrap();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[json!({"targetType": "photo", "targetKey": "https://example.com/a.jpg", "fields": {
            "attachedTo": {"type": "tenant", "id": "ten-1"}
        }})],
    );

    assert_eq!(outcome.failed[0].kind, InstructionErrorKind::Integrity);
    assert_eq!(store.len(EntityKind::Photo), 0);
}

#[test]
fn lease_unit_outside_its_property_is_rejected() {
    let mut store = GraphStore::from_json_str(
        r#"{
            "properties": {
                "prop-1": {"id": "prop-1", "name": "Maple Court", "unitIds": ["unit-1"]},
                "prop-2": {"id": "prop-2", "name": "Oak Villas"}
            },
            "units": {"unit-1": {"id": "unit-1", "unitNumber": "1A", "propertyId": "prop-1"}}
        }"#,
    )
    .unwrap();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "lease", "fields": {"propertyId": "prop-2", "unitId": "unit-1"}}),
            json!({"targetType": "lease", "fields": {"unitId": "unit-1"}}),
        ],
    );

    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].kind, InstructionErrorKind::Integrity);
    let lease = store.leases().next().unwrap();
    assert_eq!(lease.property_id.as_deref(), Some("prop-1"));
}

#[test]
fn invalid_fields_are_validation_failures() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "tenant", "targetKey": "Jane", "fields": {"favouriteColour": "blue"}}),
            json!({"targetType": "lease", "fields": {"startDate": "someday"}}),
            json!({"targetType": "lease", "targetKey": "Jane's lease"}),
            json!({"targetType": "tenant", "targetKey": "Jane", "operation": "link", "fields": {"email": "jane@example.com"}}),
            json!({"targetType": "tenant", "targetKey": "   "}),
        ],
    );

    assert_eq!(outcome.applied_count(), 0);
    let indices: Vec<usize> = outcome.failed.iter().map(|failed| failed.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert!(outcome
        .failed
        .iter()
        .all(|failed| failed.kind == InstructionErrorKind::Validation));
    assert!(store.is_empty());
}

#[test]
fn malformed_items_fail_in_place_without_stopping_the_batch() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "spaceship"}),
            json!({"targetType": "owner", "targetKey": "Acme"}),
            json!("just some text"),
        ],
    );

    assert_eq!(outcome.applied_count(), 1);
    assert_eq!(outcome.failed.len(), 2);
    assert_eq!(outcome.failed[0].index, 0);
    assert_eq!(outcome.failed[1].index, 2);
    assert_eq!(outcome.failed[1].original_instruction, json!("just some text"));
    assert_eq!(outcome.failed[1].kind, InstructionErrorKind::Validation);
}

#[test]
fn appended_documents_are_created_and_attached() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "property", "targetKey": "Maple Court"}),
            json!({"targetType": "property", "targetKey": "Maple Court", "operation": "append-collection-item", "fields": {
                "documents": [{"name": "Insurance 2024", "type": "insurance"}],
                "expenses": [{"description": "Roof repair", "amount": 2475.0}]
            }}),
            json!({"targetType": "property", "targetKey": "Maple Court", "operation": "append-collection-item", "fields": {
                "expenses": {"description": "Roof repair", "amount": 2475}
            }}),
        ],
    );

    assert!(outcome.is_clean(), "{:?}", outcome.failed);
    let property = store.properties().next().unwrap();
    let document = store.documents().next().unwrap();
    assert_eq!(document.doc_type.as_deref(), Some("insurance"));
    assert_eq!(document.attached_to.as_ref().unwrap().id, property.id);
    assert_eq!(property.document_ids, Some(vec![document.id.clone()]));
    assert_eq!(property.expenses.as_ref().unwrap().len(), 1);
    assert!(outcome
        .touched
        .iter()
        .any(|touched| touched.entity.kind == EntityKind::Document && touched.created));
}

#[test]
fn unnamed_attachments_are_not_duplicated_on_reapply() {
    let batch = vec![
        json!({"targetType": "lease", "targetKey": {"id": "lease-1"}}),
        json!({"targetType": "lease", "targetKey": {"id": "lease-1"}, "operation": "append-collection-item", "fields": {
            "documents": [
                {"url": "https://files.example.com/lease.pdf", "type": "lease"},
                {"url": "https://files.example.com/lease.pdf", "type": "lease"}
            ]
        }}),
    ];
    let interpreter = Interpreter::default();
    let mut store = GraphStore::new();

    assert!(interpreter.apply_json(&mut store, &batch).is_clean());
    let after_first = store.clone();
    let second = interpreter.apply_json(&mut store, &batch);

    assert!(second.is_clean(), "{:?}", second.failed);
    assert_eq!(store, after_first);
    assert_eq!(store.len(EntityKind::Document), 1);
    let lease = store.lease("lease-1").unwrap();
    assert_eq!(lease.document_ids.as_ref().unwrap().len(), 1);
}

#[test]
fn unnamed_attachment_with_new_values_becomes_a_new_record() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "lease", "targetKey": {"id": "lease-1"}}),
            json!({"targetType": "lease", "targetKey": {"id": "lease-1"}, "operation": "append-collection-item", "fields": {
                "documents": [{"url": "https://files.example.com/lease.pdf"}]
            }}),
            json!({"targetType": "lease", "targetKey": {"id": "lease-1"}, "operation": "append-collection-item", "fields": {
                "documents": [{"url": "https://files.example.com/addendum.pdf"}]
            }}),
        ],
    );

    assert!(outcome.is_clean(), "{:?}", outcome.failed);
    assert_eq!(store.len(EntityKind::Document), 2);
}

#[test]
fn namesakes_in_one_append_share_a_record() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "property", "targetKey": "Maple Court"}),
            json!({"targetType": "property", "targetKey": "Maple Court", "operation": "append-collection-item", "fields": {
                "documents": [{"name": "Deed"}, {"name": "deed", "type": "deed"}]
            }}),
        ],
    );

    assert!(outcome.is_clean(), "{:?}", outcome.failed);
    assert_eq!(store.len(EntityKind::Document), 1);
    let deed = store.resolve(EntityKind::Document, &Key::natural("DEED")).unwrap();
    assert_eq!(store.document(&deed.id).unwrap().doc_type.as_deref(), Some("deed"));
}

#[test]
fn failures_report_the_instruction_as_submitted() {
    let submitted = json!({
        "target_type": "Leases",
        "action": "update",
        "fields": {"tenant": "Nobody Known", "rent": "$900"}
    });
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(&mut store, &[submitted.clone()]);

    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].kind, InstructionErrorKind::Resolution);
    assert_eq!(outcome.failed[0].original_instruction, submitted);
}

#[test]
fn approved_json_skips_the_gate_and_reports_bad_entries() {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_approved_json(
        &mut store,
        &[
            json!({"targetType": "tenant", "targetKey": "Jane Doe", "source": "enrichment", "fields": {"phone": "555-987-6543"}}),
            json!({"targetType": "garage"}),
        ],
    );

    assert_eq!(outcome.applied_count(), 1);
    assert!(outcome.pending.is_empty());
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, 1);
    assert_eq!(outcome.failed[0].original_instruction, json!({"targetType": "garage"}));
}
