use propledger_core::service::normalizer::RepairAction;
use propledger_core::{build_hierarchy, normalize, reconcile, GraphStore, Interpreter};
use serde_json::{json, Value};

fn seeded_registry() -> GraphStore {
    let mut store = GraphStore::new();
    let outcome = Interpreter::default().apply_json(
        &mut store,
        &[
            json!({"targetType": "owner", "targetKey": "Acme Holdings", "fields": {"ownershipType": "llc"}}),
            json!({"targetType": "property", "targetKey": "Maple Court", "fields": {"owner": "Acme Holdings"}}),
            json!({"targetType": "unit", "targetKey": "1A", "fields": {"property": "Maple Court"}}),
            json!({"targetType": "tenant", "targetKey": "Jane Doe"}),
            json!({"targetType": "unit", "targetKey": "1A", "operation": "link", "fields": {
                "property": "Maple Court",
                "currentTenant": "Jane Doe"
            }}),
            json!({"targetType": "lease", "fields": {
                "property": "Maple Court",
                "unit": "1A",
                "tenant": "Jane Doe",
                "startDate": "2024-03-01",
                "rent": "$1,450.00"
            }}),
            json!({"targetType": "document", "targetKey": "Signed lease", "fields": {
                "attachedTo": {"type": "tenant", "name": "Jane Doe"}
            }}),
            json!({"targetType": "property", "targetKey": "Lakeside Lot"}),
        ],
    );
    assert!(outcome.is_clean(), "{:?}", outcome.failed);
    store
}

#[test]
fn interpreter_output_is_already_consistent() {
    let mut store = seeded_registry();
    let before = store.clone();

    let report = reconcile(&mut store);
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(store, before);
}

#[test]
fn hierarchy_places_every_record_once() {
    let store = seeded_registry();
    let hierarchy = build_hierarchy(&store);

    assert_eq!(hierarchy.record_count(), store.entity_count());
    assert_eq!(hierarchy.owners.len(), 1);
    let property = &hierarchy.owners[0].properties[0];
    assert_eq!(property.property.name.as_deref(), Some("Maple Court"));
    let tenant = property.units[0].tenant.as_ref().unwrap();
    assert_eq!(tenant.tenant.name.as_deref(), Some("Jane Doe"));
    assert_eq!(tenant.leases.len(), 1);
    assert_eq!(tenant.documents.len(), 1);

    assert_eq!(hierarchy.unattached.properties.len(), 1);
    assert_eq!(
        hierarchy.unattached.properties[0].property.name.as_deref(),
        Some("Lakeside Lot")
    );
    assert_eq!(hierarchy.flatten(), store);
}

#[test]
fn hierarchy_serializes_as_nested_records() {
    let store = seeded_registry();
    let value = serde_json::to_value(build_hierarchy(&store)).unwrap();

    let owner = &value["owners"][0];
    assert_eq!(owner["name"], "Acme Holdings");
    assert_eq!(owner["ownershipType"], "organization");
    let unit = &owner["properties"][0]["units"][0];
    assert_eq!(unit["unitNumber"], "1A");
    assert_eq!(unit["tenant"]["name"], "Jane Doe");
    assert_eq!(unit["tenant"]["leases"][0]["startDate"], "2024-03-01");
    assert_eq!(value["unattached"]["properties"][0]["name"], "Lakeside Lot");
}

#[test]
fn normalize_repairs_hand_edited_snapshots() {
    let mut store = GraphStore::from_json_str(
        &json!({
            "owners": {
                "own-1": {"id": "own-1", "name": "Acme Holdings", "propertyIds": ["prop-9"]}
            },
            "properties": {
                "prop-1": {"id": "prop-1", "name": "Maple Court", "ownerId": "own-1", "unitIds": ["unit-2"]}
            },
            "units": {
                "unit-1": {"id": "unit-1", "unitNumber": "1A", "propertyId": "prop-1", "currentTenantId": "ten-404"},
                "unit-2": {"id": "unit-2", "unitNumber": "2A"}
            },
            "leases": {
                "lease-1": {"id": "lease-1", "tenantId": "ten-1"}
            },
            "tenants": {
                "ten-1": {"id": "ten-1", "name": "Jane Doe"}
            }
        })
        .to_string(),
    )
    .unwrap();

    let normalized = normalize(&mut store);
    let actions: Vec<RepairAction> = normalized
        .report
        .issues
        .iter()
        .map(|issue| issue.action)
        .collect();
    assert!(actions.contains(&RepairAction::RemovedDangling));
    assert!(actions.contains(&RepairAction::AddedBackReference));
    assert!(actions.contains(&RepairAction::FilledReference));

    let owner = store.owner("own-1").unwrap();
    assert_eq!(owner.property_ids, Some(vec!["prop-1".to_string()]));
    let property = store.property("prop-1").unwrap();
    let mut units = property.unit_ids.clone().unwrap();
    units.sort();
    assert_eq!(units, vec!["unit-1".to_string(), "unit-2".to_string()]);
    assert_eq!(store.unit("unit-2").unwrap().property_id.as_deref(), Some("prop-1"));
    assert_eq!(store.unit("unit-1").unwrap().current_tenant_id, None);
    assert_eq!(store.tenant("ten-1").unwrap().lease_id.as_deref(), Some("lease-1"));

    let unattached = &normalized.hierarchy.unattached;
    assert!(unattached.properties.is_empty() && unattached.units.is_empty());
    assert!(unattached.leases.is_empty());
    assert_eq!(unattached.tenants.len(), 1);
    let homeless = &unattached.tenants[0];
    assert_eq!(homeless.tenant.id, "ten-1");
    assert_eq!(homeless.leases.len(), 1);
    assert_eq!(homeless.leases[0].lease.id, "lease-1");
    assert_eq!(normalized.hierarchy.record_count(), store.entity_count());
    assert!(reconcile(&mut store).is_clean());
}

#[test]
fn empty_registry_normalizes_to_empty_tree() {
    let mut store = GraphStore::from_json_str(r#"{"owners": {}, "notes": "keep me"}"#).unwrap();
    let normalized = normalize(&mut store);

    assert!(normalized.report.is_clean());
    assert_eq!(serde_json::to_value(&normalized.hierarchy).unwrap(), json!({"owners": []}));
    let flattened = normalized.hierarchy.flatten();
    assert_eq!(flattened, store);
    assert_eq!(flattened.extra().get("notes"), Some(&Value::from("keep me")));
}
