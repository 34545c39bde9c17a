use proptest::collection::{btree_set, vec};
use proptest::option;
use proptest::prelude::*;
use propledger_core::{build_hierarchy, reconcile, EntityKind, GraphStore, Interpreter, Key};
use serde_json::{json, Map, Value};

fn person_name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,7} [A-Z][a-z]{2,9}"
}

fn phone() -> impl Strategy<Value = String> {
    "[2-9][0-9]{2}-[0-9]{3}-[0-9]{4}"
}

/// Owner names plus, per property, the index of its owner.
fn portfolio() -> impl Strategy<Value = (Vec<String>, Vec<usize>)> {
    vec(person_name(), 1..4).prop_flat_map(|owners| {
        let count = owners.len();
        (Just(owners), vec(0..count, 0..6))
    })
}

fn portfolio_batch(owners: &[String], properties: &[usize]) -> Vec<Value> {
    let mut batch: Vec<Value> = owners
        .iter()
        .map(|name| json!({"targetType": "owner", "targetKey": name}))
        .collect();
    for (index, owner) in properties.iter().enumerate() {
        batch.push(json!({
            "targetType": "property",
            "targetKey": format!("Building {index}"),
            "fields": {"owner": owners[*owner]}
        }));
        batch.push(json!({
            "targetType": "unit",
            "targetKey": "101",
            "fields": {"property": format!("Building {index}")}
        }));
    }
    batch
}

fn id_from(prefix: &str, index: Option<u8>) -> Value {
    index.map_or(Value::Null, |index| Value::from(format!("{prefix}-{index}")))
}

fn ids_from(prefix: &str, indices: &std::collections::BTreeSet<u8>) -> Value {
    Value::from(
        indices
            .iter()
            .map(|index| format!("{prefix}-{index}"))
            .collect::<Vec<_>>(),
    )
}

/// Hand-edited snapshot with arbitrary, possibly dangling, references.
/// Index 3 never exists, so it always dangles.
fn tangled_snapshot() -> impl Strategy<Value = Value> {
    let owner = btree_set(0u8..4, 0..3);
    let property = (option::of(0u8..4), btree_set(0u8..4, 0..3));
    let unit = (option::of(0u8..4), option::of(0u8..4));
    let tenant = option::of(0u8..4);
    let lease = (option::of(0u8..4), option::of(0u8..4));
    (
        vec(owner, 3),
        vec(property, 3),
        vec(unit, 3),
        vec(tenant, 3),
        vec(lease, 3),
    )
        .prop_map(|(owners, properties, units, tenants, leases)| {
            let mut snapshot = Map::new();
            let collection = |entries: Vec<(String, Value)>| {
                Value::Object(entries.into_iter().collect::<Map<String, Value>>())
            };
            snapshot.insert(
                "owners".into(),
                collection(
                    owners
                        .iter()
                        .enumerate()
                        .map(|(i, listed)| {
                            let id = format!("own-{i}");
                            let record = json!({"id": id, "name": format!("Owner {i}"), "propertyIds": ids_from("prop", listed)});
                            (id, record)
                        })
                        .collect(),
                ),
            );
            snapshot.insert(
                "properties".into(),
                collection(
                    properties
                        .iter()
                        .enumerate()
                        .map(|(i, (owner, listed))| {
                            let id = format!("prop-{i}");
                            let record = json!({
                                "id": id,
                                "name": format!("Building {i}"),
                                "ownerId": id_from("own", *owner),
                                "unitIds": ids_from("unit", listed)
                            });
                            (id, record)
                        })
                        .collect(),
                ),
            );
            snapshot.insert(
                "units".into(),
                collection(
                    units
                        .iter()
                        .enumerate()
                        .map(|(i, (property, tenant))| {
                            let id = format!("unit-{i}");
                            let record = json!({
                                "id": id,
                                "unitNumber": format!("{}", 100 + i),
                                "propertyId": id_from("prop", *property),
                                "currentTenantId": id_from("ten", *tenant)
                            });
                            (id, record)
                        })
                        .collect(),
                ),
            );
            snapshot.insert(
                "tenants".into(),
                collection(
                    tenants
                        .iter()
                        .enumerate()
                        .map(|(i, lease)| {
                            let id = format!("ten-{i}");
                            let record = json!({"id": id, "name": format!("Tenant {i}"), "leaseId": id_from("lease", *lease)});
                            (id, record)
                        })
                        .collect(),
                ),
            );
            snapshot.insert(
                "leases".into(),
                collection(
                    leases
                        .iter()
                        .enumerate()
                        .map(|(i, (unit, tenant))| {
                            let id = format!("lease-{i}");
                            let record = json!({"id": id, "unitId": id_from("unit", *unit), "tenantId": id_from("ten", *tenant)});
                            (id, record)
                        })
                        .collect(),
                ),
            );
            Value::Object(snapshot)
        })
}

fn note() -> impl Strategy<Value = String> {
    "[a-z]{1,8}( [a-z]{1,8}){0,2}"
}

/// Spellings producers use for the same collection in `attachedTo.type`.
fn kind_spelling(kind: &'static str) -> impl Strategy<Value = String> {
    prop_oneof![
        Just(kind.to_string()),
        Just(kind.to_uppercase()),
        Just(format!("{}{}s", kind[..1].to_uppercase(), &kind[1..])),
    ]
}

/// Snapshot using every record shape with unknown fields at each level and
/// no explicit nulls, so it must serialize back to the same JSON.
fn annotated_snapshot() -> impl Strategy<Value = Value> {
    (
        note(),
        note(),
        kind_spelling("unit"),
        option::of(note()),
        1u8..29,
        prop_oneof![
            (500u32..5000).prop_map(Value::from),
            (500u32..5000).prop_map(|n| Value::from(f64::from(n) + 0.5)),
        ],
        vec(note(), 0..3),
    )
        .prop_map(|(source, county, spelling, attached_note, day, rent, tags)| {
            let mut attached_to = json!({"type": spelling, "id": "unit-1"});
            if let Some(text) = attached_note {
                attached_to["note"] = Value::from(text);
            }
            json!({
                "owners": {
                    "own-1": {
                        "id": "own-1",
                        "name": "Acme Holdings",
                        "ownershipType": "organization",
                        "contactInfo": {"email": "ops@acme.example", "preferred": {"channel": "email", "tags": tags}},
                        "propertyIds": ["prop-1"],
                        "importedFrom": {"source": source, "rows": [1, 2]}
                    }
                },
                "properties": {
                    "prop-1": {
                        "id": "prop-1",
                        "name": "Maple Court",
                        "ownerId": "own-1",
                        "address": {"street": "12 Maple St", "city": "Springfield", "county": county},
                        "unitIds": ["unit-1"],
                        "expenses": [{"description": "Roof repair", "amount": rent.clone(), "vendor": {"name": "Top Roofing"}}]
                    }
                },
                "units": {
                    "unit-1": {"id": "unit-1", "unitNumber": "1A", "propertyId": "prop-1", "currentTenantId": "ten-1", "documentIds": ["doc-1"]}
                },
                "tenants": {
                    "ten-1": {"id": "ten-1", "name": "Jane Doe", "leaseId": "lease-1", "pets": [{"kind": "cat"}]}
                },
                "leases": {
                    "lease-1": {
                        "id": "lease-1",
                        "unitId": "unit-1",
                        "propertyId": "prop-1",
                        "tenantId": "ten-1",
                        "startDate": format!("2024-03-{day:02}"),
                        "rentAmount": rent
                    }
                },
                "documents": {
                    "doc-1": {"id": "doc-1", "name": "Lease scan", "type": "lease", "attachedTo": attached_to}
                },
                "photos": {},
                "schemaNotes": {"editedBy": "hand"}
            })
        })
}

#[test]
fn attached_to_keeps_its_spelling_and_extra_fields() {
    let snapshot = json!({
        "units": {"u1": {"id": "u1"}},
        "photos": {"ph-1": {"id": "ph-1", "url": "https://x/front.jpg", "attachedTo": {"type": "Unit", "id": "u1", "note": "front"}}}
    });
    let store = GraphStore::from_json_str(&snapshot.to_string()).unwrap();

    let target = store.photo("ph-1").unwrap().attached_to.clone().unwrap();
    assert_eq!(target.kind, EntityKind::Unit);
    assert_eq!(store.serialize().unwrap().to_value(), snapshot);
}

proptest! {
    #[test]
    fn load_then_serialize_reproduces_the_document(snapshot in annotated_snapshot()) {
        let store = GraphStore::from_json_str(&snapshot.to_string()).unwrap();
        prop_assert_eq!(store.serialize().unwrap().to_value(), snapshot);
    }

    #[test]
    fn reapplying_unnamed_attachments_is_a_no_op(
        urls in btree_set("[a-z]{3,8}", 1..4),
        repeats in 1usize..3,
    ) {
        let items: Vec<Value> = urls
            .iter()
            .flat_map(|url| {
                let item = json!({"url": format!("https://files.example.com/{url}.pdf")});
                std::iter::repeat(item).take(repeats)
            })
            .collect();
        let batch = vec![
            json!({"targetType": "property", "targetKey": "Maple Court"}),
            json!({"targetType": "property", "targetKey": "Maple Court", "operation": "append-collection-item", "fields": {"documents": items}}),
        ];
        let interpreter = Interpreter::default();
        let mut store = GraphStore::new();

        prop_assert!(interpreter.apply_json(&mut store, &batch).is_clean());
        let after_first = store.clone();
        prop_assert!(interpreter.apply_json(&mut store, &batch).is_clean());

        prop_assert_eq!(&store, &after_first);
        prop_assert_eq!(store.len(EntityKind::Document), urls.len());
    }

    #[test]
    fn updates_never_drop_known_contact_details(name in person_name(), phone in phone()) {
        let mut store = GraphStore::new();
        let outcome = Interpreter::default().apply_json(&mut store, &[
            json!({"targetType": "tenant", "targetKey": name, "fields": {"phone": phone}}),
            json!({"targetType": "tenant", "targetKey": name.to_lowercase(), "fields": {"email": "tenant@example.com"}}),
            json!({"targetType": "tenant", "targetKey": name, "fields": {"phone": null}}),
        ]);

        prop_assert!(outcome.is_clean());
        prop_assert_eq!(store.len(EntityKind::Tenant), 1);
        let tenant = store.tenants().next().unwrap();
        let contact = tenant.contact_info.as_ref().unwrap();
        prop_assert!(contact.phone.is_some());
        prop_assert_eq!(contact.email.as_deref(), Some("tenant@example.com"));
        prop_assert_eq!(tenant.name.as_deref(), Some(name.as_str()));
    }

    #[test]
    fn reapplying_a_keyed_batch_is_a_no_op((owners, properties) in portfolio()) {
        let interpreter = Interpreter::default();
        let batch = portfolio_batch(&owners, &properties);
        let mut store = GraphStore::new();

        let first = interpreter.apply_json(&mut store, &batch);
        prop_assert!(first.is_clean());
        let after_first = store.clone();
        let second = interpreter.apply_json(&mut store, &batch);

        prop_assert!(second.is_clean());
        prop_assert!(second.touched.iter().all(|touched| !touched.created));
        prop_assert_eq!(&store, &after_first);
        prop_assert_eq!(store.len(EntityKind::Property), properties.len());
        prop_assert_eq!(store.len(EntityKind::Unit), properties.len());
    }

    #[test]
    fn serialize_then_load_preserves_the_store((owners, properties) in portfolio()) {
        let mut store = GraphStore::new();
        Interpreter::default().apply_json(&mut store, &portfolio_batch(&owners, &properties));

        let reloaded = GraphStore::load(store.serialize().unwrap()).unwrap();
        prop_assert_eq!(&reloaded, &store);
        for owner in &owners {
            prop_assert!(reloaded.resolve(EntityKind::Owner, &Key::natural(owner.as_str())).is_ok());
        }
    }

    #[test]
    fn reconcile_reaches_a_fixed_point(snapshot in tangled_snapshot()) {
        let mut store = GraphStore::from_json_str(&snapshot.to_string()).unwrap();
        let entities = store.entity_count();

        reconcile(&mut store);
        let repaired = store.clone();
        let second = reconcile(&mut store);

        prop_assert!(second.is_clean(), "{:?}", second.issues);
        prop_assert_eq!(&store, &repaired);
        prop_assert_eq!(store.entity_count(), entities);

        let hierarchy = build_hierarchy(&store);
        prop_assert_eq!(hierarchy.record_count(), entities);
        prop_assert_eq!(&hierarchy.flatten(), &store);
    }
}
