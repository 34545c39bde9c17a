//! Entity Graph Store.
//!
//! # Responsibility
//! - Hold every registry record, keyed by kind then id.
//! - Resolve identifiers and natural keys to entity references.
//! - Apply changes through `Staging` so a change lands whole or not at all.
//!
//! # Invariants
//! - `natural_index` always mirrors the natural-key attribute of every
//!   stored record.
//! - A collection that was loaded (even empty) or written to stays declared
//!   and is serialized.
//! - Records are never removed.
//!
//! # See also
//! - `store::links` for back-reference maintenance inside a staged change.

use crate::error::{InstructionError, ResolveError, SchemaError};
use crate::model::entity::{
    normalize_natural_key, EntityId, EntityKind, EntityRef, Key, UpsertOutcome,
};
use crate::model::record::{AnyRecord, Document, Lease, Owner, Photo, Property, Tenant, Unit};
use crate::store::merge::merge_record;
use crate::store::snapshot::Snapshot;
use log::debug;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

type Collection = BTreeMap<EntityId, AnyRecord>;

/// In-memory registry graph.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    collections: BTreeMap<EntityKind, Collection>,
    extra: Map<String, Value>,
    natural_index: HashMap<EntityKind, HashMap<String, BTreeSet<EntityId>>>,
}

impl PartialEq for GraphStore {
    fn eq(&self, other: &Self) -> bool {
        self.collections == other.collections && self.extra == other.extra
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from a snapshot.
    ///
    /// # Errors
    /// - `MissingId` / `EmptyId` when a record has no usable identifier.
    /// - `KeyMismatch` when the map key differs from the record id.
    /// - `DuplicateId` when an identifier repeats inside a collection.
    /// - `InvalidRecord` when a record does not fit its kind's shape.
    pub fn load(snapshot: Snapshot) -> Result<Self, SchemaError> {
        let (collections, extra) = snapshot.into_parts();
        let mut store = Self {
            extra,
            ..Self::default()
        };
        for (kind, entries) in collections {
            let collection = kind.collection_key();
            store.declare(kind);
            for (key, value) in entries {
                if value.get("id").map_or(true, Value::is_null) {
                    return Err(SchemaError::MissingId { collection, key });
                }
                let record = AnyRecord::from_value(kind, value).map_err(|source| {
                    SchemaError::InvalidRecord {
                        collection,
                        key: key.clone(),
                        source,
                    }
                })?;
                if record.id().trim().is_empty() {
                    return Err(SchemaError::EmptyId { collection, key });
                }
                if record.id() != key {
                    return Err(SchemaError::KeyMismatch {
                        collection,
                        id: record.id().to_string(),
                        key,
                    });
                }
                if store.get(kind, &key).is_some() {
                    return Err(SchemaError::DuplicateId {
                        collection,
                        id: key,
                    });
                }
                store.insert_record(record);
            }
        }
        debug!(
            "event=store_load module=store status=ok entities={}",
            store.entity_count()
        );
        Ok(store)
    }

    /// Parses and loads a snapshot document.
    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        Self::load(Snapshot::from_json_str(raw)?)
    }

    /// Produces the persistable snapshot. Round-trips with `load`.
    pub fn serialize(&self) -> Result<Snapshot, serde_json::Error> {
        let mut collections = BTreeMap::new();
        for (kind, records) in &self.collections {
            let entries = records
                .iter()
                .map(|(id, record)| Ok((id.clone(), record.to_value()?)))
                .collect::<Result<Vec<_>, serde_json::Error>>()?;
            collections.insert(*kind, entries);
        }
        Ok(Snapshot::from_parts(collections, self.extra.clone()))
    }

    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        self.serialize()?.to_json_string_pretty()
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<&AnyRecord> {
        self.collections.get(&kind)?.get(id)
    }

    pub fn contains(&self, target: &EntityRef) -> bool {
        self.get(target.kind, &target.id).is_some()
    }

    /// Records of one kind in id order.
    pub fn records(&self, kind: EntityKind) -> impl Iterator<Item = &AnyRecord> + '_ {
        self.collections
            .get(&kind)
            .into_iter()
            .flat_map(|collection| collection.values())
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.collections.get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn entity_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }

    /// Collections present in the snapshot, including empty ones.
    pub fn declared_kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.collections.keys().copied()
    }

    /// Top-level snapshot keys that are not registry collections.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Collection holding `id`, if any.
    pub fn kind_of(&self, id: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| self.get(*kind, id).is_some())
    }

    /// Resolves a key against one collection.
    pub fn resolve(&self, kind: EntityKind, key: &Key) -> Result<EntityRef, ResolveError> {
        self.resolve_within(kind, key, None)
    }

    /// Resolves a key, narrowing natural-key matches to children of `scope`.
    ///
    /// Scoping applies to units, whose labels repeat across properties: a
    /// unit under `scope` wins, then a unit with no parent property.
    pub fn resolve_within(
        &self,
        kind: EntityKind,
        key: &Key,
        scope: Option<&EntityRef>,
    ) -> Result<EntityRef, ResolveError> {
        match key {
            Key::Identifier(raw) => {
                let id = raw.trim();
                if self.get(kind, id).is_some() {
                    return Ok(EntityRef::new(kind, id));
                }
                match self.kind_of(id) {
                    Some(actual) => Err(ResolveError::WrongKind {
                        id: id.to_string(),
                        expected: kind,
                        actual,
                    }),
                    None => Err(ResolveError::NotFound {
                        kind,
                        key: key.to_string(),
                    }),
                }
            }
            Key::NaturalKey(text) => {
                if !kind.has_natural_key() {
                    return Err(ResolveError::NoNaturalKey { kind });
                }
                let mut matches = self.natural_matches(kind, text);
                if let Some(parent) = scope {
                    matches = self.narrow_to_scope(kind, matches, parent);
                }
                match matches.as_slice() {
                    [] => Err(ResolveError::NotFound {
                        kind,
                        key: key.to_string(),
                    }),
                    [single] => Ok(EntityRef::new(kind, single.clone())),
                    many => Err(ResolveError::Ambiguous {
                        kind,
                        key: key.to_string(),
                        count: many.len(),
                    }),
                }
            }
        }
    }

    fn natural_matches(&self, kind: EntityKind, text: &str) -> Vec<EntityId> {
        self.natural_index
            .get(&kind)
            .and_then(|index| index.get(&normalize_natural_key(text)))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn narrow_to_scope(
        &self,
        kind: EntityKind,
        matches: Vec<EntityId>,
        scope: &EntityRef,
    ) -> Vec<EntityId> {
        if kind != EntityKind::Unit || scope.kind != EntityKind::Property {
            return matches;
        }
        let parent_of = |id: &EntityId| {
            self.unit(id)
                .and_then(|unit| unit.property_id.as_deref())
                .map(str::to_string)
        };
        let scoped: Vec<EntityId> = matches
            .iter()
            .filter(|id| parent_of(*id).as_deref() == Some(scope.id.as_str()))
            .cloned()
            .collect();
        if !scoped.is_empty() {
            return scoped;
        }
        matches
            .into_iter()
            .filter(|id| parent_of(id).is_none())
            .collect()
    }

    /// Resolves or creates an entity, then merges record-shaped `fields`
    /// additively.
    ///
    /// `fields` uses the snapshot field names (camelCase). Relationship
    /// back-references are not maintained here; the interpreter does that.
    ///
    /// # Errors
    /// - `Validation` for blank keys, natural keys on leases, or fields that
    ///   do not fit the record shape.
    /// - `Resolution` when a natural key is ambiguous.
    /// - `Integrity` when an identifier belongs to another collection.
    pub fn upsert(
        &mut self,
        kind: EntityKind,
        key: Option<&Key>,
        fields: &Map<String, Value>,
    ) -> Result<UpsertOutcome, InstructionError> {
        let mut staging = Staging::new();
        let outcome = staging.locate_or_create(self, kind, key, None)?;
        if let Some(record) = staging.get_mut(self, &outcome.entity) {
            merge_record(record, fields).map_err(|_| {
                InstructionError::validation(format!("fields do not fit the {kind} record shape"))
            })?;
        }
        self.commit(staging);
        Ok(outcome)
    }

    /// Writes every staged record back and refreshes the natural-key index.
    pub fn commit(&mut self, staging: Staging) {
        for (_, record) in staging.records {
            self.insert_record(record);
        }
    }

    pub(crate) fn declare(&mut self, kind: EntityKind) {
        self.collections.entry(kind).or_default();
    }

    pub(crate) fn set_extra(&mut self, extra: Map<String, Value>) {
        self.extra = extra;
    }

    pub(crate) fn insert_record(&mut self, record: AnyRecord) {
        let kind = record.kind();
        let id = record.id().to_string();
        let previous_key = self
            .get(kind, &id)
            .and_then(AnyRecord::natural_key)
            .map(normalize_natural_key);
        if let Some(previous_key) = previous_key {
            if let Some(ids) = self
                .natural_index
                .get_mut(&kind)
                .and_then(|index| index.get_mut(&previous_key))
            {
                ids.remove(&id);
            }
        }
        if let Some(natural) = record.natural_key().map(normalize_natural_key) {
            if !natural.is_empty() {
                self.natural_index
                    .entry(kind)
                    .or_default()
                    .entry(natural)
                    .or_default()
                    .insert(id.clone());
            }
        }
        self.collections.entry(kind).or_default().insert(id, record);
    }
}

macro_rules! typed_views {
    ($($get:ident, $iter:ident => $kind:ident, $as_ref:ident, $ty:ty;)*) => {
        impl GraphStore {
            $(
                pub fn $get(&self, id: &str) -> Option<&$ty> {
                    self.get(EntityKind::$kind, id).and_then(AnyRecord::$as_ref)
                }

                pub fn $iter(&self) -> impl Iterator<Item = &$ty> + '_ {
                    self.records(EntityKind::$kind).filter_map(AnyRecord::$as_ref)
                }
            )*
        }
    };
}

typed_views! {
    owner, owners => Owner, as_owner, Owner;
    property, properties => Property, as_property, Property;
    unit, units => Unit, as_unit, Unit;
    tenant, tenants => Tenant, as_tenant, Tenant;
    lease, leases => Lease, as_lease, Lease;
    document, documents => Document, as_document, Document;
    photo, photos => Photo, as_photo, Photo;
}

/// Pending change set over a `GraphStore`.
///
/// Records are cloned on first touch; nothing reaches the store until
/// `GraphStore::commit`. Dropping a staging discards the change.
#[derive(Debug, Default)]
pub struct Staging {
    records: BTreeMap<EntityRef, AnyRecord>,
    created: BTreeSet<EntityRef>,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Staged view of a record, falling back to the store.
    pub fn get<'a>(&'a self, store: &'a GraphStore, target: &EntityRef) -> Option<&'a AnyRecord> {
        self.records
            .get(target)
            .or_else(|| store.get(target.kind, &target.id))
    }

    /// Mutable staged copy of a record; clones it out of the store on first
    /// touch.
    pub fn get_mut(&mut self, store: &GraphStore, target: &EntityRef) -> Option<&mut AnyRecord> {
        if !self.records.contains_key(target) {
            let record = store.get(target.kind, &target.id)?.clone();
            self.records.insert(target.clone(), record);
        }
        self.records.get_mut(target)
    }

    pub fn exists(&self, store: &GraphStore, target: &EntityRef) -> bool {
        self.get(store, target).is_some()
    }

    /// Stages a new id-only record. A natural key, when given, is written to
    /// the record's natural-key attribute.
    pub fn create(&mut self, kind: EntityKind, key: Option<&Key>) -> EntityRef {
        let id = match key {
            Some(Key::Identifier(id)) => id.trim().to_string(),
            _ => kind.generate_id(),
        };
        let mut record = AnyRecord::blank(kind, id);
        if let Some(Key::NaturalKey(text)) = key {
            record.set_natural_key(text);
        }
        let target = record.entity_ref();
        self.records.insert(target.clone(), record);
        self.created.insert(target.clone());
        target
    }

    pub fn is_created(&self, target: &EntityRef) -> bool {
        self.created.contains(target)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolves `key` or stages a new record when nothing matches.
    ///
    /// # Errors
    /// Blank keys and resolution failures other than "not found".
    pub fn locate_or_create(
        &mut self,
        store: &GraphStore,
        kind: EntityKind,
        key: Option<&Key>,
        scope: Option<&EntityRef>,
    ) -> Result<UpsertOutcome, InstructionError> {
        let Some(key) = key else {
            return Ok(UpsertOutcome {
                entity: self.create(kind, None),
                created: true,
            });
        };
        if key.is_blank() {
            return Err(InstructionError::validation(format!(
                "{kind} key must not be blank"
            )));
        }
        match store.resolve_within(kind, key, scope) {
            Ok(entity) => Ok(UpsertOutcome {
                entity,
                created: false,
            }),
            Err(ResolveError::NotFound { .. }) => match self.created_match(kind, key, scope) {
                Some(entity) => Ok(UpsertOutcome {
                    entity,
                    created: false,
                }),
                None => Ok(UpsertOutcome {
                    entity: self.create(kind, Some(key)),
                    created: true,
                }),
            },
            Err(err) => Err(err.into_instruction_error()),
        }
    }

    /// Record created in this staging whose natural key matches `key`.
    ///
    /// A staged unit already placed under another property does not match.
    fn created_match(
        &self,
        kind: EntityKind,
        key: &Key,
        scope: Option<&EntityRef>,
    ) -> Option<EntityRef> {
        let Key::NaturalKey(text) = key else {
            return None;
        };
        let wanted = normalize_natural_key(text);
        self.created
            .iter()
            .filter(|target| target.kind == kind)
            .find(|target| {
                let Some(record) = self.records.get(*target) else {
                    return false;
                };
                let in_scope = match (scope, record.as_unit()) {
                    (Some(parent), Some(unit)) if parent.kind == EntityKind::Property => unit
                        .property_id
                        .as_deref()
                        .map_or(true, |id| id == parent.id),
                    _ => true,
                };
                in_scope
                    && record.natural_key().map(normalize_natural_key).as_deref()
                        == Some(wanted.as_str())
            })
            .cloned()
    }
}
