//! Persisted snapshot document.
//!
//! # Responsibility
//! - Parse the snapshot JSON into per-collection record entries without
//!   collapsing duplicate keys, so duplicate identifiers can be rejected.
//! - Render the persistable JSON form.
//!
//! # Invariants
//! - Top-level keys other than the seven collections are preserved verbatim.
//! - A collection present in the input (even empty) is present in the output.

use crate::error::SchemaError;
use crate::model::entity::EntityKind;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Formatter;

/// One collection as read: `(map key, record JSON)` in document order.
pub type CollectionEntries = Vec<(String, Value)>;

/// Whole-registry snapshot, structurally checked at the top level only.
///
/// Record-level checks (ids, shapes) happen in `GraphStore::load`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    collections: BTreeMap<EntityKind, CollectionEntries>,
    extra: Map<String, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a snapshot document.
    ///
    /// # Errors
    /// - `SchemaError::Parse` when the text is not a JSON object of the
    ///   expected shape.
    /// - `SchemaError::DuplicateCollection` when a top-level key repeats.
    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let document: RawDocument = serde_json::from_str(raw)?;
        Self::from_entries(document.0)
    }

    /// Builds a snapshot from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let document: RawDocument = serde_json::from_value(value)?;
        Self::from_entries(document.0)
    }

    fn from_entries(entries: Vec<(String, TopLevel)>) -> Result<Self, SchemaError> {
        let mut seen = BTreeSet::new();
        let mut snapshot = Self::default();
        for (key, entry) in entries {
            if !seen.insert(key.clone()) {
                return Err(SchemaError::DuplicateCollection(key));
            }
            match entry {
                TopLevel::Collection(kind, records) => {
                    snapshot.collections.insert(kind, records);
                }
                TopLevel::Other(value) => {
                    snapshot.extra.insert(key, value);
                }
            }
        }
        Ok(snapshot)
    }

    pub(crate) fn from_parts(
        collections: BTreeMap<EntityKind, CollectionEntries>,
        extra: Map<String, Value>,
    ) -> Self {
        Self { collections, extra }
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<EntityKind, CollectionEntries>, Map<String, Value>) {
        (self.collections, self.extra)
    }

    /// Entries of one collection, or `None` when the collection is absent.
    pub fn collection(&self, kind: EntityKind) -> Option<&[(String, Value)]> {
        self.collections.get(&kind).map(Vec::as_slice)
    }

    /// Number of records in one collection; `0` when absent.
    pub fn record_count(&self, kind: EntityKind) -> usize {
        self.collections.get(&kind).map_or(0, Vec::len)
    }

    /// Top-level keys that are not registry collections.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn is_empty(&self) -> bool {
        self.collections.values().all(Vec::is_empty) && self.extra.is_empty()
    }

    /// JSON form of the snapshot.
    pub fn to_value(&self) -> Value {
        let mut document = self.extra.clone();
        for (kind, entries) in &self.collections {
            let records = entries
                .iter()
                .map(|(key, record)| (key.clone(), record.clone()))
                .collect::<Map<_, _>>();
            document.insert(kind.collection_key().to_string(), Value::Object(records));
        }
        Value::Object(document)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = RawDocument::deserialize(deserializer)?;
        Self::from_entries(document.0).map_err(de::Error::custom)
    }
}

enum TopLevel {
    Collection(EntityKind, CollectionEntries),
    Other(Value),
}

struct RawDocument(Vec<(String, TopLevel)>);

impl<'de> Deserialize<'de> for RawDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RawDocumentVisitor)
    }
}

struct RawDocumentVisitor;

impl<'de> Visitor<'de> for RawDocumentVisitor {
    type Value = RawDocument;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("a snapshot object with keyed entity collections")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawDocument, A::Error> {
        let mut entries = Vec::new();
        while let Some(key) = map.next_key::<String>()? {
            let entry = match collection_kind(&key) {
                Some(kind) => TopLevel::Collection(kind, map.next_value::<OrderedEntries>()?.0),
                None => TopLevel::Other(map.next_value()?),
            };
            entries.push((key, entry));
        }
        Ok(RawDocument(entries))
    }
}

/// Collection body that keeps repeated keys.
struct OrderedEntries(CollectionEntries);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedEntriesVisitor)
    }
}

struct OrderedEntriesVisitor;

impl<'de> Visitor<'de> for OrderedEntriesVisitor {
    type Value = OrderedEntries;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("an object mapping ids to records")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<OrderedEntries, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or_default());
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.push((key, value));
        }
        Ok(OrderedEntries(entries))
    }
}

fn collection_kind(key: &str) -> Option<EntityKind> {
    EntityKind::ALL
        .into_iter()
        .find(|kind| kind.collection_key() == key)
}
