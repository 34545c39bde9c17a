//! Entity identity primitives.
//!
//! # Responsibility
//! - Name the entity collections of the registry (`EntityKind`).
//! - Model instruction keys as an explicit tagged type (`Key`).
//! - Normalize natural keys for case/whitespace-insensitive lookup.
//!
//! # Invariants
//! - Entity identifiers are opaque, non-empty strings and never reassigned.
//! - Natural-key comparison always goes through `normalize_natural_key`.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of one entity record.
///
/// Kept as a type alias, mirroring the snapshot wire format where ids are
/// plain strings.
pub type EntityId = String;

/// Collections held by the registry.
///
/// Serialized as the singular snake_case name; deserialization goes through
/// `FromStr` so producer spellings such as `Tenants` are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Legal owner (individual or organization).
    Owner,
    /// Real estate property.
    Property,
    /// Rentable unit inside a property.
    Unit,
    /// Person renting a unit.
    Tenant,
    /// Rental agreement.
    Lease,
    /// Document metadata.
    Document,
    /// Photo metadata.
    Photo,
}

impl EntityKind {
    /// All kinds in dependency order (parents before children).
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Owner,
        EntityKind::Property,
        EntityKind::Unit,
        EntityKind::Tenant,
        EntityKind::Lease,
        EntityKind::Document,
        EntityKind::Photo,
    ];

    /// Singular lowercase name used in logs and messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Property => "property",
            Self::Unit => "unit",
            Self::Tenant => "tenant",
            Self::Lease => "lease",
            Self::Document => "document",
            Self::Photo => "photo",
        }
    }

    /// Top-level snapshot collection key.
    pub fn collection_key(self) -> &'static str {
        match self {
            Self::Owner => "owners",
            Self::Property => "properties",
            Self::Unit => "units",
            Self::Tenant => "tenants",
            Self::Lease => "leases",
            Self::Document => "documents",
            Self::Photo => "photos",
        }
    }

    /// Prefix for generated identifiers.
    fn id_prefix(self) -> &'static str {
        match self {
            Self::Owner => "own",
            Self::Property => "prop",
            Self::Unit => "unit",
            Self::Tenant => "ten",
            Self::Lease => "lease",
            Self::Document => "doc",
            Self::Photo => "photo",
        }
    }

    /// Mints a fresh identifier for this kind, e.g. `ten-<uuid v4>`.
    pub fn generate_id(self) -> EntityId {
        format!("{}-{}", self.id_prefix(), Uuid::new_v4())
    }

    /// Whether records of this kind carry a natural-key attribute.
    pub fn has_natural_key(self) -> bool {
        !matches!(self, Self::Lease)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a kind name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type `{0}`")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    /// Accepts singular/plural forms in any case; `entity` is an alias of
    /// `owner` to match upstream producer vocabulary.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        let kind = match normalized.as_str() {
            "owner" | "owners" | "entity" | "entities" => Self::Owner,
            "property" | "properties" => Self::Property,
            "unit" | "units" => Self::Unit,
            "tenant" | "tenants" | "currenttenant" => Self::Tenant,
            "lease" | "leases" => Self::Lease,
            "document" | "documents" | "doc" => Self::Document,
            "photo" | "photos" => Self::Photo,
            _ => return Err(UnknownEntityKind(value.to_string())),
        };
        Ok(kind)
    }
}

impl<'de> Deserialize<'de> for EntityKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Typed pointer to one entity in the store.
///
/// Identity is `(kind, id)`. When read from a snapshot the ref also keeps
/// the `type` spelling it was written with and any extra fields, so an
/// `attachedTo` object serializes back unchanged.
#[derive(Debug, Clone)]
pub struct EntityRef {
    /// Collection the entity lives in.
    pub kind: EntityKind,
    /// Identifier within that collection.
    pub id: EntityId,
    spelling: Option<String>,
    extra: Map<String, Value>,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
            spelling: None,
            extra: Map::new(),
        }
    }

    /// Fields other than `type` and `id` carried by the wire form.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for EntityRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityRef {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.kind, &self.id).cmp(&(other.kind, &other.id))
    }
}

#[derive(Serialize)]
struct EntityRefOut<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    id: &'a str,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct EntityRefIn {
    #[serde(rename = "type")]
    kind: String,
    id: EntityId,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EntityRefOut {
            kind: self.spelling.as_deref().unwrap_or(self.kind.as_str()),
            id: &self.id,
            extra: &self.extra,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = EntityRefIn::deserialize(deserializer)?;
        let kind: EntityKind = raw.kind.parse().map_err(de::Error::custom)?;
        Ok(Self {
            kind,
            id: raw.id,
            spelling: (raw.kind != kind.as_str()).then_some(raw.kind),
            extra: raw.extra,
        })
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Result of an upsert: which entity was touched and whether it is new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub entity: EntityRef,
    pub created: bool,
}

/// How an instruction names an entity.
///
/// Wire form: a bare string is a natural key, `{"id": ".."}` is an
/// identifier and `{"name": ".."}` is a natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Exact entity identifier.
    Identifier(EntityId),
    /// Human-readable attribute such as a tenant or property name.
    NaturalKey(String),
}

impl Key {
    pub fn id(value: impl Into<String>) -> Self {
        Self::Identifier(value.into())
    }

    pub fn natural(value: impl Into<String>) -> Self {
        Self::NaturalKey(value.into())
    }

    /// Raw text carried by the key.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Identifier(value) | Self::NaturalKey(value) => value,
        }
    }

    /// Returns `true` when the carried text is blank.
    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier(id) => write!(f, "id `{id}`"),
            Self::NaturalKey(name) => write!(f, "`{name}`"),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            Self::NaturalKey(name) => serializer.serialize_str(name),
            Self::Identifier(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("id", id)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(KeyVisitor)
    }
}

struct KeyVisitor;

impl<'de> Visitor<'de> for KeyVisitor {
    type Value = Key;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("a natural-key string, {\"id\": ..} or {\"name\": ..}")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Key, E> {
        Ok(Key::NaturalKey(value.to_string()))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Key, A::Error> {
        let mut key = None;
        while let Some(field) = map.next_key::<String>()? {
            let value: String = map.next_value()?;
            let parsed = match field.as_str() {
                "id" => Key::Identifier(value),
                "name" | "natural" | "naturalKey" => Key::NaturalKey(value),
                other => {
                    return Err(de::Error::unknown_field(other, &["id", "name"]));
                }
            };
            if key.replace(parsed).is_some() {
                return Err(de::Error::custom("key must carry exactly one of `id` or `name`"));
            }
        }
        key.ok_or_else(|| de::Error::custom("key object is empty"))
    }
}

/// Collapses inner whitespace and lowercases for natural-key lookup.
///
/// `"  John   SMITH "` and `"john smith"` normalize to the same value.
pub fn normalize_natural_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
