//! Property-management record shapes.
//!
//! # Responsibility
//! - Define the persisted shape of every registry entity.
//! - Provide kind-agnostic access (`AnyRecord`) for store and interpreter code.
//!
//! # Invariants
//! - `id` is the only required field; everything else is partial knowledge.
//! - Unrecognized fields survive load/serialize through `extra`.
//! - Id collections distinguish "absent" (`None`) from "empty" (`Some(vec![])`)
//!   and never hold duplicates.

use crate::model::entity::{normalize_natural_key, EntityId, EntityKind, EntityRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// Unrecognized fields preserved for forward compatibility.
pub type ExtraFields = BTreeMap<String, Value>;

/// Monetary amount.
///
/// Keeps the JSON numeric representation it was read with, so `2475.0`
/// is written back as `2475.0` and `2475` as `2475`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Number);

impl Amount {
    /// Builds an amount from a finite float. Returns `None` for NaN/inf.
    pub fn from_f64(value: f64) -> Option<Self> {
        Number::from_f64(value).map(Self)
    }

    pub fn as_f64(&self) -> f64 {
        self.0.as_f64().unwrap_or_default()
    }

    /// Numeric equality independent of JSON representation.
    pub fn same_value(&self, other: &Amount) -> bool {
        (self.as_f64() - other.as_f64()).abs() < 1e-9
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(Number::from(value))
    }
}

/// Owner legal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipType {
    Individual,
    Organization,
}

/// Postal address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Two-letter code for US states, free text elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Contact details shared by owners and tenants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Legal owner of one or more properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership_type: Option<OwnershipType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<ContactInfo>,
    /// EIN for organizations, SSN for individuals. Never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_ids: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<EntityId>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One expense line recorded against a property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Expense {
    /// Identity used for de-duplication: the id when both sides carry one,
    /// otherwise the (description, amount, date) content.
    pub fn same_item(&self, other: &Expense) -> bool {
        if let (Some(left), Some(right)) = (&self.id, &other.id) {
            return left == right;
        }
        let same_description = self.description.as_deref().map(normalize_natural_key)
            == other.description.as_deref().map(normalize_natural_key);
        let same_amount = match (&self.amount, &other.amount) {
            (Some(left), Some(right)) => left.same_value(right),
            (None, None) => true,
            _ => false,
        };
        same_description && same_amount && self.date == other.date
    }
}

/// Real estate property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_ids: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expenses: Option<Vec<Expense>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ids: Option<Vec<EntityId>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Rentable unit inside a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: EntityId,
    /// Label within the parent property, e.g. `1A`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<EntityId>,
    /// At most one active occupant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tenant_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ids: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<EntityId>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Person renting a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<ContactInfo>,
    /// Sensitive; never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<EntityId>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Rental agreement between a tenant and a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent_amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_deposit: Option<Amount>,
    /// Day of month rent is due, 1..=31.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent_due_day: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<EntityId>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: EntityId,
    /// e.g. `lease`, `insurance`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<EntityRef>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Photo metadata. Attaches to properties or units only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<EntityRef>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

macro_rules! blank_record {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $ty {
            /// Creates a record carrying only its identifier.
            pub fn new(id: impl Into<EntityId>) -> Self {
                Self {
                    id: id.into(),
                    $($field: None,)*
                    extra: ExtraFields::new(),
                }
            }
        }
    };
}

blank_record!(Owner { name, ownership_type, contact_info, tax_id, property_ids, document_ids });
blank_record!(Property { name, address, owner_id, unit_ids, expenses, document_ids, photo_ids });
blank_record!(Unit { unit_number, property_id, current_tenant_id, photo_ids, document_ids });
blank_record!(Tenant { name, contact_info, ssn, lease_id, document_ids });
blank_record!(Lease {
    property_id,
    unit_id,
    tenant_id,
    start_date,
    end_date,
    rent_amount,
    security_deposit,
    rent_due_day,
    document_ids,
});
blank_record!(Document { doc_type, url, name, upload_date, description, attached_to });
blank_record!(Photo { url, date_taken, description, attached_to });

/// Kind-tagged record used wherever code must handle any collection.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyRecord {
    Owner(Owner),
    Property(Property),
    Unit(Unit),
    Tenant(Tenant),
    Lease(Lease),
    Document(Document),
    Photo(Photo),
}

impl AnyRecord {
    /// Creates an id-only record of the requested kind.
    pub fn blank(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        let id = id.into();
        match kind {
            EntityKind::Owner => Self::Owner(Owner::new(id)),
            EntityKind::Property => Self::Property(Property::new(id)),
            EntityKind::Unit => Self::Unit(Unit::new(id)),
            EntityKind::Tenant => Self::Tenant(Tenant::new(id)),
            EntityKind::Lease => Self::Lease(Lease::new(id)),
            EntityKind::Document => Self::Document(Document::new(id)),
            EntityKind::Photo => Self::Photo(Photo::new(id)),
        }
    }

    /// Decodes one snapshot record of the given kind.
    pub fn from_value(kind: EntityKind, value: Value) -> Result<Self, serde_json::Error> {
        let record = match kind {
            EntityKind::Owner => Self::Owner(serde_json::from_value(value)?),
            EntityKind::Property => Self::Property(serde_json::from_value(value)?),
            EntityKind::Unit => Self::Unit(serde_json::from_value(value)?),
            EntityKind::Tenant => Self::Tenant(serde_json::from_value(value)?),
            EntityKind::Lease => Self::Lease(serde_json::from_value(value)?),
            EntityKind::Document => Self::Document(serde_json::from_value(value)?),
            EntityKind::Photo => Self::Photo(serde_json::from_value(value)?),
        };
        Ok(record)
    }

    /// Encodes the record in its snapshot shape.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Owner(record) => serde_json::to_value(record),
            Self::Property(record) => serde_json::to_value(record),
            Self::Unit(record) => serde_json::to_value(record),
            Self::Tenant(record) => serde_json::to_value(record),
            Self::Lease(record) => serde_json::to_value(record),
            Self::Document(record) => serde_json::to_value(record),
            Self::Photo(record) => serde_json::to_value(record),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Owner(_) => EntityKind::Owner,
            Self::Property(_) => EntityKind::Property,
            Self::Unit(_) => EntityKind::Unit,
            Self::Tenant(_) => EntityKind::Tenant,
            Self::Lease(_) => EntityKind::Lease,
            Self::Document(_) => EntityKind::Document,
            Self::Photo(_) => EntityKind::Photo,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Owner(record) => &record.id,
            Self::Property(record) => &record.id,
            Self::Unit(record) => &record.id,
            Self::Tenant(record) => &record.id,
            Self::Lease(record) => &record.id,
            Self::Document(record) => &record.id,
            Self::Photo(record) => &record.id,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id())
    }

    /// Raw natural-key attribute, if the kind has one and it is set.
    pub fn natural_key(&self) -> Option<&str> {
        match self {
            Self::Owner(record) => record.name.as_deref(),
            Self::Property(record) => record.name.as_deref(),
            Self::Unit(record) => record.unit_number.as_deref(),
            Self::Tenant(record) => record.name.as_deref(),
            Self::Lease(_) => None,
            Self::Document(record) => record.name.as_deref(),
            Self::Photo(record) => record.url.as_deref(),
        }
    }

    /// Writes the natural-key attribute. No-op for leases.
    pub fn set_natural_key(&mut self, value: &str) {
        let value = Some(value.trim().to_string());
        match self {
            Self::Owner(record) => record.name = value,
            Self::Property(record) => record.name = value,
            Self::Unit(record) => record.unit_number = value,
            Self::Tenant(record) => record.name = value,
            Self::Lease(_) => {}
            Self::Document(record) => record.name = value,
            Self::Photo(record) => record.url = value,
        }
    }

    pub fn document_ids(&self) -> &[EntityId] {
        let list = match self {
            Self::Owner(record) => &record.document_ids,
            Self::Property(record) => &record.document_ids,
            Self::Unit(record) => &record.document_ids,
            Self::Tenant(record) => &record.document_ids,
            Self::Lease(record) => &record.document_ids,
            Self::Document(_) | Self::Photo(_) => return &[],
        };
        list.as_deref().unwrap_or_default()
    }

    pub fn photo_ids(&self) -> &[EntityId] {
        let list = match self {
            Self::Property(record) => &record.photo_ids,
            Self::Unit(record) => &record.photo_ids,
            _ => return &[],
        };
        list.as_deref().unwrap_or_default()
    }

    /// Attachment target of a document or photo.
    pub fn attached_to(&self) -> Option<&EntityRef> {
        match self {
            Self::Document(record) => record.attached_to.as_ref(),
            Self::Photo(record) => record.attached_to.as_ref(),
            _ => None,
        }
    }

    pub fn attached_to_mut(&mut self) -> Option<&mut Option<EntityRef>> {
        match self {
            Self::Document(record) => Some(&mut record.attached_to),
            Self::Photo(record) => Some(&mut record.attached_to),
            _ => None,
        }
    }

    /// Document id collection, for kinds that own documents.
    pub fn document_ids_mut(&mut self) -> Option<&mut Option<Vec<EntityId>>> {
        match self {
            Self::Owner(record) => Some(&mut record.document_ids),
            Self::Property(record) => Some(&mut record.document_ids),
            Self::Unit(record) => Some(&mut record.document_ids),
            Self::Tenant(record) => Some(&mut record.document_ids),
            Self::Lease(record) => Some(&mut record.document_ids),
            Self::Document(_) | Self::Photo(_) => None,
        }
    }

    /// Photo id collection, for kinds that own photos.
    pub fn photo_ids_mut(&mut self) -> Option<&mut Option<Vec<EntityId>>> {
        match self {
            Self::Property(record) => Some(&mut record.photo_ids),
            Self::Unit(record) => Some(&mut record.photo_ids),
            _ => None,
        }
    }
}

macro_rules! variant_access {
    ($($variant:ident => $as_ref:ident, $as_mut:ident;)*) => {
        impl AnyRecord {
            $(
                pub fn $as_ref(&self) -> Option<&$variant> {
                    match self {
                        Self::$variant(record) => Some(record),
                        _ => None,
                    }
                }

                pub fn $as_mut(&mut self) -> Option<&mut $variant> {
                    match self {
                        Self::$variant(record) => Some(record),
                        _ => None,
                    }
                }
            )*
        }
    };
}

variant_access! {
    Owner => as_owner, as_owner_mut;
    Property => as_property, as_property_mut;
    Unit => as_unit, as_unit_mut;
    Tenant => as_tenant, as_tenant_mut;
    Lease => as_lease, as_lease_mut;
    Document => as_document, as_document_mut;
    Photo => as_photo, as_photo_mut;
}

/// Appends `id` unless already present. Returns whether the list changed.
pub fn append_unique(list: &mut Option<Vec<EntityId>>, id: &str) -> bool {
    let items = list.get_or_insert_with(Vec::new);
    if items.iter().any(|existing| existing == id) {
        return false;
    }
    items.push(id.to_string());
    true
}

/// Removes `id` if present, keeping an empty list rather than `None`.
pub fn remove_id(list: &mut Option<Vec<EntityId>>, id: &str) -> bool {
    match list {
        Some(items) => {
            let before = items.len();
            items.retain(|existing| existing != id);
            items.len() != before
        }
        None => false,
    }
}
