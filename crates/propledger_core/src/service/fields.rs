//! Instruction field parsing.
//!
//! # Responsibility
//! - Map producer field names (camelCase, snake_case, common aliases) onto
//!   each kind's record fields.
//! - Coerce scalar values and build a record-shaped merge patch.
//! - Split out relationship and collection fields for the interpreter to
//!   resolve.
//!
//! # Invariants
//! - Unknown field names are a validation error; `null` values are skipped.
//! - `link` carries relationship fields only, `append-collection-item`
//!   collection fields only.
//! - Error messages name fields, never their values.

use crate::error::InstructionError;
use crate::model::coerce;
use crate::model::entity::{EntityKind, Key};
use crate::model::instruction::Operation;
use crate::model::record::Expense;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Relationship a record can hold to another record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Property → Owner.
    Owner,
    /// Unit or Lease → Property.
    Property,
    /// Lease → Unit.
    Unit,
    /// Lease → Tenant.
    Tenant,
    /// Unit → Tenant (current occupant).
    CurrentTenant,
    /// Tenant → Lease.
    Lease,
    /// Document or Photo → any owning entity.
    AttachedTo,
}

impl Relation {
    /// Record field the relation is stored in.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Owner => "ownerId",
            Self::Property => "propertyId",
            Self::Unit => "unitId",
            Self::Tenant => "tenantId",
            Self::CurrentTenant => "currentTenantId",
            Self::Lease => "leaseId",
            Self::AttachedTo => "attachedTo",
        }
    }

    fn target_kind(self) -> Option<EntityKind> {
        match self {
            Self::Owner => Some(EntityKind::Owner),
            Self::Property => Some(EntityKind::Property),
            Self::Unit => Some(EntityKind::Unit),
            Self::Tenant | Self::CurrentTenant => Some(EntityKind::Tenant),
            Self::Lease => Some(EntityKind::Lease),
            Self::AttachedTo => None,
        }
    }
}

/// Unresolved relationship reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRef {
    pub relation: Relation,
    /// Kind the key must resolve in.
    pub kind: EntityKind,
    pub key: Key,
}

/// Collection an `append-collection-item` instruction can grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionName {
    Documents,
    Photos,
    Units,
    Properties,
    Expenses,
}

impl CollectionName {
    /// Kind of the referenced children; `None` for inline expenses.
    pub fn child_kind(self) -> Option<EntityKind> {
        match self {
            Self::Documents => Some(EntityKind::Document),
            Self::Photos => Some(EntityKind::Photo),
            Self::Units => Some(EntityKind::Unit),
            Self::Properties => Some(EntityKind::Property),
            Self::Expenses => None,
        }
    }
}

/// One item to append.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionItem {
    /// Existing child, by id or natural key.
    Reference(Key),
    /// Document/photo record to upsert and attach; `key` is `None` when the
    /// record carries neither id nor natural key.
    Record {
        key: Option<Key>,
        patch: Map<String, Value>,
    },
    /// Inline expense line.
    Expense(Expense),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionField {
    pub collection: CollectionName,
    pub items: Vec<CollectionItem>,
}

/// Parsed instruction fields for one target kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFields {
    /// Record-shaped patch for `store::merge`.
    pub patch: Map<String, Value>,
    pub relations: Vec<RelationRef>,
    pub collections: Vec<CollectionField>,
}

impl ParsedFields {
    pub fn relation(&self, relation: Relation) -> Option<&RelationRef> {
        self.relations.iter().find(|item| item.relation == relation)
    }

    pub fn is_empty(&self) -> bool {
        self.patch.is_empty() && self.relations.is_empty() && self.collections.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldSpec {
    Text(&'static str),
    Date(&'static str),
    Amount(&'static str),
    DueDay(&'static str),
    Ownership(&'static str),
    Address(&'static str),
    Contact,
    ContactEmail,
    ContactPhone,
    ContactAddress,
    Relation { relation: Relation, by_id: bool },
    AttachedTo,
    Collection { collection: CollectionName, by_id: bool },
}

impl FieldSpec {
    fn is_relation(self) -> bool {
        matches!(self, Self::Relation { .. } | Self::AttachedTo)
    }

    fn is_collection(self) -> bool {
        matches!(self, Self::Collection { .. })
    }
}

/// Lowercase with separators removed: `current_tenant_id` → `currenttenantid`.
fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn relation(relation: Relation, by_id: bool) -> Option<FieldSpec> {
    Some(FieldSpec::Relation { relation, by_id })
}

fn collection(collection: CollectionName, by_id: bool) -> Option<FieldSpec> {
    Some(FieldSpec::Collection { collection, by_id })
}

fn shared_spec(kind: EntityKind, name: &str) -> Option<FieldSpec> {
    let owns_documents = !matches!(kind, EntityKind::Document | EntityKind::Photo);
    let owns_photos = matches!(kind, EntityKind::Property | EntityKind::Unit);
    match name {
        "documents" if owns_documents => collection(CollectionName::Documents, false),
        "documentids" if owns_documents => collection(CollectionName::Documents, true),
        "photos" if owns_photos => collection(CollectionName::Photos, false),
        "photoids" if owns_photos => collection(CollectionName::Photos, true),
        _ => None,
    }
}

fn field_spec(kind: EntityKind, name: &str) -> Option<FieldSpec> {
    let spec = match kind {
        EntityKind::Owner => match name {
            "name" | "ownername" | "entityname" => Some(FieldSpec::Text("name")),
            "ownershiptype" | "type" | "entitytype" => Some(FieldSpec::Ownership("ownershipType")),
            "contactinfo" | "contact" => Some(FieldSpec::Contact),
            "email" => Some(FieldSpec::ContactEmail),
            "phone" | "phonenumber" => Some(FieldSpec::ContactPhone),
            "address" | "mailingaddress" => Some(FieldSpec::ContactAddress),
            "taxid" | "ein" | "taxidentifier" => Some(FieldSpec::Text("taxId")),
            "properties" => collection(CollectionName::Properties, false),
            "propertyids" => collection(CollectionName::Properties, true),
            _ => None,
        },
        EntityKind::Property => match name {
            "name" | "propertyname" => Some(FieldSpec::Text("name")),
            "address" => Some(FieldSpec::Address("address")),
            "owner" => relation(Relation::Owner, false),
            "ownerid" => relation(Relation::Owner, true),
            "units" => collection(CollectionName::Units, false),
            "unitids" => collection(CollectionName::Units, true),
            "expenses" => collection(CollectionName::Expenses, false),
            _ => None,
        },
        EntityKind::Unit => match name {
            "unitnumber" | "number" | "label" | "name" => Some(FieldSpec::Text("unitNumber")),
            "property" => relation(Relation::Property, false),
            "propertyid" => relation(Relation::Property, true),
            "currenttenant" | "tenant" => relation(Relation::CurrentTenant, false),
            "currenttenantid" | "tenantid" => relation(Relation::CurrentTenant, true),
            _ => None,
        },
        EntityKind::Tenant => match name {
            "name" | "tenantname" | "fullname" => Some(FieldSpec::Text("name")),
            "contactinfo" | "contact" => Some(FieldSpec::Contact),
            "email" => Some(FieldSpec::ContactEmail),
            "phone" | "phonenumber" => Some(FieldSpec::ContactPhone),
            "address" => Some(FieldSpec::ContactAddress),
            "ssn" | "socialsecuritynumber" => Some(FieldSpec::Text("ssn")),
            "lease" => relation(Relation::Lease, false),
            "leaseid" => relation(Relation::Lease, true),
            _ => None,
        },
        EntityKind::Lease => match name {
            "property" => relation(Relation::Property, false),
            "propertyid" => relation(Relation::Property, true),
            "unit" => relation(Relation::Unit, false),
            "unitid" => relation(Relation::Unit, true),
            "tenant" => relation(Relation::Tenant, false),
            "tenantid" => relation(Relation::Tenant, true),
            "startdate" | "start" => Some(FieldSpec::Date("startDate")),
            "enddate" | "end" => Some(FieldSpec::Date("endDate")),
            "rentamount" | "rent" | "monthlyrent" => Some(FieldSpec::Amount("rentAmount")),
            "securitydeposit" | "deposit" => Some(FieldSpec::Amount("securityDeposit")),
            "rentdueday" | "dueday" | "duedate" | "rentduedate" => Some(FieldSpec::DueDay("rentDueDay")),
            _ => None,
        },
        EntityKind::Document => match name {
            "name" | "title" | "filename" => Some(FieldSpec::Text("name")),
            "type" | "doctype" | "documenttype" => Some(FieldSpec::Text("type")),
            "url" | "path" | "link" => Some(FieldSpec::Text("url")),
            "uploaddate" => Some(FieldSpec::Date("uploadDate")),
            "description" => Some(FieldSpec::Text("description")),
            "attachedto" => Some(FieldSpec::AttachedTo),
            _ => None,
        },
        EntityKind::Photo => match name {
            "url" | "path" | "link" => Some(FieldSpec::Text("url")),
            "datetaken" | "date" => Some(FieldSpec::Date("dateTaken")),
            "description" | "caption" => Some(FieldSpec::Text("description")),
            "attachedto" => Some(FieldSpec::AttachedTo),
            _ => None,
        },
    };
    spec.or_else(|| shared_spec(kind, name))
}

/// Parses `fields` for an instruction targeting `kind`.
///
/// # Errors
/// `Validation` for unknown fields, values that cannot be coerced, fields
/// not allowed by the operation, or a relationship given twice.
pub fn parse_fields(
    kind: EntityKind,
    operation: Operation,
    fields: &Map<String, Value>,
) -> Result<ParsedFields, InstructionError> {
    let mut parsed = ParsedFields::default();
    for (name, value) in fields {
        let spec = field_spec(kind, &canonical(name)).ok_or_else(|| {
            InstructionError::validation(format!("unknown field `{name}` for {kind}"))
        })?;
        match operation {
            Operation::Link if !spec.is_relation() => {
                return Err(InstructionError::validation(format!(
                    "link instructions carry relationship fields only; got `{name}`"
                )));
            }
            Operation::AppendCollectionItem if !spec.is_collection() => {
                return Err(InstructionError::validation(format!(
                    "append-collection-item instructions carry collection fields only; got `{name}`"
                )));
            }
            _ => {}
        }
        if value.is_null() {
            continue;
        }
        apply_spec(&mut parsed, kind, spec, name, value)?;
    }
    match operation {
        Operation::Link if parsed.relations.is_empty() => Err(InstructionError::validation(
            "link instruction carries no relationship field",
        )),
        Operation::AppendCollectionItem if parsed.collections.is_empty() => {
            Err(InstructionError::validation(
                "append-collection-item instruction carries no collection field",
            ))
        }
        _ => Ok(parsed),
    }
}

fn apply_spec(
    parsed: &mut ParsedFields,
    kind: EntityKind,
    spec: FieldSpec,
    name: &str,
    value: &Value,
) -> Result<(), InstructionError> {
    match spec {
        FieldSpec::Text(target) => {
            put(&mut parsed.patch, target, coerce::text(name, value)?.map(Value::String));
        }
        FieldSpec::Date(target) => {
            let date = coerce::date(name, value)?;
            put(
                &mut parsed.patch,
                target,
                date.map(|date| Value::String(date.format("%Y-%m-%d").to_string())),
            );
        }
        FieldSpec::Amount(target) => {
            let amount = coerce::amount(name, value)?;
            put(&mut parsed.patch, target, amount.map(to_json).transpose()?);
        }
        FieldSpec::DueDay(target) => {
            put(&mut parsed.patch, target, coerce::due_day(name, value)?.map(Value::from));
        }
        FieldSpec::Ownership(target) => {
            let ownership = coerce::ownership_type(name, value)?;
            put(&mut parsed.patch, target, ownership.map(to_json).transpose()?);
        }
        FieldSpec::Address(target) => {
            put(&mut parsed.patch, target, parse_address(name, value)?);
        }
        FieldSpec::Contact => {
            let contact = parse_contact(name, value)?;
            put_nested(&mut parsed.patch, "contactInfo", contact);
        }
        FieldSpec::ContactEmail => {
            let email = coerce::email(name, value)?.map(Value::String);
            put_nested(&mut parsed.patch, "contactInfo", single("email", email));
        }
        FieldSpec::ContactPhone => {
            let phone = coerce::phone(name, value)?.map(Value::String);
            put_nested(&mut parsed.patch, "contactInfo", single("phone", phone));
        }
        FieldSpec::ContactAddress => {
            let address = parse_address(name, value)?;
            put_nested(&mut parsed.patch, "contactInfo", single("address", address));
        }
        FieldSpec::Relation { relation, by_id } => {
            let target_kind = relation.target_kind().unwrap_or(kind);
            let key = parse_key(name, value, by_id)?;
            push_relation(parsed, relation, target_kind, key, name)?;
        }
        FieldSpec::AttachedTo => {
            let (target_kind, key) = parse_attachment(name, value)?;
            push_relation(parsed, Relation::AttachedTo, target_kind, key, name)?;
        }
        FieldSpec::Collection { collection, by_id } => {
            let items = parse_collection(collection, by_id, name, value)?;
            if !items.is_empty() {
                parsed.collections.push(CollectionField { collection, items });
            }
        }
    }
    Ok(())
}

fn put(patch: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        patch.insert(key.to_string(), value);
    }
}

fn put_nested(patch: &mut Map<String, Value>, outer: &str, entries: Map<String, Value>) {
    if entries.is_empty() {
        return;
    }
    match patch.get_mut(outer) {
        Some(Value::Object(existing)) => existing.extend(entries),
        _ => {
            patch.insert(outer.to_string(), Value::Object(entries));
        }
    }
}

fn single(key: &str, value: Option<Value>) -> Map<String, Value> {
    let mut entries = Map::new();
    put(&mut entries, key, value);
    entries
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, InstructionError> {
    serde_json::to_value(value)
        .map_err(|_| InstructionError::validation("value could not be encoded"))
}

fn push_relation(
    parsed: &mut ParsedFields,
    relation: Relation,
    kind: EntityKind,
    key: Key,
    name: &str,
) -> Result<(), InstructionError> {
    if parsed.relation(relation).is_some() {
        return Err(InstructionError::validation(format!(
            "relationship `{}` given more than once (last as `{name}`)",
            relation.field_name()
        )));
    }
    parsed.relations.push(RelationRef {
        relation,
        kind,
        key,
    });
    Ok(())
}

/// String values follow the field suffix (`...Id` = identifier); objects
/// must be `{"id"}` or `{"name"}`.
fn parse_key(name: &str, value: &Value, by_id: bool) -> Result<Key, InstructionError> {
    let key = match value {
        Value::String(text) if by_id => Key::id(text.trim()),
        Value::String(text) => Key::natural(text.trim()),
        Value::Object(_) => serde_json::from_value::<Key>(value.clone()).map_err(|_| {
            InstructionError::validation(format!(
                "field `{name}` must be a string or an {{\"id\"}} / {{\"name\"}} object"
            ))
        })?,
        _ => {
            return Err(InstructionError::validation(format!(
                "field `{name}` must reference an entity"
            )))
        }
    };
    if key.is_blank() {
        return Err(InstructionError::validation(format!(
            "field `{name}` references a blank key"
        )));
    }
    Ok(key)
}

/// `{"type": "unit", "id": ".."}`, `{"type": "unit", "name": ".."}` or
/// `{"type": "unit", "key": <key>}`.
fn parse_attachment(name: &str, value: &Value) -> Result<(EntityKind, Key), InstructionError> {
    let invalid = || {
        InstructionError::validation(format!(
            "field `{name}` must be an object with `type` and one of `id`, `name`, `key`"
        ))
    };
    let object = value.as_object().ok_or_else(invalid)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(invalid)?
        .parse::<EntityKind>()
        .map_err(|err| InstructionError::validation(format!("field `{name}`: {err}")))?;
    let mut key = None;
    for (field, entry) in object {
        let parsed = match field.as_str() {
            "type" => continue,
            "id" => parse_key(name, entry, true)?,
            "name" => parse_key(name, entry, false)?,
            "key" => parse_key(name, entry, false)?,
            _ => return Err(invalid()),
        };
        if key.replace(parsed).is_some() {
            return Err(invalid());
        }
    }
    key.map(|key| (kind, key)).ok_or_else(invalid)
}

fn parse_contact(name: &str, value: &Value) -> Result<Map<String, Value>, InstructionError> {
    let object = value.as_object().ok_or_else(|| {
        InstructionError::validation(format!("field `{name}` must be an object"))
    })?;
    let mut contact = Map::new();
    for (field, entry) in object {
        if entry.is_null() {
            continue;
        }
        let path = format!("{name}.{field}");
        match canonical(field).as_str() {
            "email" => put(&mut contact, "email", coerce::email(&path, entry)?.map(Value::String)),
            "phone" | "phonenumber" => {
                put(&mut contact, "phone", coerce::phone(&path, entry)?.map(Value::String))
            }
            "address" => put(&mut contact, "address", parse_address(&path, entry)?),
            _ => {
                return Err(InstructionError::validation(format!(
                    "unknown field `{path}`"
                )))
            }
        }
    }
    Ok(contact)
}

static ADDRESS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?P<street>[^,]+),\s*(?P<city>[^,]+),\s*(?P<state>[A-Za-z]{2})\.?\s+(?P<zip>\d{5}(?:-\d{4})?)\s*$",
    )
    .expect("valid regex")
});

/// Object form, or a one-line `street, city, ST 12345` string. Other
/// strings are kept as the street line.
fn parse_address(name: &str, value: &Value) -> Result<Option<Value>, InstructionError> {
    let mut address = Map::new();
    match value {
        Value::String(line) => {
            let line = line.trim();
            if line.is_empty() {
                return Ok(None);
            }
            match ADDRESS_LINE.captures(line) {
                Some(caps) => {
                    address.insert("street".into(), Value::String(caps["street"].trim().into()));
                    address.insert("city".into(), Value::String(caps["city"].trim().into()));
                    address.insert(
                        "state".into(),
                        Value::String(caps["state"].to_ascii_uppercase()),
                    );
                    address.insert("zip".into(), Value::String(caps["zip"].into()));
                }
                None => {
                    address.insert("street".into(), Value::String(line.to_string()));
                }
            }
        }
        Value::Object(object) => {
            for (field, entry) in object {
                if entry.is_null() {
                    continue;
                }
                let path = format!("{name}.{field}");
                let target = match canonical(field).as_str() {
                    "street" | "streetaddress" | "line1" | "address1" => "street",
                    "city" => "city",
                    "state" => "state",
                    "zip" | "zipcode" | "postalcode" => "zip",
                    _ => {
                        return Err(InstructionError::validation(format!(
                            "unknown field `{path}`"
                        )))
                    }
                };
                let mut text = coerce::text(&path, entry)?;
                if target == "state" {
                    text = text.map(|state| {
                        if state.len() == 2 {
                            state.to_ascii_uppercase()
                        } else {
                            state
                        }
                    });
                }
                put(&mut address, target, text.map(Value::String));
            }
        }
        _ => {
            return Err(InstructionError::validation(format!(
                "field `{name}` must be an address object or string"
            )))
        }
    }
    Ok((!address.is_empty()).then_some(Value::Object(address)))
}

fn parse_collection(
    collection: CollectionName,
    by_id: bool,
    name: &str,
    value: &Value,
) -> Result<Vec<CollectionItem>, InstructionError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().filter(|item| !item.is_null()).collect(),
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| parse_collection_item(collection, by_id, name, item))
        .collect()
}

fn parse_collection_item(
    collection: CollectionName,
    by_id: bool,
    name: &str,
    item: &Value,
) -> Result<CollectionItem, InstructionError> {
    match (collection.child_kind(), item) {
        (None, _) => parse_expense(name, item).map(CollectionItem::Expense),
        (Some(child), Value::Object(object))
            if matches!(child, EntityKind::Document | EntityKind::Photo)
                && !is_bare_key(object) =>
        {
            parse_attached_record(child, name, object)
        }
        (Some(_), _) => parse_key(name, item, by_id).map(CollectionItem::Reference),
    }
}

fn is_bare_key(object: &Map<String, Value>) -> bool {
    object.len() == 1 && object.contains_key("id")
}

fn parse_attached_record(
    child: EntityKind,
    name: &str,
    object: &Map<String, Value>,
) -> Result<CollectionItem, InstructionError> {
    let mut fields = object.clone();
    let id = fields.remove("id");
    let parsed = parse_fields(child, Operation::CreateOrUpdate, &fields)?;
    if !parsed.relations.is_empty() || !parsed.collections.is_empty() {
        return Err(InstructionError::validation(format!(
            "items of `{name}` may only carry {child} attributes"
        )));
    }
    let key = match id {
        Some(Value::Null) | None => {
            let natural_field = if child == EntityKind::Photo { "url" } else { "name" };
            parsed
                .patch
                .get(natural_field)
                .and_then(Value::as_str)
                .map(Key::natural)
        }
        Some(id) => Some(parse_key(name, &id, true)?),
    };
    Ok(CollectionItem::Record {
        key,
        patch: parsed.patch,
    })
}

fn parse_expense(name: &str, item: &Value) -> Result<Expense, InstructionError> {
    let object = item.as_object().ok_or_else(|| {
        InstructionError::validation(format!("items of `{name}` must be expense objects"))
    })?;
    let mut expense = Expense::default();
    for (field, entry) in object {
        if entry.is_null() {
            continue;
        }
        let path = format!("{name}.{field}");
        match canonical(field).as_str() {
            "id" => expense.id = coerce::text(&path, entry)?,
            "description" | "desc" | "item" => expense.description = coerce::text(&path, entry)?,
            "amount" | "cost" => expense.amount = coerce::amount(&path, entry)?,
            "date" => expense.date = coerce::date(&path, entry)?,
            "category" | "type" => expense.category = coerce::text(&path, entry)?,
            _ => {
                return Err(InstructionError::validation(format!(
                    "unknown field `{path}`"
                )))
            }
        }
    }
    if expense == Expense::default() {
        return Err(InstructionError::validation(format!(
            "items of `{name}` must not be empty"
        )));
    }
    Ok(expense)
}
