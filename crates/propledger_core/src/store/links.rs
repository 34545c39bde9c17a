//! Relationship writes with back-reference maintenance.
//!
//! # Responsibility
//! - Write one relationship field on a staged child record and keep the
//!   parent's id collection in step.
//!
//! # Invariants
//! - The child field is authoritative; parent collections follow it.
//! - Moving a child removes it from its previous parent's collection.
//! - Every function either stages all of its writes or returns an error
//!   before staging any of them.

use crate::error::InstructionError;
use crate::model::entity::{EntityId, EntityKind, EntityRef};
use crate::model::record::{append_unique, remove_id, AnyRecord, Lease, Property, Tenant, Unit};
use crate::store::graph::{GraphStore, Staging};

fn missing(target: &EntityRef) -> InstructionError {
    InstructionError::resolution(format!("no {} with id `{}`", target.kind, target.id))
}

fn expect_kind(target: &EntityRef, expected: EntityKind) -> Result<(), InstructionError> {
    if target.kind == expected {
        Ok(())
    } else {
        Err(InstructionError::integrity(format!(
            "`{}` is a {}, expected a {expected}",
            target.id, target.kind
        )))
    }
}

fn require(
    store: &GraphStore,
    staging: &Staging,
    target: &EntityRef,
) -> Result<(), InstructionError> {
    if staging.exists(store, target) {
        Ok(())
    } else {
        Err(missing(target))
    }
}

macro_rules! staged_as {
    ($name:ident, $as_mut:ident, $ty:ty, $kind:ident) => {
        fn $name<'a>(
            store: &GraphStore,
            staging: &'a mut Staging,
            target: &EntityRef,
        ) -> Result<&'a mut $ty, InstructionError> {
            expect_kind(target, EntityKind::$kind)?;
            staging
                .get_mut(store, target)
                .and_then(AnyRecord::$as_mut)
                .ok_or_else(|| missing(target))
        }
    };
}

staged_as!(staged_property, as_property_mut, Property, Property);
staged_as!(staged_unit, as_unit_mut, Unit, Unit);
staged_as!(staged_tenant, as_tenant_mut, Tenant, Tenant);
staged_as!(staged_lease, as_lease_mut, Lease, Lease);

/// `unit.propertyId = property`; the property's `unitIds` follows.
pub fn set_unit_property(
    store: &GraphStore,
    staging: &mut Staging,
    unit: &EntityRef,
    property: &EntityRef,
) -> Result<(), InstructionError> {
    expect_kind(property, EntityKind::Property)?;
    require(store, staging, property)?;
    let previous = staged_unit(store, staging, unit)?
        .property_id
        .replace(property.id.clone());
    if let Some(previous) = previous.filter(|previous| *previous != property.id) {
        let old_parent = EntityRef::new(EntityKind::Property, previous);
        if let Ok(old_parent) = staged_property(store, staging, &old_parent) {
            remove_id(&mut old_parent.unit_ids, &unit.id);
        }
    }
    append_unique(&mut staged_property(store, staging, property)?.unit_ids, &unit.id);
    Ok(())
}

/// `property.ownerId = owner`; the owner's `propertyIds` follows.
pub fn set_property_owner(
    store: &GraphStore,
    staging: &mut Staging,
    property: &EntityRef,
    owner: &EntityRef,
) -> Result<(), InstructionError> {
    expect_kind(owner, EntityKind::Owner)?;
    require(store, staging, owner)?;
    let previous = staged_property(store, staging, property)?
        .owner_id
        .replace(owner.id.clone());
    if let Some(previous) = previous.filter(|previous| *previous != owner.id) {
        let old_owner = EntityRef::new(EntityKind::Owner, previous);
        if let Some(record) = staging
            .get_mut(store, &old_owner)
            .and_then(AnyRecord::as_owner_mut)
        {
            remove_id(&mut record.property_ids, &property.id);
        }
    }
    let owner_record = staging
        .get_mut(store, owner)
        .and_then(AnyRecord::as_owner_mut)
        .ok_or_else(|| missing(owner))?;
    append_unique(&mut owner_record.property_ids, &property.id);
    Ok(())
}

/// `unit.currentTenantId = tenant`.
pub fn set_unit_tenant(
    store: &GraphStore,
    staging: &mut Staging,
    unit: &EntityRef,
    tenant: &EntityRef,
) -> Result<(), InstructionError> {
    expect_kind(tenant, EntityKind::Tenant)?;
    require(store, staging, tenant)?;
    staged_unit(store, staging, unit)?.current_tenant_id = Some(tenant.id.clone());
    Ok(())
}

/// `lease.tenantId = tenant` and `tenant.leaseId = lease`.
///
/// A previous tenant whose `leaseId` pointed at this lease loses it.
pub fn set_lease_tenant(
    store: &GraphStore,
    staging: &mut Staging,
    lease: &EntityRef,
    tenant: &EntityRef,
) -> Result<(), InstructionError> {
    expect_kind(tenant, EntityKind::Tenant)?;
    require(store, staging, tenant)?;
    let previous = staged_lease(store, staging, lease)?
        .tenant_id
        .replace(tenant.id.clone());
    if let Some(previous) = previous.filter(|previous| *previous != tenant.id) {
        let old_tenant = EntityRef::new(EntityKind::Tenant, previous);
        if let Ok(old_tenant) = staged_tenant(store, staging, &old_tenant) {
            if old_tenant.lease_id.as_deref() == Some(lease.id.as_str()) {
                old_tenant.lease_id = None;
            }
        }
    }
    staged_tenant(store, staging, tenant)?.lease_id = Some(lease.id.clone());
    Ok(())
}

/// `lease.unitId = unit`.
pub fn set_lease_unit(
    store: &GraphStore,
    staging: &mut Staging,
    lease: &EntityRef,
    unit: &EntityRef,
) -> Result<(), InstructionError> {
    expect_kind(unit, EntityKind::Unit)?;
    require(store, staging, unit)?;
    staged_lease(store, staging, lease)?.unit_id = Some(unit.id.clone());
    Ok(())
}

/// `lease.propertyId = property`.
pub fn set_lease_property(
    store: &GraphStore,
    staging: &mut Staging,
    lease: &EntityRef,
    property: &EntityRef,
) -> Result<(), InstructionError> {
    expect_kind(property, EntityKind::Property)?;
    require(store, staging, property)?;
    staged_lease(store, staging, lease)?.property_id = Some(property.id.clone());
    Ok(())
}

/// Checks that a lease's unit sits in the lease's property, and fills the
/// property from the unit when the lease has none.
pub fn check_lease_placement(
    store: &GraphStore,
    staging: &mut Staging,
    lease: &EntityRef,
) -> Result<(), InstructionError> {
    let (unit_id, property_id) = match staging.get(store, lease).and_then(AnyRecord::as_lease) {
        Some(record) => (record.unit_id.clone(), record.property_id.clone()),
        None => return Err(missing(lease)),
    };
    let Some(unit_id) = unit_id else {
        return Ok(());
    };
    let unit_parent = staging
        .get(store, &EntityRef::new(EntityKind::Unit, unit_id.as_str()))
        .and_then(AnyRecord::as_unit)
        .and_then(|unit| unit.property_id.clone());
    match (property_id, unit_parent) {
        (Some(property_id), Some(unit_parent)) if property_id != unit_parent => {
            Err(InstructionError::integrity(format!(
                "lease `{}` names property `{property_id}` but unit `{unit_id}` belongs to `{unit_parent}`",
                lease.id
            )))
        }
        (None, Some(unit_parent)) => {
            staged_lease(store, staging, lease)?.property_id = Some(unit_parent);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Kinds a document or photo may hang under.
pub fn can_attach(item: EntityKind, target: EntityKind) -> bool {
    match item {
        EntityKind::Document => !matches!(target, EntityKind::Document | EntityKind::Photo),
        EntityKind::Photo => matches!(target, EntityKind::Property | EntityKind::Unit),
        _ => false,
    }
}

fn attachment_list(
    record: &mut AnyRecord,
    item: EntityKind,
) -> Option<&mut Option<Vec<EntityId>>> {
    match item {
        EntityKind::Photo => record.photo_ids_mut(),
        _ => record.document_ids_mut(),
    }
}

/// `item.attachedTo = target`; the target's document or photo list follows.
pub fn attach(
    store: &GraphStore,
    staging: &mut Staging,
    item: &EntityRef,
    target: &EntityRef,
) -> Result<(), InstructionError> {
    if !can_attach(item.kind, target.kind) {
        return Err(InstructionError::integrity(format!(
            "a {} cannot be attached to a {}",
            item.kind, target.kind
        )));
    }
    require(store, staging, target)?;
    let previous = staging
        .get_mut(store, item)
        .and_then(AnyRecord::attached_to_mut)
        .ok_or_else(|| missing(item))?
        .replace(target.clone());
    if let Some(previous) = previous.filter(|previous| previous != target) {
        if let Some(list) = staging
            .get_mut(store, &previous)
            .and_then(|record| attachment_list(record, item.kind))
        {
            remove_id(list, &item.id);
        }
    }
    let list = staging
        .get_mut(store, target)
        .and_then(|record| attachment_list(record, item.kind))
        .ok_or_else(|| missing(target))?;
    append_unique(list, &item.id);
    Ok(())
}
