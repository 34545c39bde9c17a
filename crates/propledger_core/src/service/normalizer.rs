//! Relationship Normalizer.
//!
//! # Responsibility
//! - Repair back-reference collections from the authoritative child fields
//!   and drop references to records that do not exist (`reconcile`).
//! - Render the flat store as an ownership hierarchy (`build_hierarchy`)
//!   and flatten it back without loss (`Hierarchy::flatten`).
//!
//! # Invariants
//! - Every record appears exactly once in a hierarchy; records whose parent
//!   is missing go to the `unattached` buckets with their subtrees.
//! - Child ordering is by id.
//! - `reconcile` is idempotent: a second run reports nothing.

use crate::model::entity::{EntityId, EntityKind, EntityRef};
use crate::model::record::{
    append_unique, remove_id, AnyRecord, Document, Lease, Owner, Photo, Property, Tenant, Unit,
};
use crate::store::graph::{GraphStore, Staging};
use crate::store::links::can_attach;
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

/// What `reconcile` did about one broken reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// The reference named a record that does not exist.
    RemovedDangling,
    /// The reference named a record of a kind it cannot point at.
    RemovedInvalid,
    /// A parent listed a child that belongs elsewhere.
    RemovedStale,
    /// A parent collection was missing a child that points at it.
    AddedBackReference,
    /// A child with no parent was claimed by a parent collection.
    FilledReference,
}

/// One repaired reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileIssue {
    /// Record that was changed.
    pub entity: EntityRef,
    pub field: &'static str,
    /// Record the field pointed at, or now points at.
    pub target: EntityRef,
    pub action: RepairAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub issues: Vec<ReconcileIssue>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(
        &mut self,
        entity: &EntityRef,
        field: &'static str,
        target: &EntityRef,
        action: RepairAction,
    ) {
        warn!(
            "event=reconcile_issue module=normalizer status=repaired action={action:?} entity={entity} field={field} target={target}"
        );
        self.issues.push(ReconcileIssue {
            entity: entity.clone(),
            field,
            target: target.clone(),
            action,
        });
    }
}

/// Child-to-parent relationship mirrored by an id collection on the parent.
struct Containment {
    child: EntityKind,
    parents: &'static [EntityKind],
    child_field: &'static str,
    list_field: &'static str,
    parent_of: fn(&AnyRecord) -> Option<EntityRef>,
    set_parent: fn(&mut AnyRecord, Option<EntityRef>),
    list: fn(&AnyRecord) -> &[EntityId],
    list_mut: fn(&mut AnyRecord) -> Option<&mut Option<Vec<EntityId>>>,
}

fn unit_parent(record: &AnyRecord) -> Option<EntityRef> {
    let id = record.as_unit()?.property_id.clone()?;
    Some(EntityRef::new(EntityKind::Property, id))
}

fn set_unit_parent(record: &mut AnyRecord, parent: Option<EntityRef>) {
    if let Some(unit) = record.as_unit_mut() {
        unit.property_id = parent.map(|parent| parent.id);
    }
}

fn unit_list(record: &AnyRecord) -> &[EntityId] {
    record
        .as_property()
        .and_then(|property| property.unit_ids.as_deref())
        .unwrap_or_default()
}

fn unit_list_mut(record: &mut AnyRecord) -> Option<&mut Option<Vec<EntityId>>> {
    record.as_property_mut().map(|property| &mut property.unit_ids)
}

fn property_parent(record: &AnyRecord) -> Option<EntityRef> {
    let id = record.as_property()?.owner_id.clone()?;
    Some(EntityRef::new(EntityKind::Owner, id))
}

fn set_property_parent(record: &mut AnyRecord, parent: Option<EntityRef>) {
    if let Some(property) = record.as_property_mut() {
        property.owner_id = parent.map(|parent| parent.id);
    }
}

fn property_list(record: &AnyRecord) -> &[EntityId] {
    record
        .as_owner()
        .and_then(|owner| owner.property_ids.as_deref())
        .unwrap_or_default()
}

fn property_list_mut(record: &mut AnyRecord) -> Option<&mut Option<Vec<EntityId>>> {
    record.as_owner_mut().map(|owner| &mut owner.property_ids)
}

fn attachment_parent(record: &AnyRecord) -> Option<EntityRef> {
    record.attached_to().cloned()
}

fn set_attachment_parent(record: &mut AnyRecord, parent: Option<EntityRef>) {
    if let Some(slot) = record.attached_to_mut() {
        *slot = parent;
    }
}

const CONTAINMENTS: [Containment; 4] = [
    Containment {
        child: EntityKind::Unit,
        parents: &[EntityKind::Property],
        child_field: "propertyId",
        list_field: "unitIds",
        parent_of: unit_parent,
        set_parent: set_unit_parent,
        list: unit_list,
        list_mut: unit_list_mut,
    },
    Containment {
        child: EntityKind::Property,
        parents: &[EntityKind::Owner],
        child_field: "ownerId",
        list_field: "propertyIds",
        parent_of: property_parent,
        set_parent: set_property_parent,
        list: property_list,
        list_mut: property_list_mut,
    },
    Containment {
        child: EntityKind::Document,
        parents: &[
            EntityKind::Owner,
            EntityKind::Property,
            EntityKind::Unit,
            EntityKind::Tenant,
            EntityKind::Lease,
        ],
        child_field: "attachedTo",
        list_field: "documentIds",
        parent_of: attachment_parent,
        set_parent: set_attachment_parent,
        list: AnyRecord::document_ids,
        list_mut: AnyRecord::document_ids_mut,
    },
    Containment {
        child: EntityKind::Photo,
        parents: &[EntityKind::Property, EntityKind::Unit],
        child_field: "attachedTo",
        list_field: "photoIds",
        parent_of: attachment_parent,
        set_parent: set_attachment_parent,
        list: AnyRecord::photo_ids,
        list_mut: AnyRecord::photo_ids_mut,
    },
];

fn refs_of(store: &GraphStore, kind: EntityKind) -> Vec<EntityRef> {
    store.records(kind).map(AnyRecord::entity_ref).collect()
}

fn reconcile_containment(
    store: &GraphStore,
    staging: &mut Staging,
    report: &mut ReconcileReport,
    containment: &Containment,
) {
    let children = refs_of(store, containment.child);

    for child in &children {
        let Some(parent) = staging
            .get(store, child)
            .and_then(|record| (containment.parent_of)(record))
        else {
            continue;
        };
        let action = if !containment.parents.contains(&parent.kind) {
            RepairAction::RemovedInvalid
        } else if !staging.exists(store, &parent) {
            RepairAction::RemovedDangling
        } else {
            continue;
        };
        if let Some(record) = staging.get_mut(store, child) {
            (containment.set_parent)(record, None);
        }
        report.push(child, containment.child_field, &parent, action);
    }

    for kind in containment.parents {
        for parent in refs_of(store, *kind) {
            let listed = staging
                .get(store, &parent)
                .map(|record| (containment.list)(record).to_vec())
                .unwrap_or_default();
            for id in listed {
                let child = EntityRef::new(containment.child, id);
                let current = staging
                    .get(store, &child)
                    .map(|record| (containment.parent_of)(record));
                match current {
                    None => {
                        remove_listed(store, staging, containment, &parent, &child);
                        report.push(
                            &parent,
                            containment.list_field,
                            &child,
                            RepairAction::RemovedDangling,
                        );
                    }
                    Some(Some(current)) if current == parent => {}
                    Some(Some(_)) => {
                        remove_listed(store, staging, containment, &parent, &child);
                        report.push(
                            &parent,
                            containment.list_field,
                            &child,
                            RepairAction::RemovedStale,
                        );
                    }
                    Some(None) => {
                        if let Some(record) = staging.get_mut(store, &child) {
                            (containment.set_parent)(record, Some(parent.clone()));
                        }
                        report.push(
                            &child,
                            containment.child_field,
                            &parent,
                            RepairAction::FilledReference,
                        );
                    }
                }
            }
        }
    }

    for child in &children {
        let Some(parent) = staging
            .get(store, child)
            .and_then(|record| (containment.parent_of)(record))
        else {
            continue;
        };
        let added = staging
            .get_mut(store, &parent)
            .and_then(|record| (containment.list_mut)(record))
            .is_some_and(|list| append_unique(list, &child.id));
        if added {
            report.push(
                &parent,
                containment.list_field,
                child,
                RepairAction::AddedBackReference,
            );
        }
    }
}

fn remove_listed(
    store: &GraphStore,
    staging: &mut Staging,
    containment: &Containment,
    parent: &EntityRef,
    child: &EntityRef,
) {
    if let Some(list) = staging
        .get_mut(store, parent)
        .and_then(|record| (containment.list_mut)(record))
    {
        remove_id(list, &child.id);
    }
}

/// Drops single-valued references whose target does not exist.
fn reconcile_scalar_refs(store: &GraphStore, staging: &mut Staging, report: &mut ReconcileReport) {
    for unit in refs_of(store, EntityKind::Unit) {
        let tenant = staging
            .get(store, &unit)
            .and_then(AnyRecord::as_unit)
            .and_then(|record| record.current_tenant_id.clone())
            .map(|id| EntityRef::new(EntityKind::Tenant, id));
        if let Some(tenant) = tenant.filter(|tenant| !staging.exists(store, tenant)) {
            if let Some(record) = staging.get_mut(store, &unit).and_then(AnyRecord::as_unit_mut) {
                record.current_tenant_id = None;
            }
            report.push(&unit, "currentTenantId", &tenant, RepairAction::RemovedDangling);
        }
    }

    for lease in refs_of(store, EntityKind::Lease) {
        let Some(record) = staging.get(store, &lease).and_then(AnyRecord::as_lease) else {
            continue;
        };
        let unit = record
            .unit_id
            .clone()
            .map(|id| EntityRef::new(EntityKind::Unit, id))
            .filter(|unit| !staging.exists(store, unit));
        let property = record
            .property_id
            .clone()
            .map(|id| EntityRef::new(EntityKind::Property, id))
            .filter(|property| !staging.exists(store, property));
        let tenant = record
            .tenant_id
            .clone()
            .map(|id| EntityRef::new(EntityKind::Tenant, id))
            .filter(|tenant| !staging.exists(store, tenant));
        let Some(record) = staging.get_mut(store, &lease).and_then(AnyRecord::as_lease_mut) else {
            continue;
        };
        if unit.is_some() {
            record.unit_id = None;
        }
        if property.is_some() {
            record.property_id = None;
        }
        if tenant.is_some() {
            record.tenant_id = None;
        }
        for (field, target) in [("unitId", unit), ("propertyId", property), ("tenantId", tenant)] {
            if let Some(target) = target {
                report.push(&lease, field, &target, RepairAction::RemovedDangling);
            }
        }
    }
}

/// Keeps `tenant.leaseId` consistent with the authoritative `lease.tenantId`.
fn reconcile_tenant_leases(store: &GraphStore, staging: &mut Staging, report: &mut ReconcileReport) {
    for tenant in refs_of(store, EntityKind::Tenant) {
        let Some(lease) = staging
            .get(store, &tenant)
            .and_then(AnyRecord::as_tenant)
            .and_then(|record| record.lease_id.clone())
            .map(|id| EntityRef::new(EntityKind::Lease, id))
        else {
            continue;
        };
        let holder = staging
            .get(store, &lease)
            .and_then(AnyRecord::as_lease)
            .map(|record| record.tenant_id.clone());
        match holder {
            None => {
                clear_tenant_lease(store, staging, &tenant);
                report.push(&tenant, "leaseId", &lease, RepairAction::RemovedDangling);
            }
            Some(Some(holder)) if holder == tenant.id => {}
            Some(Some(_)) => {
                clear_tenant_lease(store, staging, &tenant);
                report.push(&tenant, "leaseId", &lease, RepairAction::RemovedStale);
            }
            Some(None) => {
                if let Some(record) = staging.get_mut(store, &lease).and_then(AnyRecord::as_lease_mut)
                {
                    record.tenant_id = Some(tenant.id.clone());
                }
                report.push(&lease, "tenantId", &tenant, RepairAction::FilledReference);
            }
        }
    }

    for lease in refs_of(store, EntityKind::Lease) {
        let Some(tenant) = staging
            .get(store, &lease)
            .and_then(AnyRecord::as_lease)
            .and_then(|record| record.tenant_id.clone())
            .map(|id| EntityRef::new(EntityKind::Tenant, id))
        else {
            continue;
        };
        let Some(record) = staging.get_mut(store, &tenant).and_then(AnyRecord::as_tenant_mut) else {
            continue;
        };
        if record.lease_id.is_none() {
            record.lease_id = Some(lease.id.clone());
            report.push(&tenant, "leaseId", &lease, RepairAction::AddedBackReference);
        }
    }
}

fn clear_tenant_lease(store: &GraphStore, staging: &mut Staging, tenant: &EntityRef) {
    if let Some(record) = staging.get_mut(store, tenant).and_then(AnyRecord::as_tenant_mut) {
        record.lease_id = None;
    }
}

/// Repairs back-references and removes dangling references in place.
pub fn reconcile(store: &mut GraphStore) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut staging = Staging::new();
    reconcile_scalar_refs(store, &mut staging, &mut report);
    reconcile_tenant_leases(store, &mut staging, &mut report);
    for containment in &CONTAINMENTS {
        reconcile_containment(store, &mut staging, &mut report, containment);
    }
    store.commit(staging);
    info!(
        "event=reconcile module=normalizer status=ok issues={}",
        report.issues.len()
    );
    report
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaseNode {
    #[serde(flatten)]
    pub lease: Lease,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantNode {
    #[serde(flatten)]
    pub tenant: Tenant,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub leases: Vec<LeaseNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitNode {
    #[serde(flatten)]
    pub unit: Unit,
    /// Current occupant. A tenant named by several units sits under the
    /// first one by id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<Photo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyNode {
    #[serde(flatten)]
    pub property: Property,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<Photo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerNode {
    #[serde(flatten)]
    pub owner: Owner,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
}

/// Records whose parent is absent, each with its own subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Unattached {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tenants: Vec<TenantNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub leases: Vec<LeaseNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<Photo>,
}

impl Unattached {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
            && self.units.is_empty()
            && self.tenants.is_empty()
            && self.leases.is_empty()
            && self.documents.is_empty()
            && self.photos.is_empty()
    }
}

/// Ownership tree: Owner → Property → Unit → Tenant → Lease, with documents
/// and photos under the record they are attached to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Hierarchy {
    pub owners: Vec<OwnerNode>,
    #[serde(skip_serializing_if = "Unattached::is_empty")]
    pub unattached: Unattached,
    #[serde(skip)]
    declared: BTreeSet<EntityKind>,
    #[serde(skip)]
    extra: Map<String, Value>,
}

/// Grouping of records by the parent they hang under.
struct Placement<'a> {
    store: &'a GraphStore,
    documents: HashMap<EntityRef, Vec<Document>>,
    photos: HashMap<EntityRef, Vec<Photo>>,
    leases: HashMap<EntityId, Vec<&'a Lease>>,
    tenant_home: HashMap<EntityId, EntityId>,
}

impl<'a> Placement<'a> {
    fn new(store: &'a GraphStore, unattached: &mut Unattached) -> Self {
        let mut documents: HashMap<EntityRef, Vec<Document>> = HashMap::new();
        for document in store.documents() {
            match document.attached_to.as_ref().filter(|target| {
                can_attach(EntityKind::Document, target.kind) && store.contains(target)
            }) {
                Some(target) => documents.entry(target.clone()).or_default().push(document.clone()),
                None => unattached.documents.push(document.clone()),
            }
        }

        let mut photos: HashMap<EntityRef, Vec<Photo>> = HashMap::new();
        for photo in store.photos() {
            match photo.attached_to.as_ref().filter(|target| {
                can_attach(EntityKind::Photo, target.kind) && store.contains(target)
            }) {
                Some(target) => photos.entry(target.clone()).or_default().push(photo.clone()),
                None => unattached.photos.push(photo.clone()),
            }
        }

        let mut leases: HashMap<EntityId, Vec<&Lease>> = HashMap::new();
        for lease in store.leases() {
            match lease
                .tenant_id
                .as_ref()
                .filter(|tenant| store.tenant(tenant).is_some())
            {
                Some(tenant) => leases.entry(tenant.clone()).or_default().push(lease),
                None => unattached.leases.push(LeaseNode {
                    lease: lease.clone(),
                    documents: Vec::new(),
                }),
            }
        }

        let mut tenant_home = HashMap::new();
        for unit in store.units() {
            if let Some(tenant) = unit
                .current_tenant_id
                .as_ref()
                .filter(|tenant| store.tenant(tenant).is_some())
            {
                tenant_home
                    .entry(tenant.clone())
                    .or_insert_with(|| unit.id.clone());
            }
        }

        let mut placement = Self {
            store,
            documents,
            photos,
            leases,
            tenant_home,
        };
        for node in &mut unattached.leases {
            node.documents = placement.documents_of(EntityKind::Lease, &node.lease.id);
        }
        placement
    }

    fn documents_of(&mut self, kind: EntityKind, id: &str) -> Vec<Document> {
        self.documents
            .remove(&EntityRef::new(kind, id))
            .unwrap_or_default()
    }

    fn photos_of(&mut self, kind: EntityKind, id: &str) -> Vec<Photo> {
        self.photos
            .remove(&EntityRef::new(kind, id))
            .unwrap_or_default()
    }

    fn lease_node(&mut self, lease: &Lease) -> LeaseNode {
        LeaseNode {
            lease: lease.clone(),
            documents: self.documents_of(EntityKind::Lease, &lease.id),
        }
    }

    fn tenant_node(&mut self, tenant: &Tenant) -> TenantNode {
        let leases = self.leases.remove(&tenant.id).unwrap_or_default();
        TenantNode {
            tenant: tenant.clone(),
            leases: leases.into_iter().map(|lease| self.lease_node(lease)).collect(),
            documents: self.documents_of(EntityKind::Tenant, &tenant.id),
        }
    }

    fn unit_node(&mut self, unit: &Unit) -> UnitNode {
        let store = self.store;
        let tenant = unit
            .current_tenant_id
            .as_ref()
            .filter(|tenant| self.tenant_home.get(*tenant) == Some(&unit.id))
            .and_then(|tenant| store.tenant(tenant));
        UnitNode {
            unit: unit.clone(),
            tenant: tenant.map(|tenant| self.tenant_node(tenant)),
            documents: self.documents_of(EntityKind::Unit, &unit.id),
            photos: self.photos_of(EntityKind::Unit, &unit.id),
        }
    }

    fn property_node(&mut self, property: &Property) -> PropertyNode {
        let store = self.store;
        let units = store
            .units()
            .filter(|unit| unit.property_id.as_deref() == Some(property.id.as_str()))
            .map(|unit| self.unit_node(unit))
            .collect();
        PropertyNode {
            property: property.clone(),
            units,
            documents: self.documents_of(EntityKind::Property, &property.id),
            photos: self.photos_of(EntityKind::Property, &property.id),
        }
    }

    fn owner_node(&mut self, owner: &Owner) -> OwnerNode {
        let store = self.store;
        let properties = store
            .properties()
            .filter(|property| property.owner_id.as_deref() == Some(owner.id.as_str()))
            .map(|property| self.property_node(property))
            .collect();
        OwnerNode {
            owner: owner.clone(),
            properties,
            documents: self.documents_of(EntityKind::Owner, &owner.id),
        }
    }
}

/// Builds the ownership tree. The store is not modified.
pub fn build_hierarchy(store: &GraphStore) -> Hierarchy {
    let mut unattached = Unattached::default();
    let mut placement = Placement::new(store, &mut unattached);

    let owners = store
        .owners()
        .map(|owner| placement.owner_node(owner))
        .collect();
    unattached.properties = store
        .properties()
        .filter(|property| {
            property
                .owner_id
                .as_ref()
                .map_or(true, |owner| store.owner(owner).is_none())
        })
        .map(|property| placement.property_node(property))
        .collect();
    unattached.units = store
        .units()
        .filter(|unit| {
            unit.property_id
                .as_ref()
                .map_or(true, |property| store.property(property).is_none())
        })
        .map(|unit| placement.unit_node(unit))
        .collect();
    let homeless: Vec<&Tenant> = store
        .tenants()
        .filter(|tenant| !placement.tenant_home.contains_key(&tenant.id))
        .collect();
    unattached.tenants = homeless
        .into_iter()
        .map(|tenant| placement.tenant_node(tenant))
        .collect();

    Hierarchy {
        owners,
        unattached,
        declared: store.declared_kinds().collect(),
        extra: store.extra().clone(),
    }
}

impl Hierarchy {
    pub fn record_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    /// Rebuilds the flat store holding exactly the records in the tree.
    pub fn flatten(&self) -> GraphStore {
        let mut store = GraphStore::new();
        for kind in &self.declared {
            store.declare(*kind);
        }
        store.set_extra(self.extra.clone());
        self.visit(&mut |record| store.insert_record(record));
        store
    }

    fn visit(&self, sink: &mut impl FnMut(AnyRecord)) {
        for owner in &self.owners {
            sink(AnyRecord::Owner(owner.owner.clone()));
            visit_documents(&owner.documents, sink);
            for property in &owner.properties {
                visit_property(property, sink);
            }
        }
        let unattached = &self.unattached;
        for property in &unattached.properties {
            visit_property(property, sink);
        }
        for unit in &unattached.units {
            visit_unit(unit, sink);
        }
        for tenant in &unattached.tenants {
            visit_tenant(tenant, sink);
        }
        for lease in &unattached.leases {
            visit_lease(lease, sink);
        }
        visit_documents(&unattached.documents, sink);
        visit_photos(&unattached.photos, sink);
    }
}

fn visit_documents(documents: &[Document], sink: &mut impl FnMut(AnyRecord)) {
    for document in documents {
        sink(AnyRecord::Document(document.clone()));
    }
}

fn visit_photos(photos: &[Photo], sink: &mut impl FnMut(AnyRecord)) {
    for photo in photos {
        sink(AnyRecord::Photo(photo.clone()));
    }
}

fn visit_property(node: &PropertyNode, sink: &mut impl FnMut(AnyRecord)) {
    sink(AnyRecord::Property(node.property.clone()));
    visit_documents(&node.documents, sink);
    visit_photos(&node.photos, sink);
    for unit in &node.units {
        visit_unit(unit, sink);
    }
}

fn visit_unit(node: &UnitNode, sink: &mut impl FnMut(AnyRecord)) {
    sink(AnyRecord::Unit(node.unit.clone()));
    visit_documents(&node.documents, sink);
    visit_photos(&node.photos, sink);
    if let Some(tenant) = &node.tenant {
        visit_tenant(tenant, sink);
    }
}

fn visit_tenant(node: &TenantNode, sink: &mut impl FnMut(AnyRecord)) {
    sink(AnyRecord::Tenant(node.tenant.clone()));
    visit_documents(&node.documents, sink);
    for lease in &node.leases {
        visit_lease(lease, sink);
    }
}

fn visit_lease(node: &LeaseNode, sink: &mut impl FnMut(AnyRecord)) {
    sink(AnyRecord::Lease(node.lease.clone()));
    visit_documents(&node.documents, sink);
}

/// Result of `normalize`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalized {
    pub report: ReconcileReport,
    pub hierarchy: Hierarchy,
}

/// Reconciles the store in place, then builds its hierarchy.
pub fn normalize(store: &mut GraphStore) -> Normalized {
    let report = reconcile(store);
    let hierarchy = build_hierarchy(store);
    Normalized { report, hierarchy }
}
