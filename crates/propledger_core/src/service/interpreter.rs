//! Instruction Interpreter.
//!
//! # Responsibility
//! - Apply an ordered batch of instructions to a `GraphStore`.
//! - Isolate failures per instruction and report them with their reason.
//! - Hold enrichment suggestions back for approval unless configured
//!   otherwise.
//!
//! # Invariants
//! - Instructions apply strictly in input order; each one is staged and
//!   committed whole, or leaves the store untouched.
//! - A reference that does not resolve yet is retried once after the main
//!   pass, then reported as a resolution failure.
//! - Logs carry indices, kinds and counts only, never field values.
//!
//! # See also
//! - `service::fields` for field names and coercion.
//! - `store::links` for back-reference maintenance.

use crate::error::{InstructionError, ResolveError};
use crate::model::entity::{EntityKind, EntityRef, Key, UpsertOutcome};
use crate::model::instruction::{BatchOutcome, FailedInstruction, Instruction};
use crate::model::record::{AnyRecord, Expense};
use crate::service::fields::{
    parse_fields, CollectionField, CollectionItem, CollectionName, ParsedFields, Relation,
};
use crate::store::graph::{GraphStore, Staging};
use crate::store::links;
use crate::store::merge::{already_holds, conflicts_with, merge_record};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Instant;

/// What to do with enrichment-sourced instructions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    /// Return them as pending for human approval.
    #[default]
    Recommend,
    /// Apply them when confident enough; the rest stay pending.
    Apply,
}

/// How a natural key already used by an entity created earlier in the same
/// batch is treated when the new instruction disagrees with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Same natural key, same entity.
    #[default]
    Merge,
    /// Conflicting scalar values mean a second entity with the same key.
    Disambiguate,
}

macro_rules! lowercase_choice {
    ($ty:ident { $($text:literal => $variant:ident),* $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)*
                    other => Err(format!(
                        "unsupported value `{other}`; expected {}",
                        [$($text),*].join("|")
                    )),
                }
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                let text = match self {
                    $(Self::$variant => $text,)*
                };
                f.write_str(text)
            }
        }
    };
}

lowercase_choice!(EnrichmentMode { "recommend" => Recommend, "apply" => Apply });
lowercase_choice!(CollisionPolicy { "merge" => Merge, "disambiguate" => Disambiguate });

/// Interpreter behaviour switches; the `[interpreter]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub enrichment_mode: EnrichmentMode,
    /// Apply-mode threshold; enrichment below it stays pending.
    pub min_enrichment_confidence: f64,
    pub collision_policy: CollisionPolicy,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            enrichment_mode: EnrichmentMode::Recommend,
            min_enrichment_confidence: 0.8,
            collision_policy: CollisionPolicy::Merge,
        }
    }
}

/// Why one attempt at an instruction did not apply.
enum Failure {
    /// A referenced entity does not exist yet; worth one retry.
    Deferred(InstructionError),
    Failed(InstructionError),
}

impl From<InstructionError> for Failure {
    fn from(value: InstructionError) -> Self {
        Self::Failed(value)
    }
}

impl Failure {
    fn into_error(self) -> InstructionError {
        match self {
            Self::Deferred(err) | Self::Failed(err) => err,
        }
    }
}

/// Entities created during the current batch.
#[derive(Default)]
struct BatchState {
    created: HashSet<EntityRef>,
}

/// Applies instruction batches to a store.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    config: InterpreterConfig,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Applies a batch. Enrichment instructions go through the approval
    /// gate.
    pub fn apply(&self, store: &mut GraphStore, instructions: &[Instruction]) -> BatchOutcome {
        self.run(store, typed_entries(instructions), true)
    }

    /// Applies human-approved instructions without the enrichment gate.
    pub fn apply_approved(
        &self,
        store: &mut GraphStore,
        instructions: &[Instruction],
    ) -> BatchOutcome {
        self.run(store, typed_entries(instructions), false)
    }

    /// Applies raw JSON instructions. Elements that do not parse as an
    /// instruction are reported as validation failures in place; failures
    /// carry the element exactly as submitted.
    pub fn apply_json(&self, store: &mut GraphStore, values: &[Value]) -> BatchOutcome {
        self.run(store, raw_entries(values), true)
    }

    /// `apply_json` for human-approved instructions, bypassing the
    /// enrichment gate.
    pub fn apply_approved_json(&self, store: &mut GraphStore, values: &[Value]) -> BatchOutcome {
        self.run(store, raw_entries(values), false)
    }

    fn admits(&self, instruction: &Instruction) -> bool {
        self.config.enrichment_mode == EnrichmentMode::Apply
            && instruction.confidence.unwrap_or(0.0) >= self.config.min_enrichment_confidence
    }

    fn run(
        &self,
        store: &mut GraphStore,
        entries: Vec<Entry>,
        gated: bool,
    ) -> BatchOutcome {
        let started_at = Instant::now();
        let mut outcome = BatchOutcome::default();
        let mut batch = BatchState::default();
        let mut deferred = Vec::new();

        for (index, (raw, entry)) in entries.into_iter().enumerate() {
            let instruction = match entry {
                Ok(instruction) => instruction,
                Err(err) => {
                    record_failure(&mut outcome, index, raw, &err);
                    continue;
                }
            };
            if gated && instruction.is_enrichment() && !self.admits(&instruction) {
                debug!(
                    "event=instruction_pending module=interpreter status=ok index={index} kind={}",
                    instruction.target_type
                );
                outcome.pending.push(instruction);
                continue;
            }
            match self.apply_one(store, &instruction, &mut batch) {
                Ok(touched) => record_success(&mut outcome, index, &instruction, touched),
                Err(Failure::Deferred(_)) => {
                    debug!(
                        "event=instruction_deferred module=interpreter status=ok index={index} kind={}",
                        instruction.target_type
                    );
                    deferred.push((index, raw, instruction));
                }
                Err(Failure::Failed(err)) => record_failure(&mut outcome, index, raw, &err),
            }
        }

        let retried = deferred.len();
        for (index, raw, instruction) in deferred {
            match self.apply_one(store, &instruction, &mut batch) {
                Ok(touched) => record_success(&mut outcome, index, &instruction, touched),
                Err(failure) => record_failure(&mut outcome, index, raw, &failure.into_error()),
            }
        }
        outcome.failed.sort_by_key(|failed| failed.index);

        info!(
            "event=batch_apply module=interpreter status={} applied={} failed={} pending={} retried={} duration_ms={}",
            if outcome.failed.is_empty() { "ok" } else { "partial" },
            outcome.applied,
            outcome.failed.len(),
            outcome.pending.len(),
            retried,
            started_at.elapsed().as_millis()
        );
        outcome
    }

    fn apply_one(
        &self,
        store: &mut GraphStore,
        instruction: &Instruction,
        batch: &mut BatchState,
    ) -> Result<Vec<UpsertOutcome>, Failure> {
        let kind = instruction.target_type;
        let parsed = parse_fields(kind, instruction.operation, &instruction.fields)?;

        let property_scope = match parsed.relation(Relation::Property) {
            Some(reference) => {
                Some(resolve_reference(store, reference.kind, &reference.key, None)?)
            }
            None => None,
        };
        let mut relations = Vec::with_capacity(parsed.relations.len());
        for reference in &parsed.relations {
            let scope = match reference.kind {
                EntityKind::Unit => property_scope.as_ref(),
                _ => None,
            };
            let resolved = resolve_reference(store, reference.kind, &reference.key, scope)?;
            relations.push((reference.relation, resolved));
        }

        let mut staging = Staging::new();
        let target_scope = match kind {
            EntityKind::Unit => property_scope.as_ref(),
            _ => None,
        };
        let target =
            self.locate_target(store, &mut staging, instruction, &parsed, target_scope, batch)?;
        let mut touched = vec![target.clone()];

        if let Some(record) = staging.get_mut(store, &target.entity) {
            merge_record(record, &parsed.patch).map_err(|_| {
                InstructionError::validation(format!("fields do not fit the {kind} record shape"))
            })?;
        }
        for (relation, related) in &relations {
            link(store, &mut staging, &target.entity, *relation, related)?;
        }
        for field in &parsed.collections {
            touched.extend(append_items(store, &mut staging, &target.entity, field)?);
        }
        if kind == EntityKind::Lease {
            links::check_lease_placement(store, &mut staging, &target.entity)?;
        }

        store.commit(staging);
        for outcome in &touched {
            if outcome.created {
                batch.created.insert(outcome.entity.clone());
            }
        }
        Ok(touched)
    }

    fn locate_target(
        &self,
        store: &GraphStore,
        staging: &mut Staging,
        instruction: &Instruction,
        parsed: &ParsedFields,
        scope: Option<&EntityRef>,
        batch: &BatchState,
    ) -> Result<UpsertOutcome, Failure> {
        let kind = instruction.target_type;
        let key = instruction.target_key.as_ref();
        let located = staging.locate_or_create(store, kind, key, scope)?;
        let collides = self.config.collision_policy == CollisionPolicy::Disambiguate
            && matches!(key, Some(Key::NaturalKey(_)))
            && !located.created
            && batch.created.contains(&located.entity)
            && store
                .get(kind, &located.entity.id)
                .is_some_and(|existing| conflicts_with(existing, &parsed.patch));
        if collides {
            debug!(
                "event=natural_key_collision module=interpreter status=ok kind={kind} policy=disambiguate"
            );
            return Ok(UpsertOutcome {
                entity: staging.create(kind, key),
                created: true,
            });
        }
        Ok(located)
    }
}

/// Submitted form of an instruction next to its parse result.
type Entry = (Value, Result<Instruction, InstructionError>);

fn typed_entries(instructions: &[Instruction]) -> Vec<Entry> {
    instructions
        .iter()
        .map(|instruction| (instruction.to_value(), Ok(instruction.clone())))
        .collect()
}

fn raw_entries(values: &[Value]) -> Vec<Entry> {
    values
        .iter()
        .map(|value| {
            let parsed = serde_json::from_value::<Instruction>(value.clone()).map_err(|err| {
                InstructionError::validation(format!("malformed instruction: {err}"))
            });
            (value.clone(), parsed)
        })
        .collect()
}

fn record_success(
    outcome: &mut BatchOutcome,
    index: usize,
    instruction: &Instruction,
    touched: Vec<UpsertOutcome>,
) {
    debug!(
        "event=instruction_apply module=interpreter status=ok index={index} kind={} operation={:?} created={}",
        instruction.target_type,
        instruction.operation,
        touched.first().is_some_and(|target| target.created)
    );
    outcome.applied += 1;
    outcome.touched.extend(touched);
}

fn record_failure(outcome: &mut BatchOutcome, index: usize, raw: Value, err: &InstructionError) {
    warn!(
        "event=instruction_apply module=interpreter status=error index={index} error_kind={}",
        err.kind()
    );
    outcome.failed.push(FailedInstruction::new(index, raw, err));
}

fn resolve_reference(
    store: &GraphStore,
    kind: EntityKind,
    key: &Key,
    scope: Option<&EntityRef>,
) -> Result<EntityRef, Failure> {
    match store.resolve_within(kind, key, scope) {
        Ok(resolved) => Ok(resolved),
        Err(err @ ResolveError::NotFound { .. }) => {
            Err(Failure::Deferred(err.into_instruction_error()))
        }
        Err(err) => Err(Failure::Failed(err.into_instruction_error())),
    }
}

fn link(
    store: &GraphStore,
    staging: &mut Staging,
    target: &EntityRef,
    relation: Relation,
    related: &EntityRef,
) -> Result<(), InstructionError> {
    match (target.kind, relation) {
        (EntityKind::Property, Relation::Owner) => {
            links::set_property_owner(store, staging, target, related)
        }
        (EntityKind::Unit, Relation::Property) => {
            links::set_unit_property(store, staging, target, related)
        }
        (EntityKind::Unit, Relation::CurrentTenant) => {
            links::set_unit_tenant(store, staging, target, related)
        }
        (EntityKind::Tenant, Relation::Lease) => {
            links::set_lease_tenant(store, staging, related, target)
        }
        (EntityKind::Lease, Relation::Property) => {
            links::set_lease_property(store, staging, target, related)
        }
        (EntityKind::Lease, Relation::Unit) => {
            links::set_lease_unit(store, staging, target, related)
        }
        (EntityKind::Lease, Relation::Tenant) => {
            links::set_lease_tenant(store, staging, target, related)
        }
        (EntityKind::Document | EntityKind::Photo, Relation::AttachedTo) => {
            links::attach(store, staging, target, related)
        }
        (kind, relation) => Err(InstructionError::validation(format!(
            "{kind} records have no `{}` relationship",
            relation.field_name()
        ))),
    }
}

fn append_items(
    store: &GraphStore,
    staging: &mut Staging,
    target: &EntityRef,
    field: &CollectionField,
) -> Result<Vec<UpsertOutcome>, Failure> {
    let mut touched = Vec::new();
    let Some(child_kind) = field.collection.child_kind() else {
        let expenses = field.items.iter().filter_map(|item| match item {
            CollectionItem::Expense(expense) => Some(expense),
            _ => None,
        });
        append_expenses(store, staging, target, expenses)?;
        return Ok(touched);
    };

    for item in &field.items {
        let child = match item {
            CollectionItem::Reference(key) => {
                let scope = (child_kind == EntityKind::Unit).then_some(target);
                resolve_reference(store, child_kind, key, scope)?
            }
            CollectionItem::Record { key, patch } => {
                let held = match key {
                    None => holding_attachment(store, staging, target, child_kind, patch),
                    Some(_) => None,
                };
                let located = match held {
                    Some(entity) => UpsertOutcome {
                        entity,
                        created: false,
                    },
                    None => staging.locate_or_create(store, child_kind, key.as_ref(), None)?,
                };
                if let Some(record) = staging.get_mut(store, &located.entity) {
                    merge_record(record, patch).map_err(|_| {
                        InstructionError::validation(format!(
                            "item does not fit the {child_kind} record shape"
                        ))
                    })?;
                }
                let entity = located.entity.clone();
                touched.push(located);
                entity
            }
            CollectionItem::Expense(_) => {
                let err = InstructionError::validation("expense items belong in `expenses`");
                return Err(err.into());
            }
        };
        match field.collection {
            CollectionName::Units => links::set_unit_property(store, staging, &child, target)?,
            CollectionName::Properties => {
                links::set_property_owner(store, staging, &child, target)?
            }
            CollectionName::Documents | CollectionName::Photos => {
                links::attach(store, staging, &child, target)?
            }
            CollectionName::Expenses => {}
        }
    }
    Ok(touched)
}

/// Child already attached to `target` whose record holds every value in
/// `patch`. Lets keyless documents and photos re-apply without duplicating.
fn holding_attachment(
    store: &GraphStore,
    staging: &Staging,
    target: &EntityRef,
    child_kind: EntityKind,
    patch: &Map<String, Value>,
) -> Option<EntityRef> {
    let parent = staging.get(store, target)?;
    let attached = match child_kind {
        EntityKind::Photo => parent.photo_ids(),
        _ => parent.document_ids(),
    };
    attached
        .iter()
        .map(|id| EntityRef::new(child_kind, id.as_str()))
        .find(|child| {
            staging
                .get(store, child)
                .is_some_and(|record| already_holds(record, patch))
        })
}

fn append_expenses<'a>(
    store: &GraphStore,
    staging: &mut Staging,
    target: &EntityRef,
    items: impl Iterator<Item = &'a Expense>,
) -> Result<(), InstructionError> {
    let property = staging
        .get_mut(store, target)
        .and_then(AnyRecord::as_property_mut)
        .ok_or_else(|| InstructionError::validation("only properties carry expenses"))?;
    let expenses = property.expenses.get_or_insert_with(Vec::new);
    for item in items {
        if !expenses.iter().any(|known| known.same_item(item)) {
            expenses.push(item.clone());
        }
    }
    Ok(())
}
