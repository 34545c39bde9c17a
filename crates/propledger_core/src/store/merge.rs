//! Additive record merge.
//!
//! # Invariants
//! - `null` in a patch never clears anything.
//! - Objects merge key by key; arrays only gain items they do not hold yet.
//! - Scalars follow last-writer-wins when the incoming value is non-null.
//! - A record id is never rewritten by a merge.

use crate::model::record::AnyRecord;
use serde_json::{Map, Value};

/// Merges `patch` into `target`. Returns whether `target` changed.
pub fn merge_value(target: &mut Value, patch: &Value) -> bool {
    match patch {
        Value::Null => false,
        Value::Object(incoming) => {
            if let Value::Object(existing) = target {
                return merge_object(existing, incoming);
            }
            let mut fresh = Map::new();
            merge_object(&mut fresh, incoming);
            if fresh.is_empty() {
                return false;
            }
            *target = Value::Object(fresh);
            true
        }
        Value::Array(items) => {
            let known: &[Value] = match target {
                Value::Array(existing) => existing,
                _ => &[],
            };
            let mut additions: Vec<Value> = Vec::new();
            for item in items.iter().filter(|item| !item.is_null()) {
                let present = known.iter().chain(additions.iter()).any(|k| same_scalar(k, item));
                if !present {
                    additions.push(item.clone());
                }
            }
            if additions.is_empty() {
                return false;
            }
            match target {
                Value::Array(existing) => existing.extend(additions),
                other => *other = Value::Array(additions),
            }
            true
        }
        scalar => {
            if same_scalar(target, scalar) {
                return false;
            }
            *target = scalar.clone();
            true
        }
    }
}

fn merge_object(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) -> bool {
    let mut changed = false;
    for (key, value) in incoming {
        if value.is_null() {
            continue;
        }
        match existing.get_mut(key) {
            Some(slot) => changed |= merge_value(slot, value),
            None => {
                let mut slot = Value::Null;
                if merge_value(&mut slot, value) {
                    existing.insert(key.clone(), slot);
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Equality that treats `2475` and `2475.0` as the same value.
fn same_scalar(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => match (left.as_f64(), right.as_f64()) {
            (Some(left), Some(right)) => (left - right).abs() < 1e-9,
            _ => left == right,
        },
        _ => left == right,
    }
}

/// Merges a record-shaped patch into `record`.
///
/// # Errors
/// Returns the decode error when the merged JSON no longer fits the record
/// shape (for example a string where a date is expected).
pub fn merge_record(
    record: &mut AnyRecord,
    patch: &Map<String, Value>,
) -> Result<bool, serde_json::Error> {
    let mut current = record.to_value()?;
    let mut patch = patch.clone();
    patch.remove("id");
    if !merge_value(&mut current, &Value::Object(patch)) {
        return Ok(false);
    }
    *record = AnyRecord::from_value(record.kind(), current)?;
    Ok(true)
}

/// Whether merging `patch` into `record` would change nothing.
pub fn already_holds(record: &AnyRecord, patch: &Map<String, Value>) -> bool {
    let Ok(mut current) = record.to_value() else {
        return false;
    };
    let mut patch = patch.clone();
    patch.remove("id");
    !merge_value(&mut current, &Value::Object(patch))
}

/// Whether applying `patch` would overwrite a known scalar with a
/// different non-null value.
pub fn conflicts_with(record: &AnyRecord, patch: &Map<String, Value>) -> bool {
    match record.to_value() {
        Ok(Value::Object(existing)) => object_conflicts(&existing, patch),
        _ => false,
    }
}

fn object_conflicts(existing: &Map<String, Value>, patch: &Map<String, Value>) -> bool {
    patch.iter().any(|(key, incoming)| {
        if key == "id" {
            return false;
        }
        match (existing.get(key), incoming) {
            (None | Some(Value::Null), _) | (_, Value::Null) | (_, Value::Array(_)) => false,
            (Some(Value::Object(known)), Value::Object(incoming)) => {
                object_conflicts(known, incoming)
            }
            (Some(known), incoming) => !same_scalar(known, incoming),
        }
    })
}
