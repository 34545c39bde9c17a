//! Coercion of loosely typed instruction values.
//!
//! # Responsibility
//! - Turn producer output (`"$1,500.00"`, `"July 1st, 2024"`, `"15th"`) into
//!   typed record values.
//!
//! # Invariants
//! - `Value::Null` never reaches these functions; callers skip nulls.
//! - Failures carry the field name but never echo sensitive input.

use crate::error::InstructionError;
use crate::model::record::{Amount, OwnershipType};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("valid regex"));
static AMOUNT_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)^
        (?:usd\s*)?\$?\s*
        (?P<number>\d{1,3}(?:,\d{3})+|\d+)(?P<fraction>\.\d+)?
        \s*(?:usd|dollars)?
        (?:\s*(?:/|per|a)\s*(?:mo|month))?
        $",
    )
    .expect("valid regex")
});
static PHONE_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\+?[0-9()\-.\s]+(?:\s*(?:x|ext\.?)\s*\d{1,6})?$").expect("valid regex")
});
static EMAIL_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));
static DUE_DAY_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:the\s+)?(\d{1,2})(?:st|nd|rd|th)?(?:\s+(?:of\s+)?(?:each|every|the)?\s*month)?$")
        .expect("valid regex")
});

fn mismatch(field: &str, expected: &str) -> InstructionError {
    InstructionError::validation(format!("field `{field}` is not a valid {expected}"))
}

/// Free text. Numbers and booleans are stringified; blank strings read as
/// absent.
pub fn text(field: &str, value: &Value) -> Result<Option<String>, InstructionError> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        _ => Err(mismatch(field, "text value")),
    }
}

/// Calendar date in one of the accepted spellings; ISO timestamps keep the
/// date part.
pub fn date(field: &str, value: &Value) -> Result<Option<NaiveDate>, InstructionError> {
    let Some(raw) = text(field, value)? else {
        return Ok(None);
    };
    let candidate = raw.split('T').next().unwrap_or(raw.as_str()).trim();
    let candidate = ORDINAL_SUFFIX.replace_all(candidate, "$1");
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(candidate.as_ref(), format).ok())
        .map(Some)
        .ok_or_else(|| mismatch(field, "date"))
}

/// Non-negative currency amount.
pub fn amount(field: &str, value: &Value) -> Result<Option<Amount>, InstructionError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            AMOUNT_TEXT.captures(trimmed).and_then(|caps| {
                let digits = caps["number"].replace(',', "");
                let fraction = caps.name("fraction").map_or("", |m| m.as_str());
                format!("{digits}{fraction}").parse::<f64>().ok()
            })
        }
        _ => None,
    };
    let parsed = parsed
        .filter(|amount| amount.is_finite() && *amount >= 0.0)
        .ok_or_else(|| mismatch(field, "currency amount"))?;
    match value {
        Value::Number(number) => Ok(Some(
            serde_json::from_value(Value::Number(number.clone()))
                .map_err(|_| mismatch(field, "currency amount"))?,
        )),
        _ => Amount::from_f64(parsed)
            .map(Some)
            .ok_or_else(|| mismatch(field, "currency amount")),
    }
}

/// Phone number with 7 to 15 digits. The trimmed original spelling is kept.
pub fn phone(field: &str, value: &Value) -> Result<Option<String>, InstructionError> {
    let Some(raw) = text(field, value)? else {
        return Ok(None);
    };
    if !PHONE_TEXT.is_match(&raw) {
        return Err(mismatch(field, "phone number"));
    }
    let main_part = raw
        .to_ascii_lowercase()
        .split(|c| c == 'x')
        .next()
        .unwrap_or_default()
        .to_string();
    let digits = main_part.chars().filter(char::is_ascii_digit).count();
    if !(7..=15).contains(&digits) {
        return Err(mismatch(field, "phone number"));
    }
    Ok(Some(raw))
}

/// Email address.
pub fn email(field: &str, value: &Value) -> Result<Option<String>, InstructionError> {
    let Some(raw) = text(field, value)? else {
        return Ok(None);
    };
    if EMAIL_TEXT.is_match(&raw) {
        Ok(Some(raw))
    } else {
        Err(mismatch(field, "email address"))
    }
}

/// Day of month rent is due: `15`, `"15th"`, `"the 1st of each month"`.
pub fn due_day(field: &str, value: &Value) -> Result<Option<u8>, InstructionError> {
    let day = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.eq_ignore_ascii_case("first") || trimmed.eq_ignore_ascii_case("the first") {
                Some(1)
            } else {
                DUE_DAY_TEXT
                    .captures(trimmed)
                    .and_then(|caps| caps[1].parse::<u64>().ok())
            }
        }
        _ => None,
    };
    day.filter(|day| (1..=31).contains(day))
        .map(|day| Some(day as u8))
        .ok_or_else(|| mismatch(field, "day of month (1-31)"))
}

/// Owner legal form; business suffixes map to `Organization`.
pub fn ownership_type(
    field: &str,
    value: &Value,
) -> Result<Option<OwnershipType>, InstructionError> {
    let Some(raw) = text(field, value)? else {
        return Ok(None);
    };
    let normalized = raw.to_ascii_lowercase().replace(['.', ','], "");
    match normalized.trim() {
        "individual" | "person" | "personal" | "sole owner" | "sole proprietor" => {
            Ok(Some(OwnershipType::Individual))
        }
        "organization" | "organisation" | "org" | "llc" | "inc" | "corp" | "corporation"
        | "company" | "business" | "trust" | "partnership" | "lp" | "llp" | "ltd" => {
            Ok(Some(OwnershipType::Organization))
        }
        _ => Err(mismatch(field, "ownership type (individual|organization)")),
    }
}
