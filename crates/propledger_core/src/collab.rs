//! Boundaries to the external collaborators that feed the interpreter.
//!
//! # Responsibility
//! - Define the seams for text extraction, instruction production and
//!   enrichment suggestion, so model-backed producers can be swapped in.
//! - Ship the local, dependency-free implementations: plain-text
//!   extraction and JSON instruction files.
//!
//! # Invariants
//! - Producers hand back raw JSON; validation belongs to the interpreter,
//!   which reports malformed items as failed instructions.

use crate::store::Snapshot;
use log::debug;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported document format `{0}`")]
    UnsupportedFormat(String),
    #[error("i/o failed for `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("instruction file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON array of instructions or an object with an `instructions` array")]
    NotAnInstructionList,
}

/// Failure reported by an instruction or enrichment producer.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProducerError(pub String);

impl From<ExtractError> for ProducerError {
    fn from(value: ExtractError) -> Self {
        Self(value.to_string())
    }
}

/// Turns a source document into plain text.
pub trait TextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Turns free text into raw instruction objects.
pub trait InstructionProducer {
    fn instructions_from_text(&self, text: &str) -> Result<Vec<Value>, ProducerError>;
}

/// Suggests instructions that fill gaps in the current registry.
///
/// Suggestions are marked as enrichment and held for approval by default.
pub trait EnrichmentProducer {
    fn suggest(&self, snapshot: &Snapshot, source_text: &str) -> Result<Vec<Value>, ProducerError>;
}

const PLAIN_TEXT_FORMATS: [&str; 5] = ["txt", "md", "csv", "json", "eml"];

/// Reads text-based formats as-is. Emails keep their subject line and body.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if !PLAIN_TEXT_FORMATS.contains(&extension.as_str()) {
            return Err(ExtractError::UnsupportedFormat(extension));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = if extension == "eml" {
            email_text(&raw)
        } else {
            raw.trim().to_string()
        };
        debug!(
            "event=text_extract module=collab status=ok format={extension} chars={}",
            text.chars().count()
        );
        Ok(text)
    }
}

fn email_text(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n");
    let (headers, body) = normalized
        .split_once("\n\n")
        .unwrap_or(("", normalized.as_str()));
    let subject = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("subject")
            .then(|| value.trim().to_string())
    });
    match subject {
        Some(subject) => format!("Subject: {subject}\n\n{}", body.trim()),
        None => body.trim().to_string(),
    }
}

/// Splits text into chunks of at most `max_chars` characters on line
/// boundaries. A single longer line is split on character boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.lines() {
        let line_len = line.chars().count();
        if current_len > 0 && current_len + 1 + line_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}

/// Stamps raw instruction objects as enrichment suggestions. An existing
/// `confidence` is kept; otherwise `default_confidence` is written when set.
pub fn mark_as_enrichment(values: Vec<Value>, default_confidence: Option<f64>) -> Vec<Value> {
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(mut object) => {
                object.insert("source".to_string(), Value::from("enrichment"));
                if !object.contains_key("confidence") {
                    if let Some(confidence) = default_confidence {
                        object.insert("confidence".to_string(), Value::from(confidence));
                    }
                }
                Value::Object(object)
            }
            other => other,
        })
        .collect()
}

/// Reads instruction lists written as JSON, either a bare array or an object
/// with an `instructions` array.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonInstructionReader;

impl JsonInstructionReader {
    pub fn read_file(&self, path: &Path) -> Result<Vec<Value>, ExtractError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(&raw)
    }

    pub fn parse(&self, raw: &str) -> Result<Vec<Value>, ExtractError> {
        match serde_json::from_str(raw)? {
            Value::Array(items) => Ok(items),
            Value::Object(mut object) => match object.remove("instructions") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(ExtractError::NotAnInstructionList),
            },
            _ => Err(ExtractError::NotAnInstructionList),
        }
    }
}

impl InstructionProducer for JsonInstructionReader {
    fn instructions_from_text(&self, text: &str) -> Result<Vec<Value>, ProducerError> {
        Ok(self.parse(text)?)
    }
}

/// Writes a JSON report next to the registry (failed or pending lists).
pub fn write_json_report(path: &Path, value: &impl serde::Serialize) -> Result<(), ExtractError> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })
}
