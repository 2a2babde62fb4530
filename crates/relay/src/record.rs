//! Event records and frame decoding.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// One pause interval. Always written together with the attendance row
/// derived from `departure_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceFact {
    pub departure_time: String,
    pub return_time: String,
    pub break_kind: i64,
}

/// One audit log entry. Every field is optional on the wire and defaults to
/// the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditFact {
    pub subject_id: String,
    pub action: String,
    pub hostname: String,
    pub source_ip: String,
}

/// A validated event, the unit of work of the relay.
///
/// Records carry no identity: two identical records are two legitimate
/// events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub attendance: AttendanceFact,
    #[serde(flatten)]
    pub audit: AuditFact,
}

/// Why a frame was rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field 'break_kind' is not a finite number")]
    NonFiniteBreakKind,
}

impl EventRecord {
    /// Decode and validate one text frame.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        match serde_json::from_str::<Value>(frame)? {
            Value::Object(fields) => Self::from_fields(&fields),
            _ => Err(DecodeError::NotAnObject),
        }
    }

    fn from_fields(fields: &Map<String, Value>) -> Result<Self, DecodeError> {
        let departure_time = required_str(fields, "departure_time")?;
        let return_time = required_str(fields, "return_time")?;
        let break_kind = required_kind(fields)?;

        Ok(Self {
            attendance: AttendanceFact {
                departure_time,
                return_time,
                break_kind,
            },
            audit: AuditFact {
                subject_id: optional_str(fields, "subject_id"),
                action: optional_str(fields, "action"),
                hostname: optional_str(fields, "hostname"),
                source_ip: optional_str(fields, "source_ip"),
            },
        })
    }

    /// Encode the record as a single wire frame (no trailing newline).
    pub fn to_frame(&self) -> String {
        // Only strings and integers: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn required_str(fields: &Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match fields.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DecodeError::WrongType {
            field,
            expected: "string",
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

/// `break_kind` arrives as any JSON number and is truncated toward zero.
fn required_kind(fields: &Map<String, Value>) -> Result<i64, DecodeError> {
    const FIELD: &str = "break_kind";

    let number = match fields.get(FIELD) {
        Some(Value::Number(n)) => n,
        Some(_) => {
            return Err(DecodeError::WrongType {
                field: FIELD,
                expected: "number",
            });
        }
        None => return Err(DecodeError::MissingField(FIELD)),
    };

    if let Some(kind) = number.as_i64() {
        return Ok(kind);
    }
    match number.as_f64() {
        Some(kind) if kind.is_finite() => Ok(kind.trunc() as i64),
        _ => Err(DecodeError::NonFiniteBreakKind),
    }
}

fn optional_str(fields: &Map<String, Value>, field: &str) -> String {
    match fields.get(field) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}
