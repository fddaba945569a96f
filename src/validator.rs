//! Assertion engine: status, field and validation-error checks against
//! a single [`ResponseRecord`].

use crate::model::{Assertion, ResponseRecord};
use serde_json::{Map, Value};
use thiserror::Error;

/// Fields consulted, in order, when looking for a flat error message.
const MESSAGE_FIELDS: [&str; 4] = ["detail", "message", "error", "non_field_errors"];

const BODY_PREVIEW_CHARS: usize = 500;

/// Why an assertion did not hold. Carries expected vs. actual.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssertionFailure {
    #[error("expected status {expected}, got {actual} (body: {body})")]
    StatusMismatch {
        expected: u16,
        actual: u16,
        body: String,
    },

    #[error("field '{path}' is missing from the response")]
    FieldMissing { path: String },

    #[error("field '{path}' mismatch: expected {expected}, got {actual}")]
    FieldMismatch {
        path: String,
        expected: Value,
        actual: Value,
    },

    #[error("field '{path}' should be absent or null, got {actual}")]
    FieldNotNull { path: String, actual: Value },

    #[error("'{path}' is neither an array nor an object (got {actual})")]
    NotACollection { path: String, actual: Value },

    #[error("'{path}' has {actual} entries, expected {expected}")]
    LengthMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("bulk item {item} out of range (payload holds {len} items)")]
    ItemOutOfRange { item: usize, len: usize },

    #[error("no error for '{field}' in payload {payload}")]
    AlertNotFound { field: String, payload: String },

    #[error("error for '{field}' does not mention '{expected}' (found {located:?})")]
    AlertMismatch {
        field: String,
        expected: String,
        located: Vec<String>,
    },
}

/// Look up a dotted path. Numeric segments index arrays; an empty
/// path is the value itself.
pub fn get_by_json_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = json;

    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(array) => {
                let index = part.parse::<usize>().ok()?;
                current = array.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// Shapes an API error body can take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorPayload<'a> {
    /// Object keyed by field name, values are message lists (or nested
    /// objects of the same form).
    Fields(&'a Map<String, Value>),
    /// One field-error object per submitted bulk item.
    Bulk(&'a [Value]),
    /// Single `detail` string, e.g. not found or authentication errors.
    Detail(&'a str),
    /// Bare list of messages.
    Messages(&'a [Value]),
    Other(&'a Value),
}

impl<'a> ErrorPayload<'a> {
    pub fn classify(body: &'a Value) -> Self {
        match body {
            Value::Object(map) => match map.get("detail") {
                Some(Value::String(detail)) if !has_field_errors(map) => {
                    ErrorPayload::Detail(detail)
                }
                _ => ErrorPayload::Fields(map),
            },
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                ErrorPayload::Bulk(items)
            }
            Value::Array(items) if items.iter().all(Value::is_string) => {
                ErrorPayload::Messages(items)
            }
            Value::String(detail) => ErrorPayload::Detail(detail),
            other => ErrorPayload::Other(other),
        }
    }
}

/// Whether any key besides `detail` holds a list or nested object.
fn has_field_errors(map: &Map<String, Value>) -> bool {
    map.iter()
        .any(|(key, value)| key != "detail" && (value.is_array() || value.is_object()))
}

/// Evaluate `assertion` against `record`.
pub fn evaluate(assertion: &Assertion, record: &ResponseRecord) -> Result<(), AssertionFailure> {
    let body = &record.body;
    match assertion {
        Assertion::Status(expected) => {
            if record.status == *expected {
                Ok(())
            } else {
                Err(AssertionFailure::StatusMismatch {
                    expected: *expected,
                    actual: record.status,
                    body: preview(body),
                })
            }
        }
        Assertion::FieldEquals { path, value } => {
            let actual = lookup(body, path)?;
            if actual == value {
                Ok(())
            } else {
                Err(AssertionFailure::FieldMismatch {
                    path: path.clone(),
                    expected: value.clone(),
                    actual: actual.clone(),
                })
            }
        }
        Assertion::FieldPresent(path) => lookup(body, path).map(|_| ()),
        Assertion::FieldAbsent(path) => match get_by_json_path(body, path) {
            None | Some(Value::Null) => Ok(()),
            Some(actual) => Err(AssertionFailure::FieldNotNull {
                path: path.clone(),
                actual: actual.clone(),
            }),
        },
        Assertion::FieldsPresent(paths) => {
            for path in paths {
                match get_by_json_path(body, path) {
                    None | Some(Value::Null) => {
                        return Err(AssertionFailure::FieldMissing { path: path.clone() })
                    }
                    Some(_) => {}
                }
            }
            Ok(())
        }
        Assertion::Length { path, len } => {
            let path = path.as_deref().unwrap_or("");
            let actual = match lookup(body, path)? {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(AssertionFailure::NotACollection {
                        path: path.to_string(),
                        actual: other.clone(),
                    })
                }
            };
            if actual == *len {
                Ok(())
            } else {
                Err(AssertionFailure::LengthMismatch {
                    path: path.to_string(),
                    expected: *len,
                    actual,
                })
            }
        }
        Assertion::ErrorAlert {
            message,
            field,
            item,
        } => error_alert(body, message, field, *item),
        Assertion::ErrorMessage(message) => error_message(body, message),
    }
}

fn lookup<'a>(body: &'a Value, path: &str) -> Result<&'a Value, AssertionFailure> {
    get_by_json_path(body, path).ok_or_else(|| AssertionFailure::FieldMissing {
        path: path.to_string(),
    })
}

fn error_alert(
    body: &Value,
    expected: &str,
    field: &str,
    item: Option<usize>,
) -> Result<(), AssertionFailure> {
    let not_found = || AssertionFailure::AlertNotFound {
        field: field.to_string(),
        payload: preview(body),
    };

    let located: Vec<String> = match ErrorPayload::classify(body) {
        ErrorPayload::Fields(_) => {
            // A single-resource payload behaves as a one-item bulk.
            if let Some(i) = item.filter(|i| *i != 1) {
                return Err(AssertionFailure::ItemOutOfRange { item: i, len: 1 });
            }
            let value = get_by_json_path(body, field).ok_or_else(not_found)?;
            collect_messages(value)
        }
        ErrorPayload::Bulk(items) => {
            let selected: Vec<&Value> = match item {
                Some(i) => {
                    let chosen = i
                        .checked_sub(1)
                        .and_then(|idx| items.get(idx))
                        .ok_or(AssertionFailure::ItemOutOfRange {
                            item: i,
                            len: items.len(),
                        })?;
                    vec![chosen]
                }
                None => items.iter().collect(),
            };
            let fields: Vec<&Value> = selected
                .into_iter()
                .filter_map(|entry| get_by_json_path(entry, field))
                .collect();
            if fields.is_empty() {
                return Err(not_found());
            }
            fields.into_iter().flat_map(collect_messages).collect()
        }
        ErrorPayload::Detail(detail) if field == "detail" => vec![detail.to_string()],
        ErrorPayload::Messages(list) if field == "non_field_errors" => {
            list.iter().flat_map(collect_messages).collect()
        }
        _ => return Err(not_found()),
    };

    match_located(field, expected, located)
}

fn error_message(body: &Value, expected: &str) -> Result<(), AssertionFailure> {
    let not_found = || AssertionFailure::AlertNotFound {
        field: MESSAGE_FIELDS.join("|"),
        payload: preview(body),
    };

    let flat_message = |entry: &Value| -> Option<Vec<String>> {
        MESSAGE_FIELDS
            .iter()
            .find_map(|name| entry.get(*name))
            .map(collect_messages)
    };

    let located: Vec<String> = match ErrorPayload::classify(body) {
        ErrorPayload::Detail(detail) => vec![detail.to_string()],
        ErrorPayload::Messages(list) => list.iter().flat_map(collect_messages).collect(),
        ErrorPayload::Fields(_) => flat_message(body).ok_or_else(not_found)?,
        ErrorPayload::Bulk(items) => {
            let found: Vec<Vec<String>> = items.iter().filter_map(flat_message).collect();
            if found.is_empty() {
                return Err(not_found());
            }
            found.into_iter().flatten().collect()
        }
        ErrorPayload::Other(_) => return Err(not_found()),
    };

    match_located(&MESSAGE_FIELDS.join("|"), expected, located)
}

fn match_located(field: &str, expected: &str, located: Vec<String>) -> Result<(), AssertionFailure> {
    if located.iter().any(|m| m.contains(expected)) {
        Ok(())
    } else {
        Err(AssertionFailure::AlertMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            located,
        })
    }
}

/// Flatten every message below `value`.
fn collect_messages(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(collect_messages).collect(),
        Value::Object(map) => map.values().flat_map(collect_messages).collect(),
        other => vec![other.to_string()],
    }
}

fn preview(body: &Value) -> String {
    let text = body.to_string();
    if text.chars().count() > BODY_PREVIEW_CHARS {
        let truncated: String = text.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{truncated}...(truncated)")
    } else {
        text
    }
}
