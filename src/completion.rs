use serde_json::{Map, Value};

use crate::error::{ErrorCode, RelayError};
use crate::progress::Message;

/// Keys the service may use for the generated file, highest priority first.
const FILE_PATH_KEYS: [&str; 3] = ["file_path", "audio_file", "output"];

pub const DEFAULT_FORMAT: &str = "m4a";

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub file_path: String,
    pub metadata: Map<String, Value>,
}

impl From<Completion> for Message {
    fn from(completion: Completion) -> Self {
        Message::Complete {
            file_path: completion.file_path,
            metadata: completion.metadata,
            percent: 100,
        }
    }
}

/// Turns the service's final result object into a [`Completion`], filling in
/// the metadata fields consumers rely on.
pub fn complete(result: &Value) -> Result<Completion, RelayError> {
    let result = result.as_object().ok_or_else(|| {
        RelayError::new(
            ErrorCode::CompletionError,
            format!("Error handling completion: expected a JSON object, got `{result}`"),
        )
    })?;

    let file_path = FILE_PATH_KEYS
        .iter()
        .filter_map(|key| result.get(*key))
        .filter_map(Value::as_str)
        .find(|path| !path.is_empty())
        .ok_or_else(|| {
            RelayError::new(
                ErrorCode::MissingFilePath,
                "No file path in completion response",
            )
        })?;

    let mut metadata = match result.get("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(metadata)) => metadata.clone(),
        Some(other) => {
            return Err(RelayError::new(
                ErrorCode::CompletionError,
                format!("Error handling completion: metadata is not an object: `{other}`"),
            ));
        }
    };

    if !metadata.get("duration").is_some_and(is_truthy) {
        let duration = result
            .get("duration")
            .filter(|duration| !duration.is_null())
            .cloned()
            .unwrap_or_else(|| Value::from(0));
        metadata.insert("duration".to_owned(), duration);
    }

    if !metadata.get("format").is_some_and(is_truthy) {
        metadata.insert("format".to_owned(), Value::from(DEFAULT_FORMAT));
    }

    Ok(Completion {
        file_path: file_path.to_owned(),
        metadata,
    })
}

/// Whether a value counts as "set": not null, false, zero or empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
