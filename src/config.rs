use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::Path;

use crate::completion::is_truthy;
use crate::error::{ErrorCode, RelayError};

/// The job description handed to the relay: what to say, and how to render
/// it. Both halves are passed to the service untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub conversation: Value,
    #[serde(default)]
    pub params: Value,
}

impl GenerationConfig {
    pub async fn load(path: &Path) -> Result<Self, RelayError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                RelayError::new(
                    ErrorCode::ConfigNotFound,
                    format!("Configuration file not found: {}", path.display()),
                )
            } else {
                RelayError::new(
                    ErrorCode::GeneralError,
                    format!("Failed to read configuration file {}: {err}", path.display()),
                )
            }
        })?;

        let invalid = || {
            RelayError::new(
                ErrorCode::InvalidConfig,
                format!("Invalid JSON in configuration file: {}", path.display()),
            )
        };

        // Derived struct deserialization also accepts a sequence, so the
        // object shape is checked on the raw value first.
        let raw: Value = serde_json::from_str(&contents).map_err(|err| {
            log::debug!("Config parse failure: {err}");
            invalid()
        })?;
        if !raw.is_object() {
            log::debug!("Config is not a JSON object: {raw}");
            return Err(invalid());
        }
        let mut config: Self = serde_json::from_value(raw).map_err(|err| {
            log::debug!("Config shape failure: {err}");
            invalid()
        })?;

        if !is_truthy(&config.conversation) {
            return Err(RelayError::new(
                ErrorCode::MissingConversation,
                "No conversation data in configuration",
            ));
        }

        if config.params.is_null() {
            config.params = Value::Object(Map::new());
        }

        Ok(config)
    }

    /// The `service_url` generation parameter, if one is set.
    pub fn service_url(&self) -> Option<&str> {
        self.params
            .get("service_url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }
}
