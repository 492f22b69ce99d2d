use reqwest::header::ACCEPT;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::time::Duration;

use crate::completion::{Completion, DEFAULT_FORMAT};
use crate::config::GenerationConfig;
use crate::error::{ErrorCode, RelayError};
use crate::progress::Emitter;
use crate::response;

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8123";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    conversation: &'a Value,
    config: &'a Value,
    format: &'a str,
    streaming: bool,
}

/// Picks the service URL: command line, then environment, then the job's own
/// `service_url`, then the local default. Empty values are skipped.
pub fn resolve_service_url(
    cli: Option<&str>,
    environment: Option<&str>,
    params: Option<&str>,
) -> String {
    [cli, environment, params]
        .into_iter()
        .flatten()
        .find(|url| !url.is_empty())
        .unwrap_or(DEFAULT_SERVICE_URL)
        .to_owned()
}

fn generate_endpoint(base_url: &str) -> String {
    format!("{}/api/generate", base_url.trim_end_matches('/'))
}

/// A single-use connection to a Podcastfy service.
pub struct ServiceRelay {
    client: reqwest::Client,
    api_url: String,
}

impl ServiceRelay {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|err| {
                RelayError::new(
                    ErrorCode::UnexpectedError,
                    format!("Failed to build HTTP client: {err}"),
                )
            })?;

        let api_url = generate_endpoint(base_url);
        log::debug!("Relaying to {api_url} with a {timeout:?} timeout");

        Ok(Self { client, api_url })
    }

    pub async fn generate<W: Write>(
        &self,
        config: &GenerationConfig,
        emitter: &mut Emitter<W>,
    ) -> Result<Completion, RelayError> {
        emitter.progress("initializing", 0);

        let request = GenerateRequest {
            conversation: &config.conversation,
            config: &config.params,
            format: DEFAULT_FORMAT,
            streaming: true,
        };

        emitter.progress("connecting", 10);

        let response = self
            .client
            .post(&self.api_url)
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_else(|err| {
                log::debug!("Failed to read {status} error body: {err}");
                String::new()
            });
            return Err(RelayError::new(
                ErrorCode::HttpError,
                format!(
                    "HTTP error from Podcastfy service: {} - {body}",
                    status.as_u16()
                ),
            ));
        }

        emitter.progress("processing", 25);

        response::interpret(response, emitter).await
    }

    fn transport_error(&self, err: reqwest::Error) -> RelayError {
        log::debug!("Request to {} failed: {err:?}", self.api_url);

        if err.is_connect() {
            RelayError::new(
                ErrorCode::ConnectionError,
                format!(
                    "Failed to connect to Podcastfy service at {}. Is the service running?",
                    self.api_url
                ),
            )
        } else if err.is_timeout() {
            RelayError::new(
                ErrorCode::TimeoutError,
                "Request to Podcastfy service timed out",
            )
        } else {
            RelayError::new(
                ErrorCode::UnexpectedError,
                format!("Unexpected error during podcast generation: {err}"),
            )
        }
    }
}
