use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use serde_json::{Number, Value};
use std::fmt::Display;
use std::io::Write;
use std::time::Duration;

use crate::completion::{Completion, complete};
use crate::error::{ErrorCode, RelayError};
use crate::progress::Emitter;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Streamed progress never reaches 100; that value belongs to the completion line.
const STREAMED_PERCENT_CAP: u8 = 95;
const DEFAULT_STREAMED_PERCENT: u8 = 50;

/// Progress shown for a plain JSON response, which has none of its own.
const SYNTHETIC_CHECKPOINTS: [(&str, u8); 3] =
    [("processing", 50), ("generating", 75), ("finalizing", 95)];
const SYNTHETIC_PACING: Duration = Duration::from_millis(100);

pub async fn interpret<W: Write>(
    response: reqwest::Response,
    emitter: &mut Emitter<W>,
) -> Result<Completion, RelayError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    log::debug!("Service responded with content type `{content_type}`");

    if is_ndjson(&content_type) {
        interpret_stream(response.bytes_stream(), emitter).await
    } else {
        let body = response.text().await.map_err(|err| {
            RelayError::new(
                ErrorCode::ResponseError,
                format!("Error processing JSON response: {err}"),
            )
        })?;
        interpret_body(&body, emitter).await
    }
}

fn is_ndjson(content_type: &str) -> bool {
    content_type.starts_with(NDJSON_CONTENT_TYPE)
}

/// Relays an NDJSON update stream until the service reports completion or
/// failure.
pub async fn interpret_stream<S, B, E, W>(
    stream: S,
    emitter: &mut Emitter<W>,
) -> Result<Completion, RelayError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    W: Write,
{
    let mut stream = std::pin::pin!(stream);
    let mut lines = LineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| {
            RelayError::new(
                ErrorCode::StreamingError,
                format!("Error processing streaming response: {err}"),
            )
        })?;

        for line in lines.push(chunk.as_ref()) {
            if let Some(outcome) = handle_update(&line, emitter) {
                return outcome;
            }
        }
    }

    if let Some(line) = lines.finish() {
        if let Some(outcome) = handle_update(&line, emitter) {
            return outcome;
        }
    }

    Err(RelayError::new(
        ErrorCode::IncompleteResponse,
        "Streaming response ended without completion",
    ))
}

/// Handles one NDJSON line. `None` means keep reading.
fn handle_update<W: Write>(
    line: &[u8],
    emitter: &mut Emitter<W>,
) -> Option<Result<Completion, RelayError>> {
    if line.trim_ascii().is_empty() {
        return None;
    }

    let update = match serde_json::from_slice::<Value>(line) {
        Ok(update @ Value::Object(_)) => update,
        _ => {
            log::debug!(
                "Skipping malformed stream line: {}",
                String::from_utf8_lossy(line)
            );
            return None;
        }
    };

    match update.get("type").and_then(Value::as_str) {
        Some("progress") => {
            let step = update
                .get("step")
                .and_then(Value::as_str)
                .unwrap_or("processing");
            emitter.progress(step, capped_percent(update.get("percent")));
            None
        }
        Some("complete") => {
            emitter.progress("finalizing", STREAMED_PERCENT_CAP);
            Some(complete(&update))
        }
        Some("error") => {
            let message = update
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error from Podcastfy service");
            let code = update
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("PODCASTFY_ERROR");
            Some(Err(RelayError::upstream(code, message)))
        }
        other => {
            log::debug!("Ignoring stream update of type {other:?}");
            None
        }
    }
}

fn capped_percent(percent: Option<&Value>) -> Number {
    match percent {
        Some(Value::Number(percent))
            if percent
                .as_f64()
                .is_some_and(|value| value <= f64::from(STREAMED_PERCENT_CAP)) =>
        {
            percent.clone()
        }
        Some(Value::Number(_)) => Number::from(STREAMED_PERCENT_CAP),
        _ => Number::from(DEFAULT_STREAMED_PERCENT),
    }
}

/// Handles a single JSON document response.
pub async fn interpret_body<W: Write>(
    body: &str,
    emitter: &mut Emitter<W>,
) -> Result<Completion, RelayError> {
    let result: Value = serde_json::from_str(body).map_err(|err| {
        log::debug!("Unparseable response body ({err}): {body}");
        RelayError::new(
            ErrorCode::InvalidResponse,
            "Invalid JSON response from Podcastfy service",
        )
    })?;

    for (index, (step, percent)) in SYNTHETIC_CHECKPOINTS.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(SYNTHETIC_PACING).await;
        }
        emitter.progress(step, *percent);
    }

    complete(&result)
}

/// Splits a byte stream into lines, carrying partial lines across chunks.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever followed the last newline.
    fn finish(self) -> Option<Vec<u8>> {
        (!self.pending.is_empty()).then_some(self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::parse_lines;
    use futures_util::stream;
    use serde_json::json;
    use std::io;

    async fn relay_chunks(chunks: &[&str]) -> (Result<Completion, RelayError>, Vec<Value>) {
        let chunks: Vec<io::Result<&[u8]>> = chunks.iter().map(|c| Ok(c.as_bytes())).collect();
        let mut emitter = Emitter::new(Vec::new());
        let outcome = interpret_stream(stream::iter(chunks), &mut emitter).await;
        (outcome, parse_lines(&emitter.into_inner()))
    }

    fn steps(lines: &[Value]) -> Vec<(String, Value)> {
        lines
            .iter()
            .map(|line| {
                assert_eq!(line["type"], "progress");
                (line["step"].as_str().unwrap().to_owned(), line["percent"].clone())
            })
            .collect()
    }

    #[tokio::test]
    async fn forwards_progress_and_completes() {
        let (outcome, lines) = relay_chunks(&[
            "{\"type\":\"progress\",\"step\":\"writing script\",\"percent\":30}\n",
            "{\"type\":\"progress\",\"step\":\"synthesizing\",\"percent\":99.5}\n",
            "{\"type\":\"complete\",\"file_path\":\"/data/ep1.m4a\",\"metadata\":{\"duration\":312}}\n",
        ])
        .await;

        let completion = outcome.unwrap();
        assert_eq!(completion.file_path, "/data/ep1.m4a");
        assert_eq!(completion.metadata["duration"], 312);
        assert_eq!(completion.metadata["format"], "m4a");
        assert_eq!(
            steps(&lines),
            vec![
                ("writing script".to_owned(), json!(30)),
                ("synthesizing".to_owned(), json!(95)),
                ("finalizing".to_owned(), json!(95)),
            ]
        );
    }

    #[tokio::test]
    async fn progress_defaults_fill_missing_fields() {
        let (outcome, lines) = relay_chunks(&[
            "{\"type\":\"progress\"}\n",
            "{\"type\":\"complete\",\"output\":\"/x.m4a\"}\n",
        ])
        .await;

        assert!(outcome.is_ok());
        assert_eq!(steps(&lines)[0], ("processing".to_owned(), json!(50)));
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let (outcome, lines) = relay_chunks(&[
            "{\"type\":\"prog",
            "ress\",\"percent\":40}\r\n{\"type\":\"comp",
            "lete\",\"audio_file\":\"/a.m4a\"}",
        ])
        .await;

        assert_eq!(outcome.unwrap().file_path, "/a.m4a");
        assert_eq!(steps(&lines)[0].1, json!(40));
    }

    #[tokio::test]
    async fn malformed_and_unknown_lines_are_skipped() {
        let (outcome, lines) = relay_chunks(&[
            "not json at all\n\n",
            "[1,2,3]\n",
            "{\"type\":\"heartbeat\"}\n",
            "{\"type\":\"complete\",\"file_path\":\"/a.m4a\"}\n",
        ])
        .await;

        assert!(outcome.is_ok());
        assert_eq!(steps(&lines), vec![("finalizing".to_owned(), json!(95))]);
    }

    #[tokio::test]
    async fn upstream_errors_are_forwarded_verbatim() {
        let (outcome, _) = relay_chunks(&[
            "{\"type\":\"error\",\"message\":\"voice not found\",\"code\":\"TTS_VOICE\"}\n",
            "{\"type\":\"complete\",\"file_path\":\"/never.m4a\"}\n",
        ])
        .await;

        let err = outcome.unwrap_err();
        assert_eq!(err.code, "TTS_VOICE");
        assert_eq!(err.message, "voice not found");

        let (outcome, _) = relay_chunks(&["{\"type\":\"error\"}\n"]).await;
        let err = outcome.unwrap_err();
        assert_eq!(err.code, "PODCASTFY_ERROR");
        assert_eq!(err.message, "Unknown error from Podcastfy service");
    }

    #[tokio::test]
    async fn stream_without_terminal_update_is_incomplete() {
        let (outcome, lines) =
            relay_chunks(&["{\"type\":\"progress\",\"percent\":80}\n"]).await;

        assert!(outcome.unwrap_err().is(ErrorCode::IncompleteResponse));
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn completion_without_path_fails_after_finalizing() {
        let (outcome, lines) = relay_chunks(&["{\"type\":\"complete\"}\n"]).await;

        assert!(outcome.unwrap_err().is(ErrorCode::MissingFilePath));
        assert_eq!(steps(&lines), vec![("finalizing".to_owned(), json!(95))]);
    }

    #[tokio::test]
    async fn transport_failure_mid_stream_is_a_streaming_error() {
        let chunks: Vec<io::Result<&[u8]>> = vec![
            Ok(b"{\"type\":\"progress\",\"percent\":20}\n".as_slice()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
        ];
        let mut emitter = Emitter::new(Vec::new());

        let err = interpret_stream(stream::iter(chunks), &mut emitter)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::StreamingError));
        assert!(err.message.contains("reset by peer"));
    }

    #[tokio::test]
    async fn plain_body_gets_synthetic_checkpoints() {
        let mut emitter = Emitter::new(Vec::new());

        let completion = interpret_body(r#"{"file_path": "/out.m4a"}"#, &mut emitter)
            .await
            .unwrap();
        assert_eq!(completion.file_path, "/out.m4a");

        let lines = parse_lines(&emitter.into_inner());
        assert_eq!(
            steps(&lines),
            vec![
                ("processing".to_owned(), json!(50)),
                ("generating".to_owned(), json!(75)),
                ("finalizing".to_owned(), json!(95)),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_body_fails_before_any_progress() {
        let mut emitter = Emitter::new(Vec::new());

        let err = interpret_body("<html>502</html>", &mut emitter)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::InvalidResponse));
        assert!(emitter.into_inner().is_empty());
    }

    #[tokio::test]
    async fn plain_body_without_path_is_missing_file_path() {
        let mut emitter = Emitter::new(Vec::new());

        let err = interpret_body(r#"{"status": "ok"}"#, &mut emitter)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::MissingFilePath));
    }

    #[test]
    fn recognizes_ndjson_content_types() {
        assert!(is_ndjson("application/x-ndjson"));
        assert!(is_ndjson("application/x-ndjson; charset=utf-8"));
        assert!(!is_ndjson("application/json"));
        assert!(!is_ndjson(""));
    }

    #[test]
    fn percent_cap() {
        assert_eq!(capped_percent(Some(&json!(12))), Number::from(12));
        assert_eq!(capped_percent(Some(&json!(95))), Number::from(95));
        assert_eq!(capped_percent(Some(&json!(100))), Number::from(95));
        assert_eq!(capped_percent(Some(&json!("80"))), Number::from(50));
        assert_eq!(capped_percent(None), Number::from(50));
    }
}
