use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

/// One line of the output protocol, minus its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Progress {
        step: String,
        percent: Number,
    },
    Error {
        error: String,
        code: String,
    },
    Complete {
        file_path: String,
        metadata: Map<String, Value>,
        percent: u8,
    },
}

impl Message {
    pub fn progress(step: impl Into<String>, percent: impl Into<Number>) -> Self {
        Message::Progress {
            step: step.into(),
            percent: percent.into(),
        }
    }
}

#[derive(Serialize)]
struct Line<'a> {
    #[serde(flatten)]
    message: &'a Message,
    timestamp: u64,
}

/// Writes protocol lines, one JSON object per line, flushing after each.
pub struct Emitter<W: Write> {
    out: W,
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn progress(&mut self, step: &str, percent: impl Into<Number>) {
        self.emit(&Message::progress(step, percent));
    }

    pub fn emit(&mut self, message: &Message) {
        let line = Line {
            message,
            timestamp: now_millis(),
        };

        // Nowhere left to report a broken stdout, so it only goes to the log.
        if let Err(err) = self.write_line(&line) {
            log::warn!("Failed to write {:?} message: {err}", message);
        }
    }

    fn write_line(&mut self, line: &Line<'_>) -> std::io::Result<()> {
        let mut buf = serde_json::to_vec(line)?;
        buf.push(b'\n');
        self.out.write_all(&buf)?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn parse_lines(buf: &[u8]) -> Vec<Value> {
    std::str::from_utf8(buf)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
