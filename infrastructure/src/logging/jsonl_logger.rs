//! Append-only JSONL sink for conversation telemetry.
//!
//! One line per pipeline event (`guardrail_verdict`, `query_reformulated`,
//! `context_retrieved`, `answer_completed`, `generation_failed`), each a
//! self-contained JSON object stamped with the event `type` and an RFC 3339
//! `timestamp`, so the file can be tailed or replayed without a schema.

use ragline_application::ports::conversation_logger::{ConversationEvent, ConversationLogger};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Writes conversation events to a JSONL file, one object per line.
///
/// Logging is best-effort: a sink that cannot be opened is reported once at
/// startup and the pipeline runs without one, and write errors never reach
/// the caller. Each line is flushed as it is written so a crash loses at
/// most the event in flight.
pub struct JsonlConversationLogger {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlConversationLogger {
    /// Open (truncating) the log file at `path`, creating missing parent
    /// directories. Returns `None` when the file cannot be opened.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(
                path = %parent.display(),
                error = %e,
                "could not create conversation log directory"
            );
            return None;
        }

        match File::create(path) {
            Ok(file) => Some(Self {
                writer: Mutex::new(BufWriter::new(file)),
                path: path.to_path_buf(),
            }),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "could not create conversation log file"
                );
                None
            }
        }
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fold the event into a single flat JSON object.
    ///
    /// Object payloads get `type` and `timestamp` injected alongside their
    /// own keys; anything else is wrapped under a `data` key.
    fn record(event: ConversationEvent) -> serde_json::Value {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        match event.payload {
            serde_json::Value::Object(mut fields) => {
                fields.insert("type".into(), event.event_type.into());
                fields.insert("timestamp".into(), timestamp.into());
                serde_json::Value::Object(fields)
            }
            other => serde_json::json!({
                "type": event.event_type,
                "timestamp": timestamp,
                "data": other,
            }),
        }
    }
}

impl ConversationLogger for JsonlConversationLogger {
    fn log(&self, event: ConversationEvent) {
        let Ok(line) = serde_json::to_string(&Self::record(event)) else {
            return;
        };

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
            let _ = writer.flush();
        }
    }
}

impl Drop for JsonlConversationLogger {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
