use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use pagecraft_core::types::{PipelineEvent, RunId};

/// JSONL run logger.
///
/// Consumes pipeline events for one run and writes structured log entries as
/// JSONL (one JSON object per line). Each line is flushed as it is written,
/// so a crashed run still leaves every earlier line intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// Logs go to `{log_dir}/{run_id}/{timestamp}.jsonl`.
    /// `level` controls verbosity: 1=run summary, 2=per node, 3=per attempt.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Run the logger as a background task.
    ///
    /// Subscribe `rx` before starting the run so no early event is missed.
    /// Events of other runs are ignored. Stops at this run's `RunFinished`,
    /// on cancellation, or when the bus closes. Returns the log file path.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<PipelineEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");

        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event_run_id(&event) != &run_id {
                                continue;
                            }
                            let finished = matches!(event, PipelineEvent::RunFinished { .. });

                            if let Some(entry) = self.event_to_entry(&event) {
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    let line = format!("{}\n", json);
                                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                            }

                            if finished {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }

    /// Convert an event to a log entry (None if filtered by level).
    fn event_to_entry(&self, event: &PipelineEvent) -> Option<LogEntry> {
        let entry = |event_type: &str, node: Option<&str>, detail: Option<serde_json::Value>| {
            Some(LogEntry {
                timestamp: Utc::now().to_rfc3339(),
                run_id: event_run_id(event).0.clone(),
                event_type: event_type.to_string(),
                node: node.map(str::to_string),
                detail,
            })
        };

        match event {
            // L1: run summary and loop control
            PipelineEvent::RunStarted { entry: first, .. } => {
                entry("run_started", None, Some(serde_json::json!({ "entry": first })))
            }
            PipelineEvent::BackEdge {
                from,
                to,
                loop_count,
                ..
            } => entry(
                "back_edge",
                Some(from.as_str()),
                Some(serde_json::json!({ "to": to, "loop_count": loop_count })),
            ),
            PipelineEvent::RunFinished {
                outcome,
                loop_count,
                error_count,
                ..
            } => entry(
                "run_finished",
                None,
                Some(serde_json::json!({
                    "outcome": outcome,
                    "loop_count": loop_count,
                    "error_count": error_count,
                })),
            ),

            // L2: per node
            PipelineEvent::NodeFinished {
                node,
                signal,
                elapsed_ms,
                ..
            } if self.level >= 2 => entry(
                "node_finished",
                Some(node.as_str()),
                Some(serde_json::json!({ "signal": signal, "elapsed_ms": elapsed_ms })),
            ),

            // L3: per attempt
            PipelineEvent::NodeStarted {
                node, loop_count, ..
            } if self.level >= 3 => entry(
                "node_started",
                Some(node.as_str()),
                Some(serde_json::json!({ "loop_count": loop_count })),
            ),
            PipelineEvent::AttemptFailed {
                node,
                attempt,
                kind,
                message,
                ..
            } if self.level >= 3 => entry(
                "attempt_failed",
                Some(node.as_str()),
                Some(serde_json::json!({
                    "attempt": attempt,
                    "kind": kind,
                    "message": truncate_str(message, 500),
                })),
            ),

            _ => None,
        }
    }
}

fn event_run_id(event: &PipelineEvent) -> &RunId {
    match event {
        PipelineEvent::RunStarted { run_id, .. }
        | PipelineEvent::NodeStarted { run_id, .. }
        | PipelineEvent::AttemptFailed { run_id, .. }
        | PipelineEvent::NodeFinished { run_id, .. }
        | PipelineEvent::BackEdge { run_id, .. }
        | PipelineEvent::RunFinished { run_id, .. } => run_id,
    }
}

/// Truncate a string for logging, on a char boundary.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
