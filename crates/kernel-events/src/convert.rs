//! Conversion from Jupyter wire messages and nbformat output records.

use jupyter_protocol::{ExecutionState, JupyterMessageContent, Media, MediaType, ReplyStatus, Stdio};
use log::{debug, warn};
use serde_json::Value;

use crate::event::{KernelResultEvent, StreamName};
use crate::mime::{MimeBundle, TEXT_PLAIN};
use crate::EventError;

/// Map one Jupyter message to a result event.
///
/// Messages with no counterpart become `Unrecognized` so the receiver can log
/// and drop them.
pub fn from_message_content(content: &JupyterMessageContent) -> KernelResultEvent {
    match content {
        JupyterMessageContent::StreamContent(stream) => KernelResultEvent::Stream {
            name: match stream.name {
                Stdio::Stdout => StreamName::Stdout,
                Stdio::Stderr => StreamName::Stderr,
            },
            text: stream.text.clone(),
        },
        JupyterMessageContent::ExecuteResult(result) => KernelResultEvent::ExecuteResult {
            data: media_bundle(&result.data),
        },
        JupyterMessageContent::DisplayData(display) => KernelResultEvent::DisplayData {
            data: media_bundle(&display.data),
        },
        JupyterMessageContent::ErrorOutput(error) => KernelResultEvent::Error {
            ename: error.ename.clone(),
            evalue: error.evalue.clone(),
            traceback: error.traceback.clone(),
        },
        JupyterMessageContent::Status(status) => match status.execution_state {
            ExecutionState::Busy => KernelResultEvent::StatusBusy,
            ExecutionState::Idle => KernelResultEvent::StatusIdle,
            _ => KernelResultEvent::Unrecognized {
                kind: "status".to_string(),
            },
        },
        JupyterMessageContent::ExecuteInput(input) => KernelResultEvent::ExecutionCountNotice {
            count: input.execution_count.0 as usize,
        },
        JupyterMessageContent::ExecuteReply(reply) => match reply.status {
            ReplyStatus::Ok => KernelResultEvent::StatusOk,
            ReplyStatus::Error => KernelResultEvent::StatusError,
            _ => KernelResultEvent::StatusCancelled,
        },
        other => {
            debug!("[events] No result mapping for {}", other.message_type());
            KernelResultEvent::Unrecognized {
                kind: other.message_type().to_string(),
            }
        }
    }
}

/// Normalize a `jupyter_protocol` media bundle.
fn media_bundle(media: &Media) -> MimeBundle {
    let normalized = serde_json::to_value(media)
        .map_err(EventError::from)
        .and_then(|value| MimeBundle::from_json(&value));
    match normalized {
        Ok(bundle) => bundle,
        Err(e) => {
            warn!("[events] Falling back to text/plain for media bundle: {}", e);
            let plain = media.content.iter().find_map(|m| match m {
                MediaType::Plain(text) => Some(text.clone()),
                _ => None,
            });
            match plain {
                Some(text) => MimeBundle::new().with(TEXT_PLAIN, text),
                None => MimeBundle::new(),
            }
        }
    }
}

/// Map an nbformat output dict (`{"output_type": ...}`) to a result event.
pub fn from_nbformat_output(output: &Value) -> Result<KernelResultEvent, EventError> {
    let output_type = output
        .get("output_type")
        .and_then(Value::as_str)
        .ok_or(EventError::MissingField {
            record: "output",
            field: "output_type",
        })?;

    match output_type {
        "stream" => {
            let name = required_str(output, "stream", "name")?;
            let name = name
                .parse::<StreamName>()
                .map_err(|_| EventError::UnknownStream(name.to_string()))?;
            let text = output.get("text").map(crate::mime::flatten_payload).ok_or(
                EventError::MissingField {
                    record: "stream",
                    field: "text",
                },
            )?;
            Ok(KernelResultEvent::Stream { name, text })
        }
        "execute_result" => Ok(KernelResultEvent::ExecuteResult {
            data: bundle_field(output, "execute_result")?,
        }),
        "display_data" => Ok(KernelResultEvent::DisplayData {
            data: bundle_field(output, "display_data")?,
        }),
        "error" => {
            let traceback = match output.get("traceback") {
                Some(Value::Array(lines)) => lines
                    .iter()
                    .map(|line| line.as_str().map(str::to_string).unwrap_or_else(|| line.to_string()))
                    .collect(),
                Some(Value::String(line)) => vec![line.clone()],
                _ => Vec::new(),
            };
            Ok(KernelResultEvent::Error {
                ename: required_str(output, "error", "ename")?.to_string(),
                evalue: output
                    .get("evalue")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                traceback,
            })
        }
        other => Err(EventError::UnknownOutputType(other.to_string())),
    }
}

/// Map a recorded event: an nbformat output dict, a `{"status": ...}` or
/// `{"stream": "status", "data": ...}` record, or an
/// `{"execution_count": n}` record.
pub fn from_record(record: &Value) -> Result<KernelResultEvent, EventError> {
    if record.get("output_type").is_some() {
        return from_nbformat_output(record);
    }
    let status = record.get("status").and_then(Value::as_str).or_else(|| {
        match record.get("stream").and_then(Value::as_str) {
            Some("status") => record.get("data").and_then(Value::as_str),
            _ => None,
        }
    });
    if let Some(status) = status {
        return match status {
            "busy" => Ok(KernelResultEvent::StatusBusy),
            "idle" => Ok(KernelResultEvent::StatusIdle),
            "ok" => Ok(KernelResultEvent::StatusOk),
            "error" => Ok(KernelResultEvent::StatusError),
            "cancelled" | "aborted" => Ok(KernelResultEvent::StatusCancelled),
            other => Err(EventError::UnknownStatus(other.to_string())),
        };
    }
    if let Some(count) = record.get("execution_count").and_then(Value::as_u64) {
        return Ok(KernelResultEvent::ExecutionCountNotice {
            count: count as usize,
        });
    }
    Err(EventError::UnknownRecord(record.to_string()))
}

/// Parse one JSON line of a recording.
pub fn parse_record_line(line: &str) -> Result<KernelResultEvent, EventError> {
    let value: Value = serde_json::from_str(line)?;
    from_record(&value)
}

fn required_str<'v>(
    output: &'v Value,
    record: &'static str,
    field: &'static str,
) -> Result<&'v str, EventError> {
    output
        .get(field)
        .and_then(Value::as_str)
        .ok_or(EventError::MissingField { record, field })
}

fn bundle_field(output: &Value, record: &'static str) -> Result<MimeBundle, EventError> {
    let data = output
        .get("data")
        .ok_or(EventError::MissingField { record, field: "data" })?;
    MimeBundle::from_json(data)
}
