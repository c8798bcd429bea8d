//! kernel-events - Result events streamed back from a kernel execution.
//!
//! The transport layer speaks Jupyter messages; recordings and notebook files
//! speak nbformat output dicts. Both are mapped here onto one tagged
//! [`KernelResultEvent`] so the receiver has a single exhaustive match.

mod ansi;
mod base64;
pub mod convert;
pub mod event;
pub mod mime;

pub use crate::ansi::strip_ansi;
pub use crate::base64::{decode_payload, encode_payload};
pub use convert::{from_message_content, from_nbformat_output, from_record, parse_record_line};
pub use event::{KernelResultEvent, StreamName};
pub use mime::MimeBundle;

/// Errors raised while converting recorded or wire data into events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("MIME bundle must be a JSON object, got {0}")]
    InvalidBundle(String),

    #[error("{record} record is missing `{field}`")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("Unknown output type: {0}")]
    UnknownOutputType(String),

    #[error("Unknown stream name: {0}")]
    UnknownStream(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unrecognized record: {0}")]
    UnknownRecord(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] ::base64::DecodeError),

    #[error("Empty binary payload")]
    EmptyPayload,
}
