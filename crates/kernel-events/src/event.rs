//! The event vocabulary a receiver consumes.

use serde::{Deserialize, Serialize};

use crate::mime::MimeBundle;

/// Which output stream a `Stream` event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamName::Stdout => write!(f, "stdout"),
            StreamName::Stderr => write!(f, "stderr"),
        }
    }
}

impl std::str::FromStr for StreamName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(StreamName::Stdout),
            "stderr" => Ok(StreamName::Stderr),
            _ => Err(format!("Unknown stream name: {}", s)),
        }
    }
}

/// One event in an execution's result stream, in transport order.
///
/// A well-behaved transport ends every stream with exactly one of
/// `StatusOk`, `StatusError` or `StatusCancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelResultEvent {
    Stream {
        name: StreamName,
        text: String,
    },
    ExecuteResult {
        data: MimeBundle,
    },
    DisplayData {
        data: MimeBundle,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    StatusBusy,
    StatusIdle,
    StatusOk,
    StatusError,
    StatusCancelled,
    ExecutionCountNotice {
        count: usize,
    },
    /// A message the conversion layer had no mapping for.
    Unrecognized {
        kind: String,
    },
}

impl KernelResultEvent {
    pub fn stdout(text: impl Into<String>) -> Self {
        KernelResultEvent::Stream {
            name: StreamName::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        KernelResultEvent::Stream {
            name: StreamName::Stderr,
            text: text.into(),
        }
    }

    /// `StatusOk`, `StatusError` or `StatusCancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KernelResultEvent::StatusOk
                | KernelResultEvent::StatusError
                | KernelResultEvent::StatusCancelled
        )
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &str {
        match self {
            KernelResultEvent::Stream { .. } => "stream",
            KernelResultEvent::ExecuteResult { .. } => "execute_result",
            KernelResultEvent::DisplayData { .. } => "display_data",
            KernelResultEvent::Error { .. } => "error",
            KernelResultEvent::StatusBusy => "status_busy",
            KernelResultEvent::StatusIdle => "status_idle",
            KernelResultEvent::StatusOk => "status_ok",
            KernelResultEvent::StatusError => "status_error",
            KernelResultEvent::StatusCancelled => "status_cancelled",
            KernelResultEvent::ExecutionCountNotice { .. } => "execution_count",
            KernelResultEvent::Unrecognized { kind } => kind,
        }
    }
}
