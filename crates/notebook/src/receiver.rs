//! One execution's result lifecycle.
//!
//! A receiver starts `Pending`, renders events as they arrive, and settles
//! exactly once when a terminal status (or a cancellation) arrives. Events
//! after that are dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chunk_text::Range;
use kernel_events::{KernelResultEvent, StreamName};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::marker::MarkerId;
use crate::render::{
    render_bundle, traceback_text, OutputNode, OutputRenderer, RenderTree, TreeChange,
    CANCELLED_NOTICE,
};

pub type RequestId = Uuid;

/// How a run was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Render into a side pane instead of inline.
    #[serde(default)]
    pub inpane: bool,
    /// Who asked for the run (a command name, an extension id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// An immutable run invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRequest {
    pub id: RequestId,
    pub options: RunOptions,
    pub range: Range,
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(range: Range, code: impl Into<String>, options: RunOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            range,
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverState {
    Pending,
    Ok,
    Error,
    Cancelled,
}

impl ReceiverState {
    pub fn is_terminal(self) -> bool {
        self != ReceiverState::Pending
    }
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverState::Pending => write!(f, "pending"),
            ReceiverState::Ok => write!(f, "ok"),
            ReceiverState::Error => write!(f, "error"),
            ReceiverState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why an execution's completion was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{ename}: {evalue}")]
    Kernel { ename: String, evalue: String },

    #[error("Kernel reported an error status")]
    KernelStatus,

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Kernel transport failed: {0}")]
    Transport(String),

    #[error("Execution was dropped before it settled")]
    Dropped,
}

pub type Completion = oneshot::Receiver<Result<(), ExecutionError>>;

/// Updates from receivers to the document aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentNotification {
    /// The node at `index` of the request's output was added or changed.
    OutputPositionChanged {
        request: RequestId,
        marker: MarkerId,
        index: usize,
    },
    Settled {
        request: RequestId,
        state: ReceiverState,
        duration_ms: Option<u64>,
    },
    /// Edits invalidated these requests' markers and their output was dropped.
    ResultsInvalidated { requests: Vec<RequestId> },
}

/// Renders one request's events and settles its completion.
pub struct KernelResultReceiver {
    request: ExecutionRequest,
    marker: MarkerId,
    tree: RenderTree,
    state: ReceiverState,
    started_at: Option<Instant>,
    duration: Option<Duration>,
    execution_count: Option<usize>,
    pending_class: bool,
    last_error: Option<(String, String)>,
    render_html: bool,
    completion: Option<oneshot::Sender<Result<(), ExecutionError>>>,
    renderer: Arc<dyn OutputRenderer>,
    notify: Option<mpsc::UnboundedSender<DocumentNotification>>,
}

impl KernelResultReceiver {
    /// A pending receiver rendering into `marker`, and the future its
    /// completion settles.
    pub fn new(
        request: ExecutionRequest,
        marker: MarkerId,
        renderer: Arc<dyn OutputRenderer>,
        render_html: bool,
    ) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        renderer.set_pending(marker, true);
        let receiver = Self {
            request,
            marker,
            tree: RenderTree::new(),
            state: ReceiverState::Pending,
            started_at: None,
            duration: None,
            execution_count: None,
            pending_class: true,
            last_error: None,
            render_html,
            completion: Some(tx),
            renderer,
            notify: None,
        };
        (receiver, rx)
    }

    pub fn with_notifications(mut self, notify: mpsc::UnboundedSender<DocumentNotification>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn id(&self) -> RequestId {
        self.request.id
    }

    pub fn request(&self) -> &ExecutionRequest {
        &self.request
    }

    pub fn marker(&self) -> MarkerId {
        self.marker
    }

    pub fn tree(&self) -> &RenderTree {
        &self.tree
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == ReceiverState::Pending
    }

    pub fn has_pending_class(&self) -> bool {
        self.pending_class
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn execution_count(&self) -> Option<usize> {
        self.execution_count
    }

    /// Feed one event. Returns true when this event settled the receiver.
    pub fn ingest(&mut self, event: KernelResultEvent) -> bool {
        if self.state.is_terminal() {
            debug!(
                "[receiver] Ignoring {} for settled request {}",
                event.kind(),
                self.request.id
            );
            return false;
        }

        match event {
            KernelResultEvent::Stream { name, text } => {
                let change = self.tree.push_stream(name, &text);
                self.rendered(change);
            }
            KernelResultEvent::ExecuteResult { data } | KernelResultEvent::DisplayData { data } => {
                let node = render_bundle(&data, self.render_html);
                if let OutputNode::Script { source } = &node {
                    self.renderer.run_script(self.marker, source);
                }
                let change = self.tree.push(node);
                self.rendered(change);
            }
            KernelResultEvent::Error {
                ename,
                evalue,
                traceback,
            } => {
                let text = traceback_text(&ename, &evalue, &traceback);
                let change = self.tree.push_stream(StreamName::Stderr, &text);
                self.rendered(change);
                self.last_error = Some((ename, evalue));
            }
            KernelResultEvent::StatusBusy => {
                self.started_at = Some(Instant::now());
            }
            KernelResultEvent::StatusIdle => {}
            KernelResultEvent::ExecutionCountNotice { count } => {
                self.execution_count = Some(count);
            }
            KernelResultEvent::StatusOk => {
                self.settle(ReceiverState::Ok, Ok(()));
                return true;
            }
            KernelResultEvent::StatusError => {
                let reason = match self.last_error.take() {
                    Some((ename, evalue)) => ExecutionError::Kernel { ename, evalue },
                    None => ExecutionError::KernelStatus,
                };
                self.settle(ReceiverState::Error, Err(reason));
                return true;
            }
            KernelResultEvent::StatusCancelled => {
                self.settle(ReceiverState::Cancelled, Err(ExecutionError::Cancelled));
                return true;
            }
            KernelResultEvent::Unrecognized { kind } => {
                warn!("[receiver] Ignoring unrecognized event {}", kind);
            }
        }
        false
    }

    /// Cancel a pending receiver. Returns false if it had already settled.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let notice = format!("{}\n", CANCELLED_NOTICE);
        let change = self.tree.push_stream(StreamName::Stderr, &notice);
        self.rendered(change);
        self.settle(ReceiverState::Cancelled, Err(ExecutionError::Cancelled));
        true
    }

    /// Reject with a transport failure, rendering it inline.
    pub fn fail(&mut self, reason: &str) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let change = self
            .tree
            .push_stream(StreamName::Stderr, &format!("{}\n", reason));
        self.rendered(change);
        self.settle(
            ReceiverState::Error,
            Err(ExecutionError::Transport(reason.to_string())),
        );
        true
    }

    fn rendered(&self, change: TreeChange) {
        let index = change.index();
        if let Some(node) = self.tree.get(index) {
            match change {
                TreeChange::Appended(_) => self.renderer.append(self.marker, index, node),
                TreeChange::Replaced(_) => self.renderer.replace(self.marker, index, node),
            }
        }
        self.emit(DocumentNotification::OutputPositionChanged {
            request: self.request.id,
            marker: self.marker,
            index,
        });
    }

    fn settle(&mut self, state: ReceiverState, result: Result<(), ExecutionError>) {
        self.state = state;
        self.duration = self.started_at.map(|t| t.elapsed());
        self.pending_class = false;
        self.renderer.set_pending(self.marker, false);

        if let Some(tx) = self.completion.take() {
            // The caller may have stopped waiting
            let _ = tx.send(result);
        }
        debug!(
            "[receiver] Request {} settled as {} after {:?}",
            self.request.id, state, self.duration
        );
        self.emit(DocumentNotification::Settled {
            request: self.request.id,
            state,
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
        });
    }

    fn emit(&self, notification: DocumentNotification) {
        if let Some(ref notify) = self.notify {
            let _ = notify.send(notification);
        }
    }
}

impl std::fmt::Debug for KernelResultReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelResultReceiver")
            .field("request", &self.request.id)
            .field("marker", &self.marker)
            .field("state", &self.state)
            .field("nodes", &self.tree.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::NullRenderer;
    use chunk_text::Position;
    use kernel_events::MimeBundle;

    fn receiver() -> (KernelResultReceiver, Completion) {
        let request = ExecutionRequest::new(
            Range::new(Position::new(0, 0), Position::new(0, 5)),
            "1 + 1",
            RunOptions::default(),
        );
        KernelResultReceiver::new(request, 0, Arc::new(NullRenderer), true)
    }

    #[tokio::test]
    async fn test_execute_result_then_ok() {
        let (mut receiver, completion) = receiver();
        assert!(!receiver.ingest(KernelResultEvent::StatusBusy));
        assert!(!receiver.ingest(KernelResultEvent::ExecuteResult {
            data: MimeBundle::new().with("text/plain", "2"),
        }));
        assert!(receiver.ingest(KernelResultEvent::StatusOk));

        assert_eq!(receiver.state(), ReceiverState::Ok);
        assert!(receiver.tree().text().contains('2'));
        assert!(receiver.duration().is_some());
        assert!(!receiver.has_pending_class());
        assert_eq!(completion.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_error_then_error_status() {
        let (mut receiver, completion) = receiver();
        receiver.ingest(KernelResultEvent::Error {
            ename: "ZeroDivisionError".into(),
            evalue: "division by zero".into(),
            traceback: vec!["\x1b[31mZeroDivisionError\x1b[0m: division by zero".into()],
        });
        receiver.ingest(KernelResultEvent::StatusError);

        assert_eq!(receiver.state(), ReceiverState::Error);
        assert_eq!(
            receiver.tree().nodes(),
            &[OutputNode::Stream {
                name: StreamName::Stderr,
                text: "ZeroDivisionError: division by zero\n".into()
            }]
        );
        assert_eq!(
            completion.await.unwrap(),
            Err(ExecutionError::Kernel {
                ename: "ZeroDivisionError".into(),
                evalue: "division by zero".into()
            })
        );
    }

    #[test]
    fn test_settles_exactly_once() {
        let (mut receiver, _completion) = receiver();
        assert!(receiver.ingest(KernelResultEvent::StatusOk));
        assert!(!receiver.ingest(KernelResultEvent::StatusError));
        assert!(!receiver.ingest(KernelResultEvent::stdout("late\n")));
        assert!(!receiver.cancel());
        assert_eq!(receiver.state(), ReceiverState::Ok);
        assert!(receiver.tree().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_appends_notice() {
        let (mut receiver, completion) = receiver();
        receiver.ingest(KernelResultEvent::stdout("working\n"));
        assert!(receiver.cancel());
        assert_eq!(receiver.state(), ReceiverState::Cancelled);
        assert_eq!(receiver.tree().text(), "working\n[cancelled]\n");
        assert_eq!(completion.await.unwrap(), Err(ExecutionError::Cancelled));
    }

    #[test]
    fn test_execution_count_and_unrecognized() {
        let (mut receiver, _completion) = receiver();
        receiver.ingest(KernelResultEvent::ExecutionCountNotice { count: 12 });
        receiver.ingest(KernelResultEvent::Unrecognized {
            kind: "comm_msg".into(),
        });
        receiver.ingest(KernelResultEvent::StatusIdle);
        assert_eq!(receiver.execution_count(), Some(12));
        assert!(receiver.tree().is_empty());
        assert!(receiver.is_pending());
    }

    #[test]
    fn test_notifications() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (receiver, _completion) = receiver();
        let mut receiver = receiver.with_notifications(tx);
        receiver.ingest(KernelResultEvent::stdout("a"));
        receiver.ingest(KernelResultEvent::stdout("b"));
        receiver.ingest(KernelResultEvent::StatusCancelled);

        let id = receiver.id();
        assert_eq!(
            rx.try_recv().unwrap(),
            DocumentNotification::OutputPositionChanged {
                request: id,
                marker: 0,
                index: 0
            }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            DocumentNotification::OutputPositionChanged { index: 0, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            DocumentNotification::Settled {
                state: ReceiverState::Cancelled,
                duration_ms: None,
                ..
            }
        ));
    }
}
