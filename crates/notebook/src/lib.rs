//! Notebook-style execution for plain-text buffers.
//!
//! A host observes documents in the [`DocumentRegistry`], then asks the
//! [`ExecutionCoordinator`] to run chunks. Each run gets a marker over its
//! code and a [`KernelResultReceiver`] that renders the kernel's events into
//! an [`OutputRenderer`] until the run settles.

pub mod coordinator;
pub mod document;
pub mod kernel;
pub mod marker;
pub mod pending;
pub mod project_file;
pub mod receiver;
pub mod registry;
pub mod render;
pub mod runner;
pub mod settings;

pub use coordinator::{path_hint, select_kernel_spec, ExecutionCoordinator, PathHint};
pub use document::{ChangeWatcher, TextDocument};
pub use kernel::{Kernel, KernelProvider, KernelSpec, KernelTransport};
pub use marker::{InvalidationPolicy, MarkerId, MarkerLayer};
pub use pending::PendingReceiverSet;
pub use receiver::{
    Completion, DocumentNotification, ExecutionError, ExecutionRequest, KernelResultReceiver,
    ReceiverState, RequestId, RunOptions,
};
pub use registry::{DocumentId, DocumentRegistry, DocumentState, SharedDocument};
pub use render::{NullRenderer, OutputNode, OutputRenderer, RenderTree};
pub use runner::ExecutionHandle;
pub use settings::Settings;

#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("Unknown document: {0}")]
    UnknownDocument(DocumentId),

    #[error(transparent)]
    Chunk(#[from] chunk_text::ChunkError),

    #[error("Failed to interrupt kernel: {0}")]
    Interrupt(String),
}
