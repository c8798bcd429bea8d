//! Run, cancel and clear operations on a document.

use chunk_text::{
    resolve_comment_token, trim_range, ChunkError, ChunkPartitioner, ChunkType, LanguageGrammar,
    Position, Range, SelectionMode, TextAddress,
};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::coordinator::ExecutionCoordinator;
use crate::document::TextDocument;
use crate::marker::InvalidationPolicy;
use crate::receiver::{
    Completion, ExecutionError, ExecutionRequest, KernelResultReceiver, RequestId, RunOptions,
};
use crate::registry::{lock, DocumentId, DocumentState};
use crate::NotebookError;

/// A submitted run.
#[derive(Debug)]
pub struct ExecutionHandle {
    request: ExecutionRequest,
    completion: Completion,
}

impl ExecutionHandle {
    pub fn id(&self) -> RequestId {
        self.request.id
    }

    pub fn request(&self) -> &ExecutionRequest {
        &self.request
    }

    /// Wait for the run to settle.
    pub async fn wait(self) -> Result<(), ExecutionError> {
        self.completion.await.unwrap_or(Err(ExecutionError::Dropped))
    }
}

/// The comment token cell delimiters are built from.
fn comment_token(state: &DocumentState) -> Option<String> {
    let language = state.document.language()?;
    resolve_comment_token(
        &LanguageGrammar::for_language(language),
        state.document.path(),
    )
}

fn partition<'a>(
    state: &'a DocumentState,
    chunk_type: ChunkType,
    token: Option<&str>,
) -> Result<ChunkPartitioner<'a, TextDocument>, ChunkError> {
    ChunkPartitioner::for_type(&state.document, chunk_type, token)
}

impl ExecutionCoordinator {
    /// Every chunk of the document.
    pub fn chunks(
        &self,
        id: &DocumentId,
        chunk_type: Option<ChunkType>,
    ) -> Result<Vec<Range>, NotebookError> {
        let shared = self.registry().get(id)?;
        let state = lock(&shared);
        let token = comment_token(&state);
        let chunk_type = chunk_type.unwrap_or(self.settings().default_chunk_type);
        Ok(partition(&state, chunk_type, token.as_deref())?.all_chunks())
    }

    /// Run the trimmed text of `range`. Returns `None` without starting a
    /// kernel when there is nothing to run, and `None` when no kernel could
    /// be acquired.
    pub async fn run_code(
        &self,
        id: &DocumentId,
        range: Range,
        options: RunOptions,
    ) -> Result<Option<ExecutionHandle>, NotebookError> {
        let shared = self.registry().get(id)?;
        if trimmed_code(&lock(&shared), range).is_none() {
            warn!("[runner] Nothing to run in {} of {}", range, id);
            return Ok(None);
        }

        let Some(kernel) = self.ensure_kernel(id).await? else {
            return Ok(None);
        };

        let renderer = self.registry().renderer().clone();
        let (request, completion) = {
            let mut state = lock(&shared);
            // The text may have changed while the kernel started
            let Some((range, code)) = trimmed_code(&state, range) else {
                warn!("[runner] Nothing left to run in {} of {}", range, id);
                return Ok(None);
            };

            state.supersede(&range, renderer.as_ref());
            let marker = state.document.add_marker(range, InvalidationPolicy::Surround);
            let request = ExecutionRequest::new(range, code, options);
            let (receiver, completion) = KernelResultReceiver::new(
                request.clone(),
                marker,
                renderer.clone(),
                self.settings().render_html,
            );
            let receiver = state.with_notifier(receiver);
            state.pending.insert(receiver);
            (request, completion)
        };

        info!(
            "[runner] Submitting {} ({} in {}) to {}",
            request.id, request.range, id, kernel.spec.name
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump_state = shared.clone();
        let pump_renderer = renderer.clone();
        let request_id = request.id;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut state = lock(&pump_state);
                let settled = state.pending.ingest(request_id, event);
                state.store_settled(settled, pump_renderer.as_ref());
                if !state.pending.contains(request_id) {
                    break;
                }
            }
            debug!("[runner] Event pump for {} finished", request_id);
        });

        if let Err(e) = kernel.transport.execute(&request.code, tx).await {
            error!("[runner] Failed to submit {}: {}", request.id, e);
            let mut state = lock(&shared);
            let settled = state.pending.fail(request.id, &e.to_string());
            state.store_settled(settled, renderer.as_ref());
        }

        Ok(Some(ExecutionHandle {
            request,
            completion,
        }))
    }

    /// Run the chunk containing `point`.
    pub async fn run_chunk_at(
        &self,
        id: &DocumentId,
        chunk_type: Option<ChunkType>,
        point: Position,
        options: RunOptions,
    ) -> Result<Option<ExecutionHandle>, NotebookError> {
        let range = {
            let shared = self.registry().get(id)?;
            let state = lock(&shared);
            let token = comment_token(&state);
            let chunk_type = chunk_type.unwrap_or(self.settings().default_chunk_type);
            match partition(&state, chunk_type, token.as_deref()) {
                Ok(partitioner) => partitioner.chunk_containing_point(point),
                Err(e) => {
                    warn!("[runner] Cannot find {} chunks in {}: {}", chunk_type, id, e);
                    return Ok(None);
                }
            }
        };
        self.run_code(id, range, options).await
    }

    /// Run the chunks `modes` select relative to `range`, in document order.
    pub async fn run_chunks(
        &self,
        id: &DocumentId,
        chunk_type: Option<ChunkType>,
        range: Range,
        modes: &[SelectionMode],
        options: RunOptions,
    ) -> Result<Vec<ExecutionHandle>, NotebookError> {
        let chunks = {
            let shared = self.registry().get(id)?;
            let state = lock(&shared);
            let token = comment_token(&state);
            let chunk_type = chunk_type.unwrap_or(self.settings().default_chunk_type);
            match partition(&state, chunk_type, token.as_deref()) {
                Ok(partitioner) => partitioner.chunks_for_range(range, modes),
                Err(e) => {
                    warn!("[runner] Cannot find {} chunks in {}: {}", chunk_type, id, e);
                    return Ok(Vec::new());
                }
            }
        };

        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if let Some(handle) = self.run_code(id, chunk, options.clone()).await? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    /// Cancel one pending run. The rejection cancels the document's other
    /// pending runs too. Returns false if it was not pending.
    pub fn cancel(&self, id: &DocumentId, request: RequestId) -> Result<bool, NotebookError> {
        let shared = self.registry().get(id)?;
        let mut state = lock(&shared);
        let settled = state.pending.cancel(request);
        let cancelled = !settled.is_empty();
        state.store_settled(settled, self.registry().renderer().as_ref());
        Ok(cancelled)
    }

    /// Cancel every pending run. Returns how many were cancelled.
    pub fn cancel_all(&self, id: &DocumentId) -> Result<usize, NotebookError> {
        let shared = self.registry().get(id)?;
        let mut state = lock(&shared);
        let settled = state.pending.cancel_all();
        let count = settled.len();
        state.store_settled(settled, self.registry().renderer().as_ref());
        if count > 0 {
            info!("[runner] Cancelled {} runs in {}", count, id);
        }
        Ok(count)
    }

    /// Interrupt the document's kernel. Returns false if it has none.
    pub async fn interrupt(&self, id: &DocumentId) -> Result<bool, NotebookError> {
        let kernel = {
            let shared = self.registry().get(id)?;
            let state = lock(&shared);
            state.kernel.clone()
        };
        let Some(kernel) = kernel else {
            return Ok(false);
        };
        kernel
            .transport
            .interrupt()
            .await
            .map_err(|e| NotebookError::Interrupt(e.to_string()))?;
        info!("[runner] Interrupted {} for {}", kernel.spec.name, id);
        Ok(true)
    }

    /// Remove every settled result. Returns how many were removed.
    pub fn clear_results(&self, id: &DocumentId) -> Result<usize, NotebookError> {
        let shared = self.registry().get(id)?;
        let mut state = lock(&shared);
        Ok(state.clear_results(self.registry().renderer().as_ref()))
    }

    /// Wait for the next burst of edits to settle. Returns the settled
    /// revision, or `None` if the document was closed.
    pub async fn changes_settled(&self, id: &DocumentId) -> Result<Option<u64>, NotebookError> {
        let mut watcher = {
            let shared = self.registry().get(id)?;
            let state = lock(&shared);
            state.document.subscribe()
        };
        Ok(watcher.settled(self.settings().change_debounce()).await)
    }
}

/// The trimmed range and its code, or `None` when it holds only whitespace.
fn trimmed_code(state: &DocumentState, range: Range) -> Option<(Range, String)> {
    let range = trim_range(&state.document, state.document.clip_range(range));
    let code = state.document.text_in_range(range);
    if code.trim().is_empty() {
        None
    } else {
        Some((range, code))
    }
}
