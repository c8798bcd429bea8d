//! Per-document state, keyed by a host-supplied id.
//!
//! Every document the host observes gets one [`DocumentState`] behind a
//! `std::sync::Mutex`. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use chunk_text::Range;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::document::TextDocument;
use crate::kernel::Kernel;
use crate::marker::MarkerId;
use crate::pending::PendingReceiverSet;
use crate::receiver::{DocumentNotification, KernelResultReceiver, RequestId};
use crate::render::OutputRenderer;
use crate::NotebookError;

/// Opaque, stable document identity (a URI, a buffer id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

pub type SharedDocument = Arc<StdMutex<DocumentState>>;

/// Lock shared state, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything tracked for one open document.
pub struct DocumentState {
    id: DocumentId,
    pub document: TextDocument,
    pub pending: PendingReceiverSet,
    /// Settled receivers whose output is still shown, in settlement order
    results: Vec<KernelResultReceiver>,
    pub kernel: Option<Kernel>,
    /// Name of the last kernel started for this document
    pub last_kernel_name: Option<String>,
    /// Set once a host subscribes; without one, notifications are not kept
    notify_tx: Option<mpsc::UnboundedSender<DocumentNotification>>,
}

impl DocumentState {
    fn new(id: DocumentId, document: TextDocument) -> Self {
        Self {
            id,
            document,
            pending: PendingReceiverSet::new(),
            results: Vec::new(),
            kernel: None,
            last_kernel_name: None,
            notify_tx: None,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn results(&self) -> &[KernelResultReceiver] {
        &self.results
    }

    /// A receiver by request id, pending or settled.
    pub fn receiver(&self, request: RequestId) -> Option<&KernelResultReceiver> {
        self.pending
            .get(request)
            .or_else(|| self.results.iter().find(|r| r.id() == request))
    }

    /// Route `receiver`'s notifications to the subscriber, if there is one.
    pub(crate) fn with_notifier(&self, receiver: KernelResultReceiver) -> KernelResultReceiver {
        match &self.notify_tx {
            Some(tx) if !tx.is_closed() => receiver.with_notifications(tx.clone()),
            _ => receiver,
        }
    }

    fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<DocumentNotification>> {
        if self.notify_tx.is_some() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify_tx = Some(tx);
        Some(rx)
    }

    /// Keep settled receivers whose marker survived. Output of a receiver
    /// whose marker an edit invalidated is dropped along with the marker.
    pub(crate) fn store_settled(
        &mut self,
        settled: Vec<KernelResultReceiver>,
        renderer: &dyn OutputRenderer,
    ) {
        for receiver in settled {
            if self.document.markers().is_valid(receiver.marker()) {
                self.results.push(receiver);
            } else {
                debug!(
                    "[registry] Dropping output of {} (marker invalidated)",
                    receiver.id()
                );
                self.discard(receiver.marker(), renderer);
            }
        }
    }

    /// Remove every result and cancel every pending receiver whose marker
    /// intersects `range`.
    pub(crate) fn supersede(&mut self, range: &Range, renderer: &dyn OutputRenderer) {
        let superseded = self.document.markers().intersecting(range);
        if superseded.is_empty() {
            return;
        }

        let pending: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|r| superseded.contains(&r.marker()))
            .map(KernelResultReceiver::id)
            .collect();
        for request in pending {
            let cancelled = self.pending.cancel(request);
            let (dropped, kept): (Vec<_>, Vec<_>) = cancelled
                .into_iter()
                .partition(|r| superseded.contains(&r.marker()));
            for receiver in dropped {
                self.discard(receiver.marker(), renderer);
            }
            self.store_settled(kept, renderer);
        }

        let removed = self.remove_results(|r| superseded.contains(&r.marker()), renderer);
        debug!(
            "[registry] Superseded {} results in {} of {}",
            removed.len(),
            range,
            self.id
        );
    }

    /// Drop every settled result. Pending receivers are left alone.
    pub fn clear_results(&mut self, renderer: &dyn OutputRenderer) -> usize {
        self.remove_results(|_| true, renderer).len()
    }

    /// Apply an edit, dropping the output of every result it invalidated.
    pub fn edit(&mut self, range: Range, text: &str, renderer: &dyn OutputRenderer) -> Range {
        let (inserted, invalidated) = self.document.edit(range, text);
        if invalidated.is_empty() {
            return inserted;
        }

        let mut requests: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|r| invalidated.contains(&r.marker()))
            .map(KernelResultReceiver::id)
            .collect();
        requests.extend(self.remove_results(|r| invalidated.contains(&r.marker()), renderer));

        if !requests.is_empty() {
            info!(
                "[registry] Edit in {} invalidated {} results",
                self.id,
                requests.len()
            );
            if let Some(tx) = &self.notify_tx {
                let _ = tx.send(DocumentNotification::ResultsInvalidated { requests });
            }
        }
        inserted
    }

    fn remove_results(
        &mut self,
        mut predicate: impl FnMut(&KernelResultReceiver) -> bool,
        renderer: &dyn OutputRenderer,
    ) -> Vec<RequestId> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.results.drain(..).partition(|r| predicate(r));
        self.results = kept;
        removed
            .into_iter()
            .map(|receiver| {
                self.discard(receiver.marker(), renderer);
                receiver.id()
            })
            .collect()
    }

    fn discard(&mut self, marker: MarkerId, renderer: &dyn OutputRenderer) {
        renderer.clear(marker);
        self.document.markers_mut().destroy(marker);
    }

    fn shutdown(&mut self, renderer: &dyn OutputRenderer) {
        let cancelled = self.pending.cancel_all();
        for receiver in cancelled {
            self.discard(receiver.marker(), renderer);
        }
        self.clear_results(renderer);
        self.kernel = None;
    }
}

impl std::fmt::Debug for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentState")
            .field("id", &self.id)
            .field("pending", &self.pending.len())
            .field("results", &self.results.len())
            .field("kernel", &self.kernel)
            .finish()
    }
}

/// All open documents.
pub struct DocumentRegistry {
    documents: StdMutex<HashMap<DocumentId, SharedDocument>>,
    renderer: Arc<dyn OutputRenderer>,
}

impl DocumentRegistry {
    pub fn new(renderer: Arc<dyn OutputRenderer>) -> Self {
        Self {
            documents: StdMutex::new(HashMap::new()),
            renderer,
        }
    }

    pub fn renderer(&self) -> &Arc<dyn OutputRenderer> {
        &self.renderer
    }

    /// Return the document's state, creating it from `text` on first sight.
    pub fn observe(
        &self,
        id: DocumentId,
        text: &str,
        language: Option<&str>,
        path: Option<PathBuf>,
    ) -> SharedDocument {
        let mut documents = lock(&self.documents);
        documents
            .entry(id.clone())
            .or_insert_with(|| {
                info!("[registry] Observing document {}", id);
                let mut document = TextDocument::new(text);
                if let Some(language) = language {
                    document = document.with_language(language);
                }
                if let Some(path) = path {
                    document = document.with_path(path);
                }
                Arc::new(StdMutex::new(DocumentState::new(id, document)))
            })
            .clone()
    }

    pub fn get(&self, id: &DocumentId) -> Result<SharedDocument, NotebookError> {
        lock(&self.documents)
            .get(id)
            .cloned()
            .ok_or_else(|| NotebookError::UnknownDocument(id.clone()))
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        lock(&self.documents).contains_key(id)
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = lock(&self.documents).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace `range` in the document with `text`.
    pub fn edit(&self, id: &DocumentId, range: Range, text: &str) -> Result<Range, NotebookError> {
        let shared = self.get(id)?;
        let mut state = lock(&shared);
        Ok(state.edit(range, text, self.renderer.as_ref()))
    }

    /// The document's notification stream. Handed out once; nothing is
    /// queued before the first call, and receivers submitted earlier stay
    /// silent.
    pub fn take_notifications(
        &self,
        id: &DocumentId,
    ) -> Result<Option<mpsc::UnboundedReceiver<DocumentNotification>>, NotebookError> {
        let shared = self.get(id)?;
        let mut state = lock(&shared);
        Ok(state.subscribe())
    }

    /// Forget a document, cancelling its pending receivers and dropping its
    /// output.
    pub fn close(&self, id: &DocumentId) -> Result<(), NotebookError> {
        let shared = lock(&self.documents)
            .remove(id)
            .ok_or_else(|| NotebookError::UnknownDocument(id.clone()))?;
        let mut state = lock(&shared);
        state.shutdown(self.renderer.as_ref());
        info!("[registry] Closed document {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::InvalidationPolicy;
    use crate::receiver::{ExecutionRequest, RunOptions};
    use crate::render::NullRenderer;
    use chunk_text::Position;
    use kernel_events::KernelResultEvent;

    fn registry() -> DocumentRegistry {
        DocumentRegistry::new(Arc::new(NullRenderer))
    }

    fn submit(state: &mut DocumentState, range: Range) -> RequestId {
        let marker = state.document.add_marker(range, InvalidationPolicy::Surround);
        let request = ExecutionRequest::new(range, "x", RunOptions::default());
        let (receiver, _completion) =
            KernelResultReceiver::new(request, marker, Arc::new(NullRenderer), true);
        let id = receiver.id();
        let receiver = state.with_notifier(receiver);
        state.pending.insert(receiver);
        id
    }

    fn settle(state: &mut DocumentState, id: RequestId) {
        let settled = state.pending.ingest(id, KernelResultEvent::StatusOk);
        state.store_settled(settled, &NullRenderer);
    }

    fn row(r: usize) -> Range {
        Range::new(Position::new(r, 0), Position::new(r, 5))
    }

    #[test]
    fn test_observe_is_idempotent() {
        let registry = registry();
        let id = DocumentId::from("file:///a.py");
        let first = registry.observe(id.clone(), "a = 1", Some("python"), None);
        let second = registry.observe(id.clone(), "ignored", None, None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lock(&second).document.text(), "a = 1");
        assert_eq!(registry.ids(), vec![id]);
    }

    #[test]
    fn test_unknown_document() {
        let registry = registry();
        let id = DocumentId::from("missing");
        assert!(matches!(
            registry.get(&id),
            Err(NotebookError::UnknownDocument(_))
        ));
        assert!(registry.close(&id).is_err());
    }

    #[test]
    fn test_notifications_taken_once() {
        let registry = registry();
        let id = DocumentId::from("doc");
        registry.observe(id.clone(), "", None, None);
        assert!(registry.take_notifications(&id).unwrap().is_some());
        assert!(registry.take_notifications(&id).unwrap().is_none());
    }

    #[test]
    fn test_nothing_queued_before_subscribe() {
        let registry = registry();
        let id = DocumentId::from("doc");
        let shared = registry.observe(id.clone(), "a = 1\n\nb = 2", None, None);
        {
            let mut state = lock(&shared);
            let first = submit(&mut state, row(0));
            settle(&mut state, first);
        }
        registry.edit(&id, row(0), "a = 10").unwrap();

        let mut rx = registry.take_notifications(&id).unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_edit_invalidates_results() {
        let registry = registry();
        let id = DocumentId::from("doc");
        let shared = registry.observe(id.clone(), "a = 1\n\nb = 2", None, None);
        let mut rx = registry.take_notifications(&id).unwrap().unwrap();

        let (first, second) = {
            let mut state = lock(&shared);
            let first = submit(&mut state, row(0));
            let second = submit(&mut state, row(2));
            settle(&mut state, first);
            settle(&mut state, second);
            (first, second)
        };
        while rx.try_recv().is_ok() {}

        registry.edit(&id, row(0), "a = 10").unwrap();

        let state = lock(&shared);
        assert_eq!(state.results().len(), 1);
        assert_eq!(state.results()[0].id(), second);
        assert_eq!(
            rx.try_recv().unwrap(),
            DocumentNotification::ResultsInvalidated {
                requests: vec![first]
            }
        );
    }

    #[test]
    fn test_invalidated_pending_output_is_dropped_on_settle() {
        let registry = registry();
        let id = DocumentId::from("doc");
        let shared = registry.observe(id.clone(), "a = 1", None, None);
        let request = submit(&mut lock(&shared), row(0));

        registry.edit(&id, row(0), "z = 2").unwrap();

        let mut state = lock(&shared);
        assert!(state.pending.contains(request));
        settle(&mut state, request);
        assert!(state.results().is_empty());
        assert!(state.document.markers().is_empty());
    }

    #[test]
    fn test_supersede_keeps_unrelated_siblings() {
        let registry = registry();
        let shared = registry.observe(DocumentId::from("doc"), "a\n\nb\n\nc", None, None);
        let mut state = lock(&shared);

        let done = submit(&mut state, Range::new(Position::new(0, 0), Position::new(0, 1)));
        settle(&mut state, done);
        let target = submit(&mut state, Range::new(Position::new(2, 0), Position::new(2, 1)));
        let sibling = submit(&mut state, Range::new(Position::new(4, 0), Position::new(4, 1)));

        state.supersede(&Range::new(Position::new(2, 0), Position::new(2, 1)), &NullRenderer);

        assert!(state.pending.is_empty());
        assert!(state.receiver(target).is_none());
        let ids: Vec<_> = state.results().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![done, sibling]);
        assert!(state.results()[1].tree().text().contains("[cancelled]"));
    }

    #[test]
    fn test_close_cancels_pending() {
        let registry = registry();
        let id = DocumentId::from("doc");
        let shared = registry.observe(id.clone(), "a = 1", None, None);
        submit(&mut lock(&shared), row(0));

        registry.close(&id).unwrap();
        assert!(!registry.contains(&id));
        let state = lock(&shared);
        assert!(state.pending.is_empty());
        assert!(state.document.markers().is_empty());
    }
}
