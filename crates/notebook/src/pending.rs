//! In-flight receivers for one document.

use kernel_events::KernelResultEvent;
use log::info;

use crate::receiver::{KernelResultReceiver, ReceiverState, RequestId};

/// Pending receivers in submission order.
///
/// A receiver leaves the set when it settles. When one settles with a
/// rejection (error or cancellation), every other pending receiver in the
/// set is cancelled too.
#[derive(Debug, Default)]
pub struct PendingReceiverSet {
    receivers: Vec<KernelResultReceiver>,
}

impl PendingReceiverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, receiver: KernelResultReceiver) {
        self.receivers.push(receiver);
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.receivers.iter().any(|r| r.id() == id)
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.receivers.iter().map(KernelResultReceiver::id).collect()
    }

    pub fn get(&self, id: RequestId) -> Option<&KernelResultReceiver> {
        self.receivers.iter().find(|r| r.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelResultReceiver> {
        self.receivers.iter()
    }

    /// Route an event to its receiver. Returns every receiver that settled as
    /// a result, the target first.
    pub fn ingest(&mut self, id: RequestId, event: KernelResultEvent) -> Vec<KernelResultReceiver> {
        let Some(index) = self.receivers.iter().position(|r| r.id() == id) else {
            return Vec::new();
        };
        if !self.receivers[index].ingest(event) {
            return Vec::new();
        }
        self.take_settled(index)
    }

    /// Cancel one receiver. Its rejection cancels the rest of the set.
    pub fn cancel(&mut self, id: RequestId) -> Vec<KernelResultReceiver> {
        let Some(index) = self.receivers.iter().position(|r| r.id() == id) else {
            return Vec::new();
        };
        self.receivers[index].cancel();
        self.take_settled(index)
    }

    /// Cancel every receiver.
    pub fn cancel_all(&mut self) -> Vec<KernelResultReceiver> {
        let mut settled: Vec<_> = self.receivers.drain(..).collect();
        for receiver in settled.iter_mut() {
            receiver.cancel();
        }
        settled
    }

    /// Reject one receiver with a transport failure.
    pub fn fail(&mut self, id: RequestId, reason: &str) -> Vec<KernelResultReceiver> {
        let Some(index) = self.receivers.iter().position(|r| r.id() == id) else {
            return Vec::new();
        };
        self.receivers[index].fail(reason);
        self.take_settled(index)
    }

    fn take_settled(&mut self, index: usize) -> Vec<KernelResultReceiver> {
        let receiver = self.receivers.remove(index);
        let rejected = receiver.state() != ReceiverState::Ok;
        let mut settled = vec![receiver];
        if rejected && !self.receivers.is_empty() {
            info!(
                "[pending] Request {} was rejected, cancelling {} others",
                settled[0].id(),
                self.receivers.len()
            );
            settled.extend(self.cancel_all());
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chunk_text::{Position, Range};

    use super::*;
    use crate::receiver::{Completion, ExecutionError, ExecutionRequest, RunOptions};
    use crate::render::NullRenderer;

    fn pending(marker: u64) -> (KernelResultReceiver, Completion) {
        let request = ExecutionRequest::new(
            Range::point(Position::new(marker as usize, 0)),
            "x",
            RunOptions::default(),
        );
        KernelResultReceiver::new(request, marker, Arc::new(NullRenderer), true)
    }

    #[tokio::test]
    async fn test_rejection_cancels_siblings() {
        let mut set = PendingReceiverSet::new();
        let (a, a_done) = pending(0);
        let (b, b_done) = pending(1);
        let (c, c_done) = pending(2);
        let (a_id, b_id) = (a.id(), b.id());
        set.insert(a);
        set.insert(b);
        set.insert(c);

        let settled = set.ingest(b_id, KernelResultEvent::StatusError);
        assert_eq!(settled.len(), 3);
        assert_eq!(settled[0].id(), b_id);
        assert_eq!(settled[0].state(), ReceiverState::Error);
        assert!(settled[1..]
            .iter()
            .all(|r| r.state() == ReceiverState::Cancelled));
        assert!(set.is_empty());
        assert!(!set.contains(a_id));

        assert_eq!(b_done.await.unwrap(), Err(ExecutionError::KernelStatus));
        assert_eq!(a_done.await.unwrap(), Err(ExecutionError::Cancelled));
        assert_eq!(c_done.await.unwrap(), Err(ExecutionError::Cancelled));
    }

    #[test]
    fn test_success_leaves_siblings_pending() {
        let mut set = PendingReceiverSet::new();
        let (a, _a_done) = pending(0);
        let (b, _b_done) = pending(1);
        let (a_id, b_id) = (a.id(), b.id());
        set.insert(a);
        set.insert(b);

        assert!(set.ingest(a_id, KernelResultEvent::stdout("hi")).is_empty());
        let settled = set.ingest(a_id, KernelResultEvent::StatusOk);
        assert_eq!(settled.len(), 1);
        assert_eq!(set.ids(), vec![b_id]);
        assert!(set.get(b_id).is_some_and(|r| r.is_pending()));
    }

    #[test]
    fn test_unknown_request_is_ignored() {
        let mut set = PendingReceiverSet::new();
        let (a, _done) = pending(0);
        set.insert(a);
        assert!(set
            .ingest(uuid::Uuid::new_v4(), KernelResultEvent::StatusOk)
            .is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_cancel_one_cancels_all() {
        let mut set = PendingReceiverSet::new();
        let (a, _a_done) = pending(0);
        let (b, _b_done) = pending(1);
        let a_id = a.id();
        set.insert(a);
        set.insert(b);
        let settled = set.cancel(a_id);
        assert_eq!(settled.len(), 2);
        assert!(settled
            .iter()
            .all(|r| r.state() == ReceiverState::Cancelled));
        assert!(set.is_empty());
    }
}
