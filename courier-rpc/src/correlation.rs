//! Matching inbound responses to the callers waiting on them

use courier_core::{CallResponse, Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Sender half held for one outstanding call
pub type ResponseSender = oneshot::Sender<Result<CallResponse>>;

/// Outstanding calls keyed by request id
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<String, ResponseSender>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`. Fails if one is already registered.
    pub fn put(&self, request_id: String, sender: ResponseSender) -> Result<()> {
        match self.calls.entry(request_id) {
            Entry::Occupied(entry) => Err(Error::IllegalState(format!(
                "Request {} is already pending",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(sender);
                Ok(())
            }
        }
    }

    /// Register a waiter and return the receiving half
    pub fn register(&self, request_id: &str) -> Result<oneshot::Receiver<Result<CallResponse>>> {
        let (sender, receiver) = oneshot::channel();
        self.put(request_id.to_string(), sender)?;
        Ok(receiver)
    }

    /// Drop the waiter for `request_id`, returning whether one existed
    pub fn remove(&self, request_id: &str) -> bool {
        self.calls.remove(request_id).is_some()
    }

    /// Hand `response` to the caller waiting on its request id
    pub fn complete(&self, response: CallResponse) -> Result<()> {
        let (request_id, sender) = self.calls.remove(&response.request_id).ok_or_else(|| {
            Error::IllegalState(format!("No pending call for request {}", response.request_id))
        })?;

        if sender.send(Ok(response)).is_err() {
            debug!("Caller of request {} stopped waiting", request_id);
        }
        Ok(())
    }

    /// Fail every outstanding call, used when the owning connection dies
    pub fn fail_all(&self, reason: &str) {
        let ids: Vec<String> = self.calls.iter().map(|entry| entry.key().clone()).collect();
        if ids.is_empty() {
            return;
        }

        warn!("Failing {} pending calls: {}", ids.len(), reason);
        for id in ids {
            if let Some((_, sender)) = self.calls.remove(&id) {
                let _ = sender.send(Err(Error::Transport(reason.to_string())));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ResponseCode;

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let pending = PendingCalls::new();
        let receiver = pending.register("abc").unwrap();
        assert_eq!(pending.len(), 1);

        pending
            .complete(CallResponse::success("abc", b"8686 hello X".to_vec()))
            .unwrap();

        let response = receiver.await.unwrap().unwrap();
        assert_eq!(response.data.as_deref(), Some(&b"8686 hello X"[..]));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_complete_without_waiter_is_illegal_state() {
        let pending = PendingCalls::new();
        let result = pending.complete(CallResponse::fail("ghost", ResponseCode::Failure));
        assert!(matches!(result, Err(Error::IllegalState(_))));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let pending = PendingCalls::new();
        let _receiver = pending.register("abc").unwrap();
        assert!(matches!(pending.register("abc"), Err(Error::IllegalState(_))));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_remove_then_late_response() {
        let pending = PendingCalls::new();
        let _receiver = pending.register("late").unwrap();
        assert!(pending.remove("late"));
        assert!(!pending.remove("late"));

        let result = pending.complete(CallResponse::success("late", vec![]));
        assert!(matches!(result, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let pending = PendingCalls::new();
        let first = pending.register("first").unwrap();
        let second = pending.register("second").unwrap();

        pending.complete(CallResponse::success("second", b"2".to_vec())).unwrap();
        pending.complete(CallResponse::success("first", b"1".to_vec())).unwrap();

        assert_eq!(first.await.unwrap().unwrap().data.unwrap(), b"1");
        assert_eq!(second.await.unwrap().unwrap().data.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_fail_all() {
        let pending = PendingCalls::new();
        let a = pending.register("a").unwrap();
        let b = pending.register("b").unwrap();

        pending.fail_all("connection reset");

        assert!(matches!(a.await.unwrap(), Err(Error::Transport(_))));
        assert!(matches!(b.await.unwrap(), Err(Error::Transport(_))));
        assert!(pending.is_empty());
    }
}
