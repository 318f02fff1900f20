//! Cancel tag/signal pair (§4.4, §5 "every long operation takes an
//! explicit cancel-future"). `CancelTag` is held by the canceling side
//! (`instance-control`'s cancellation registry); `CancelSignal` is handed
//! to the queue so a pending or in-flight decision can observe it.

use tokio::sync::watch;

/// The canceling half. Cloning shares the same underlying reason slot:
/// any clone calling `cancel` resolves every `CancelSignal` derived from
/// the same `new()` call.
#[derive(Clone)]
pub struct CancelTag(watch::Sender<Option<String>>);

/// The observing half, read by the schedule queue while a request is
/// queued or being decided.
#[derive(Clone)]
pub struct CancelSignal(watch::Receiver<Option<String>>);

impl CancelTag {
    /// Creates a fresh tag/signal pair, uncancelled.
    pub fn new() -> (CancelTag, CancelSignal) {
        let (tx, rx) = watch::channel(None);
        (CancelTag(tx), CancelSignal(rx))
    }

    /// Sets the cancel reason. Idempotent: a second call overwrites the
    /// reason but does not un-cancel.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.0.send(Some(reason.into()));
    }
}

impl CancelSignal {
    /// A signal that will never fire, for call sites with no cancellation
    /// source (e.g. a synthetic decision run from a test).
    pub fn never() -> Self {
        let (_, signal) = CancelTag::new();
        signal
    }

    pub fn reason(&self) -> Option<String> {
        self.0.borrow().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Suspends until a reason is set, returning it. A dropped `CancelTag`
    /// resolves this with a synthetic reason rather than hanging forever.
    pub async fn cancelled(&mut self) -> String {
        loop {
            if let Some(reason) = self.reason() {
                return reason;
            }
            if self.0.changed().await.is_err() {
                return "cancel tag dropped".to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_observes_cancellation_set_after_creation() {
        let (tag, signal) = CancelTag::new();
        assert!(!signal.is_cancelled());
        tag.cancel("superseded by a newer request");
        assert_eq!(
            signal.reason().as_deref(),
            Some("superseded by a newer request")
        );
    }

    #[tokio::test]
    async fn clones_of_the_same_tag_share_one_signal() {
        let (tag, signal) = CancelTag::new();
        let tag2 = tag.clone();
        tag2.cancel("canceled via clone");
        assert!(signal.is_cancelled());
    }
}
