//! Domain-side resource poller (§2 "Resource Poller", §4.2): on a timer,
//! pulls each known local's pending window and applies it to the domain's
//! replicated `ResourceView` via `update_resource_unit_delta`.
//!
//! The actual transport to a local proxy is out of scope for this crate
//! (§1 leaves wire protocols to `underlayer`); `LocalWindowSource` is the
//! seam a caller wires to whatever pulls `ResourceUnitChanges` off the
//! wire, mirroring the original's "domain poller calls
//! MergeLocalResourceViewChanges" step without coupling this crate to a
//! concrete transport.

use crate::change::ResourceUnitChanges;
use crate::view::ResourceView;
use async_trait::async_trait;
use scheduler_shared::UnitId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Pulls a bounded window of changes for one local, starting strictly
/// after `since_revision`. Returns `None` when the local is unreachable
/// this tick (a transient condition the poller just retries next tick).
#[async_trait]
pub trait LocalWindowSource: Send + Sync {
    async fn pull_window(&self, local_id: UnitId, since_revision: u64) -> Option<ResourceUnitChanges>;
}

/// Drives the periodic pull-and-apply loop over every local the domain's
/// `ResourceView` currently replicates (§4.2 default interval 1000ms).
pub struct ResourcePoller {
    view: Arc<RwLock<ResourceView>>,
    source: Arc<dyn LocalWindowSource>,
    interval: Duration,
}

impl ResourcePoller {
    pub fn new(view: Arc<RwLock<ResourceView>>, source: Arc<dyn LocalWindowSource>, interval: Duration) -> Self {
        Self { view, source, interval }
    }

    /// Runs the poll loop until `shutdown` resolves. Intended to be
    /// `tokio::spawn`ed by the driver alongside the schedule queue actors.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("resource poller shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every known local: pull its window, apply it. Public
    /// so tests (and a caller that wants manual cadence control) can drive
    /// it without a background task.
    pub async fn poll_once(&self) {
        let locals: Vec<UnitId> = self.view.read().await.known_locals().collect();
        for local_id in locals {
            let since = match self.view.read().await.replica_last_applied_revision(&local_id) {
                Some(rev) => rev,
                None => continue,
            };
            let Some(changes) = self.source.pull_window(local_id, since).await else {
                continue;
            };
            if changes.is_empty() && changes.end_revision == changes.start_revision {
                continue;
            }
            let mut view = self.view.write().await;
            if let Err(err) = view.update_resource_unit_delta(changes) {
                warn!(%local_id, %err, "failed to apply polled resource window");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ResourceUnit;
    use crate::view::ResourceViewSettings;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StaticSource {
        calls: AtomicU64,
    }

    #[async_trait]
    impl LocalWindowSource for StaticSource {
        async fn pull_window(&self, _local_id: UnitId, _since_revision: u64) -> Option<ResourceUnitChanges> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    fn domain_view_with_one_replica() -> (Arc<RwLock<ResourceView>>, UnitId) {
        let domain_id = UnitId::random();
        let local_id = UnitId::random();
        let mut view = ResourceView::new(domain_id, ResourceViewSettings::default());
        let unit = ResourceUnit::new(local_id, "local", "test-owner");
        view.add_resource_unit_with_url(unit, "local://test".to_string(), 0).unwrap();
        (Arc::new(RwLock::new(view)), local_id)
    }

    #[tokio::test]
    async fn polls_every_known_local_once_per_tick() {
        let (view, _local_id) = domain_view_with_one_replica();
        let source = Arc::new(StaticSource { calls: AtomicU64::new(0) });
        let poller = ResourcePoller::new(view, source.clone(), Duration::from_millis(10));
        poller.poll_once().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_view_polls_nothing() {
        let domain_id = UnitId::random();
        let view = Arc::new(RwLock::new(ResourceView::new(domain_id, ResourceViewSettings::default())));
        let source = Arc::new(StaticSource { calls: AtomicU64::new(0) });
        let poller = ResourcePoller::new(view, source.clone(), Duration::from_millis(10));
        poller.poll_once().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
