//! Assembles the domain-tier actor stack: one `ResourceView` behind a
//! `ScheduleQueue`, fed by `instance-control`/`group-control` on top of
//! `underlayer::UnderlayerManager`, plus the background resource-poller
//! and heartbeat-sweep tasks. Mirrors the teacher's
//! `blockmatrix/core/examples/src/scheduler-demo.rs` construction order
//! (view, then queue, then the controllers on top) generalized from a
//! demo into a long-running process.

use async_trait::async_trait;
use group_control::GroupController;
use instance_control::{CancellationRegistry, InstanceController, UnderlayerPreemptHook};
use resource_view::{LocalWindowSource, ResourcePoller, ResourceUnitChanges, ResourceView, ResourceViewSettings};
use schedule_queue::ScheduleQueue;
use schedule_recorder::ScheduleRecorder;
use scheduler_shared::{SchedulerConfig, UnitId};
use scheduling_framework::FrameworkConfig;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use underlayer::UnderlayerManager;

/// The running scheduler process: every actor the driver owns plus the
/// config it was built from, kept around so background tasks can read
/// timing knobs without re-threading them through every call site.
pub struct Scheduler {
    pub node_id: UnitId,
    pub queue: ScheduleQueue,
    pub instance_control: InstanceController,
    pub group_control: GroupController,
    pub underlayer: Arc<UnderlayerManager>,
    view: Arc<RwLock<ResourceView>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub async fn build(config: SchedulerConfig) -> anyhow::Result<Self> {
        let node_id = resolve_node_id(config.node_id.as_deref());
        info!(%node_id, "resolved node id");

        let view_settings = ResourceViewSettings {
            require_cpu_memory: true,
            tenant_affinity_enabled: true,
            tenant_default_idle: config.resource_view.idle_to_recycle,
        };
        let view = Arc::new(RwLock::new(ResourceView::new(node_id, view_settings)));

        let recorder = Arc::new(ScheduleRecorder::new());
        let queue = ScheduleQueue::new(
            view.clone(),
            FrameworkConfig::default(),
            recorder.clone(),
            config.queue.fairness_enabled,
        );

        let underlayer = Arc::new(UnderlayerManager::new(
            config.underlayer.heartbeat_interval,
            config.underlayer.heartbeat_timeout_multiplier,
        ));

        let preempt_hook: Arc<dyn schedule_queue::PreemptHook> =
            Arc::new(UnderlayerPreemptHook::new(underlayer.clone()));
        queue.set_preempt_hook(preempt_hook).await;

        let cancel_registry = CancellationRegistry::new();
        let instance_control = InstanceController::new(
            queue.clone(),
            underlayer.clone(),
            cancel_registry,
            config.control.clone(),
            true,
        );

        let group_control = GroupController::new(
            queue.clone(),
            underlayer.clone(),
            recorder,
            config.control.clone(),
        );

        Ok(Self {
            node_id,
            queue,
            instance_control,
            group_control,
            underlayer,
            view,
            config,
        })
    }

    /// Spawns the resource poller and the heartbeat-timeout sweep as
    /// background tasks, both stopped by the same shutdown watch channel
    /// the driver's signal handler flips on exit.
    pub fn spawn_background_tasks(&self, shutdown_rx: watch::Receiver<bool>) {
        let poller = ResourcePoller::new(
            self.view.clone(),
            Arc::new(UnderlayerWindowSource {
                underlayer: self.underlayer.clone(),
            }),
            self.config.resource_view.poll_interval,
        );
        tokio::spawn(poller.run(shutdown_rx.clone()));

        let underlayer = self.underlayer.clone();
        let heartbeat_interval = self.config.underlayer.heartbeat_interval;
        let mut shutdown_rx = shutdown_rx;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for unit_id in underlayer.check_health().await {
                            warn!(%unit_id, "local marked unavailable by heartbeat timeout");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }
}

fn resolve_node_id(raw: Option<&str>) -> UnitId {
    match raw {
        Some(raw) => UnitId::parse(raw).unwrap_or_else(|_| {
            warn!(%raw, "--node-id is not a valid UUID, generating a random one instead");
            UnitId::random()
        }),
        None => UnitId::random(),
    }
}

/// Bridges the domain-side poller's transport-agnostic `LocalWindowSource`
/// seam onto `UnderlayerManager::pull_window` over the real QUIC
/// connections to local proxies.
struct UnderlayerWindowSource {
    underlayer: Arc<UnderlayerManager>,
}

#[async_trait]
impl LocalWindowSource for UnderlayerWindowSource {
    async fn pull_window(&self, local_id: UnitId, since_revision: u64) -> Option<ResourceUnitChanges> {
        match self.underlayer.pull_window(local_id, since_revision).await {
            Ok(changes) => Some(changes),
            Err(err) => {
                tracing::debug!(%local_id, %err, "resource window pull failed, retrying next tick");
                None
            }
        }
    }
}
