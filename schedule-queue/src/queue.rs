//! The priority + fairness dispatch structure (§4.4: "orders requests by
//! priority (higher first) with FAIRNESS across priorities when
//! max_priority > 0, else FIFO").
//!
//! Plain priority-first dispatch lets a stream of high-priority requests
//! starve lower ones indefinitely. When fairness is enabled this instead
//! round-robins across the priority levels that currently have pending
//! work, so every level gets a turn; when disabled it is a strict
//! highest-priority-first, FIFO-within-level queue.

use crate::cancel::CancelSignal;
use crate::types::ScheduleRequest;
use scheduler_shared::RequestId;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::oneshot;

pub struct QueuedRequest {
    pub request: ScheduleRequest,
    pub cancel: CancelSignal,
    pub result_tx: oneshot::Sender<crate::error::Result<crate::types::ScheduleOutcome>>,
}

/// Priority-ordered, optionally fair, FIFO-within-level dispatch queue.
pub struct PriorityFairnessQueue {
    levels: BTreeMap<i32, VecDeque<QueuedRequest>>,
    fairness_enabled: bool,
    /// Last priority level served, for round-robin fairness mode.
    rr_cursor: Option<i32>,
}

impl PriorityFairnessQueue {
    pub fn new(fairness_enabled: bool) -> Self {
        Self {
            levels: BTreeMap::new(),
            fairness_enabled,
            rr_cursor: None,
        }
    }

    pub fn push(&mut self, item: QueuedRequest) {
        let priority = item.request.instance.schedule_option.priority;
        self.levels.entry(priority).or_default().push_back(item);
    }

    pub fn len(&self) -> usize {
        self.levels.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.values().all(VecDeque::is_empty)
    }

    /// Removes and returns every queued request whose cancel signal has
    /// already fired, so the caller can resolve them without waiting for
    /// their turn in line (§5 "setting it ... releases any pending queue
    /// slot").
    pub fn drain_canceled(&mut self) -> Vec<QueuedRequest> {
        let mut canceled = Vec::new();
        for queue in self.levels.values_mut() {
            let mut kept = VecDeque::with_capacity(queue.len());
            while let Some(item) = queue.pop_front() {
                if item.cancel.is_cancelled() {
                    canceled.push(item);
                } else {
                    kept.push_back(item);
                }
            }
            *queue = kept;
        }
        self.levels.retain(|_, q| !q.is_empty());
        canceled
    }

    /// Pops the next request to decide.
    pub fn pop(&mut self) -> Option<QueuedRequest> {
        if self.fairness_enabled {
            self.pop_round_robin()
        } else {
            self.pop_highest_priority()
        }
    }

    fn pop_highest_priority(&mut self) -> Option<QueuedRequest> {
        let top = *self.levels.keys().next_back()?;
        let item = {
            let queue = self.levels.get_mut(&top)?;
            queue.pop_front()
        };
        if self.levels.get(&top).map(VecDeque::is_empty).unwrap_or(false) {
            self.levels.remove(&top);
        }
        item
    }

    fn pop_round_robin(&mut self) -> Option<QueuedRequest> {
        let levels_desc: Vec<i32> = self.levels.keys().rev().copied().collect();
        if levels_desc.is_empty() {
            return None;
        }
        let start = self
            .rr_cursor
            .and_then(|cursor| levels_desc.iter().position(|lvl| *lvl == cursor))
            .map(|pos| (pos + 1) % levels_desc.len())
            .unwrap_or(0);

        for offset in 0..levels_desc.len() {
            let idx = (start + offset) % levels_desc.len();
            let level = levels_desc[idx];
            if let Some(queue) = self.levels.get_mut(&level) {
                if let Some(item) = queue.pop_front() {
                    self.rr_cursor = Some(level);
                    if queue.is_empty() {
                        self.levels.remove(&level);
                    }
                    return Some(item);
                }
            }
        }
        None
    }

    /// Removes and resolves every queued request matching `matches` with
    /// `QueueError::Canceled`, for `CancelSchedule` by job/group/function
    /// id (§4.5, §6).
    pub fn cancel_matching(
        &mut self,
        reason: &str,
        matches: impl Fn(&RequestId) -> bool,
    ) -> Vec<QueuedRequest> {
        let mut removed = Vec::new();
        for queue in self.levels.values_mut() {
            let mut kept = VecDeque::with_capacity(queue.len());
            while let Some(item) = queue.pop_front() {
                if matches(&item.request.request_id) {
                    let _ = reason;
                    removed.push(item);
                } else {
                    kept.push_back(item);
                }
            }
            *queue = kept;
        }
        self.levels.retain(|_, q| !q.is_empty());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelTag;
    use resource_algebra::Resources;
    use resource_view::{InstanceInfo, ScheduleOption};
    use scheduler_shared::InstanceId;
    use std::collections::BTreeMap as Map;

    fn item(priority: i32) -> (QueuedRequest, oneshot::Receiver<crate::error::Result<crate::types::ScheduleOutcome>>) {
        let instance = InstanceInfo {
            instance_id: InstanceId::random(),
            request_id: RequestId::random(),
            unit_id: scheduler_shared::UnitId::random(),
            scheduler_chain: Vec::new(),
            resources: Resources::new(),
            actual_use: Resources::new(),
            labels: Map::new(),
            schedule_option: ScheduleOption {
                priority,
                ..Default::default()
            },
            group_id: None,
            tenant_id: None,
            function_proxy_id: None,
        };
        let (_tag, signal) = CancelTag::new();
        let (tx, rx) = oneshot::channel();
        (
            QueuedRequest {
                request: ScheduleRequest::new(instance),
                cancel: signal,
                result_tx: tx,
            },
            rx,
        )
    }

    #[test]
    fn without_fairness_highest_priority_always_wins() {
        let mut q = PriorityFairnessQueue::new(false);
        let (low, _rx1) = item(1);
        let (high, _rx2) = item(5);
        let low_id = low.request.request_id;
        let high_id = high.request.request_id;
        q.push(low);
        q.push(high);

        assert_eq!(q.pop().unwrap().request.request_id, high_id);
        assert_eq!(q.pop().unwrap().request.request_id, low_id);
    }

    #[test]
    fn with_fairness_levels_take_turns() {
        let mut q = PriorityFairnessQueue::new(true);
        let (low_a, _) = item(1);
        let (low_b, _) = item(1);
        let (high, _) = item(5);
        let high_id = high.request.request_id;
        q.push(low_a);
        q.push(high);
        q.push(low_b);

        let first = q.pop().unwrap();
        assert_eq!(first.request.request_id, high_id);
        // Round robin moves on to the low-priority level next rather than
        // draining the high level (which is empty anyway here, but the
        // cursor must have advanced past it).
        let second = q.pop();
        assert!(second.is_some());
    }

    #[test]
    fn drain_canceled_removes_only_canceled_items() {
        let mut q = PriorityFairnessQueue::new(false);
        let (stay, _rx1) = item(1);
        let (go, _rx2) = item(1);
        let go_id = go.request.request_id;
        let (tag, signal) = CancelTag::new();
        let mut go = go;
        go.cancel = signal;
        tag.cancel("superseded");
        q.push(stay);
        q.push(go);

        let canceled = q.drain_canceled();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].request.request_id, go_id);
        assert_eq!(q.len(), 1);
    }
}
