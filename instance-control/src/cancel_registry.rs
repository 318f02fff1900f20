//! Tracks the `CancelTag` half of every in-flight request so a
//! cancellation arriving by request id, job id, parent id or function id
//! can reach the right `schedule_queue::CancelSignal` (§4.5 "a request
//! may be canceled by its own id, or transitively by its job/parent/
//! function id"). Grounded on the teacher's `DashMap`-backed registries
//! (e.g. `blockmatrix/core/state/src/consensus.rs`'s peer table) rather
//! than a single mutex-guarded map, since registration/lookup here is
//! all single-key point access with no cross-key invariant to protect.

use dashmap::DashMap;
use schedule_queue::CancelTag;
use scheduler_shared::RequestId;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct Membership {
    job_id: Option<String>,
    parent_id: Option<String>,
    function_proxy_id: Option<String>,
}

/// Registration handle for one request's cancel tag and its secondary
/// keys. Auxiliary indices (`String`-keyed, since job id has no typed
/// representation in the data model) never own a tag directly — they
/// just fan out into `by_request` so there is exactly one cancellation
/// path regardless of which key is used to cancel.
#[derive(Default)]
pub struct CancellationRegistry {
    by_request: DashMap<RequestId, CancelTag>,
    memberships: DashMap<RequestId, Membership>,
    by_job: DashMap<String, Vec<RequestId>>,
    by_parent: DashMap<String, Vec<RequestId>>,
    by_function: DashMap<String, Vec<RequestId>>,
}

impl CancellationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(
        &self,
        request_id: RequestId,
        tag: CancelTag,
        job_id: Option<String>,
        parent_id: Option<String>,
        function_proxy_id: Option<String>,
    ) {
        self.by_request.insert(request_id, tag);
        if let Some(job_id) = &job_id {
            self.by_job.entry(job_id.clone()).or_default().push(request_id);
        }
        if let Some(parent_id) = &parent_id {
            self.by_parent.entry(parent_id.clone()).or_default().push(request_id);
        }
        if let Some(function_proxy_id) = &function_proxy_id {
            self.by_function
                .entry(function_proxy_id.clone())
                .or_default()
                .push(request_id);
        }
        self.memberships.insert(
            request_id,
            Membership {
                job_id,
                parent_id,
                function_proxy_id,
            },
        );
    }

    /// Drops every index entry for a request once it leaves flight
    /// (succeeded, failed terminally, or was canceled) so the auxiliary
    /// maps don't grow unbounded.
    pub fn unregister(&self, request_id: &RequestId) {
        self.by_request.remove(request_id);
        if let Some((_, membership)) = self.memberships.remove(request_id) {
            if let Some(job_id) = membership.job_id {
                remove_from_index(&self.by_job, &job_id, request_id);
            }
            if let Some(parent_id) = membership.parent_id {
                remove_from_index(&self.by_parent, &parent_id, request_id);
            }
            if let Some(function_proxy_id) = membership.function_proxy_id {
                remove_from_index(&self.by_function, &function_proxy_id, request_id);
            }
        }
    }

    pub fn cancel_by_request(&self, request_id: &RequestId, reason: &str) -> bool {
        match self.by_request.get(request_id) {
            Some(tag) => {
                tag.cancel(reason.to_string());
                true
            }
            None => false,
        }
    }

    pub fn cancel_by_job(&self, job_id: &str, reason: &str) -> usize {
        self.cancel_index(&self.by_job, job_id, reason)
    }

    pub fn cancel_by_parent(&self, parent_id: &str, reason: &str) -> usize {
        self.cancel_index(&self.by_parent, parent_id, reason)
    }

    pub fn cancel_by_function(&self, function_proxy_id: &str, reason: &str) -> usize {
        self.cancel_index(&self.by_function, function_proxy_id, reason)
    }

    fn cancel_index(&self, index: &DashMap<String, Vec<RequestId>>, key: &str, reason: &str) -> usize {
        let Some(request_ids) = index.get(key).map(|entry| entry.value().clone()) else {
            return 0;
        };
        let mut canceled = 0;
        for request_id in request_ids {
            if self.cancel_by_request(&request_id, reason) {
                canceled += 1;
            }
        }
        canceled
    }

    pub fn len(&self) -> usize {
        self.by_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_request.is_empty()
    }
}

fn remove_from_index(index: &DashMap<String, Vec<RequestId>>, key: &str, request_id: &RequestId) {
    if let Some(mut entry) = index.get_mut(key) {
        entry.retain(|id| id != request_id);
        if entry.is_empty() {
            drop(entry);
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_by_request_reaches_the_registered_signal() {
        let registry = CancellationRegistry::new();
        let (tag, signal) = CancelTag::new();
        let request_id = RequestId::random();
        registry.register(request_id, tag, None, None, None);

        assert!(registry.cancel_by_request(&request_id, "client withdrew"));
        assert!(signal.is_cancelled());
    }

    #[test]
    fn cancel_by_job_fans_out_to_every_member_request() {
        let registry = CancellationRegistry::new();
        let (tag_a, signal_a) = CancelTag::new();
        let (tag_b, signal_b) = CancelTag::new();
        let request_a = RequestId::random();
        let request_b = RequestId::random();
        registry.register(request_a, tag_a, Some("job-1".to_string()), None, None);
        registry.register(request_b, tag_b, Some("job-1".to_string()), None, None);

        let count = registry.cancel_by_job("job-1", "job canceled");
        assert_eq!(count, 2);
        assert!(signal_a.is_cancelled());
        assert!(signal_b.is_cancelled());
    }

    #[test]
    fn unregister_removes_request_from_all_indices() {
        let registry = CancellationRegistry::new();
        let (tag, _signal) = CancelTag::new();
        let request_id = RequestId::random();
        registry.register(
            request_id,
            tag,
            Some("job-1".to_string()),
            Some("parent-1".to_string()),
            None,
        );
        registry.unregister(&request_id);

        assert_eq!(registry.len(), 0);
        assert_eq!(registry.cancel_by_job("job-1", "unused"), 0);
    }
}
