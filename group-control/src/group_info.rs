//! §3 `GroupInfo` — the persisted record of a gang/range group, and §6's
//! "groups are serialized as JSON under key
//! `<table-prefix>/groups/<request-id>/<group-id>`" persistence seam.
//!
//! The metastore client itself is out of scope (spec.md §1); `GroupStore`
//! is the seam the driver plugs a concrete client into, grounded on the
//! teacher's `StorageEngine` trait
//! (`blockmatrix/core/state/src/storage.rs`: `get`/`set`/`delete`/
//! `list_keys`, here made `async` and keyed by `String` instead of raw
//! bytes since every value here is already a JSON document).

use crate::error::{GroupError, Result};
use async_trait::async_trait;
use scheduler_shared::{GroupId, RequestId};
use schedule_queue::GroupPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// §3 `GroupInfo.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Scheduling,
    Running,
    Failed,
}

/// §3 `GroupInfo.group_opts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOpts {
    pub timeout_ms: u64,
    pub group_policy: GroupPolicy,
    pub same_running_lifecycle: bool,
}

impl GroupOpts {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// §3 `GroupInfo`: the persisted, replayable description of a group.
/// Exclusively owned by `owner_proxy` (§3 "Ownership") — a node recovering
/// groups on startup keeps only the ones whose `owner_proxy` names itself
/// and discards (or, at the domain, garbage-collects) the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub request_id: RequestId,
    pub trace_id: String,
    pub group_id: GroupId,
    pub parent_id: Option<String>,
    pub owner_proxy: String,
    pub rgroup_name: Option<String>,
    pub status: GroupStatus,
    pub group_opts: GroupOpts,
    /// Instance ids of the group's primary (non-range) requests, in the
    /// order §5 requires the decision/reserve/bind phases to agree with.
    pub request_ids: Vec<RequestId>,
    /// Instance ids of range-scheduled members, same ordering rule.
    pub range_request_ids: Vec<RequestId>,
}

impl GroupInfo {
    /// §6: `<table-prefix>/groups/<request-id>/<group-id>`.
    pub fn storage_key(table_prefix: &str, request_id: RequestId, group_id: GroupId) -> String {
        format!("{table_prefix}/groups/{request_id}/{group_id}")
    }

    pub fn key(&self, table_prefix: &str) -> String {
        Self::storage_key(table_prefix, self.request_id, self.group_id)
    }
}

/// The persistence seam §6 names ("groups are serialized as JSON ...").
/// A concrete implementation (etcd, the metastore client, a local file)
/// is a driver-level concern; this crate only needs get/put/delete/list
/// over string keys, mirroring the teacher's `StorageEngine` surface.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn put(&self, key: &str, value: String) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Writes `info` to `store` at its §6 key.
pub async fn save_group(store: &dyn GroupStore, table_prefix: &str, info: &GroupInfo) -> Result<()> {
    let body = serde_json::to_string(info).map_err(|err| GroupError::ParamInvalid {
        message: format!("failed to serialize group {}: {err}", info.group_id),
    })?;
    store.put(&info.key(table_prefix), body).await
}

/// Removes a group's persisted record once it reaches a terminal state.
pub async fn delete_group(
    store: &dyn GroupStore,
    table_prefix: &str,
    request_id: RequestId,
    group_id: GroupId,
) -> Result<()> {
    store
        .delete(&GroupInfo::storage_key(table_prefix, request_id, group_id))
        .await
}

/// §6 "On local startup, all groups are read; those whose `owner_proxy`
/// equals this node are recovered; others are ignored (or
/// garbage-collected on domain recovery)." Returns only the groups this
/// node owns; the caller is responsible for re-driving each through
/// `GroupController::schedule_group`.
pub async fn recover_owned_groups(
    store: &dyn GroupStore,
    table_prefix: &str,
    this_node: &str,
) -> Result<Vec<GroupInfo>> {
    let prefix = format!("{table_prefix}/groups/");
    let keys = store.list(&prefix).await?;
    let mut owned = Vec::new();
    for key in keys {
        let Some(body) = store.get(&key).await? else {
            continue;
        };
        let info: GroupInfo = match serde_json::from_str(&body) {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(%key, %err, "skipping unparsable persisted group");
                continue;
            }
        };
        if info.owner_proxy == this_node {
            owned.push(info);
        }
    }
    Ok(owned)
}

/// In-memory `GroupStore` used by tests and by a domain-recovery process
/// that does not need cross-restart durability of its own (the owning
/// local proxy's metastore is the durable copy per §3's ownership rule).
#[derive(Default)]
pub struct InMemoryGroupStore {
    entries: parking_lot::RwLock<std::collections::BTreeMap<String, String>>,
}

impl InMemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(owner: &str) -> GroupInfo {
        GroupInfo {
            request_id: RequestId::random(),
            trace_id: "trace".to_string(),
            group_id: GroupId::random(),
            parent_id: None,
            owner_proxy: owner.to_string(),
            rgroup_name: None,
            status: GroupStatus::Scheduling,
            group_opts: GroupOpts {
                timeout_ms: 5_000,
                group_policy: GroupPolicy::Gang,
                same_running_lifecycle: true,
            },
            request_ids: vec![RequestId::random()],
            range_request_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_then_recover_returns_only_owned_groups() {
        let store = InMemoryGroupStore::new();
        let mine = sample("local-a");
        let theirs = sample("local-b");
        save_group(&store, "yr", &mine).await.unwrap();
        save_group(&store, "yr", &theirs).await.unwrap();

        let recovered = recover_owned_groups(&store, "yr", "local-a").await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].group_id, mine.group_id);
    }

    #[tokio::test]
    async fn delete_removes_the_persisted_record() {
        let store = InMemoryGroupStore::new();
        let info = sample("local-a");
        save_group(&store, "yr", &info).await.unwrap();
        delete_group(&store, "yr", info.request_id, info.group_id)
            .await
            .unwrap();
        assert!(recover_owned_groups(&store, "yr", "local-a")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn storage_key_matches_the_spec_scheme() {
        let request_id = RequestId::random();
        let group_id = GroupId::random();
        let key = GroupInfo::storage_key("yr", request_id, group_id);
        assert_eq!(key, format!("yr/groups/{request_id}/{group_id}"));
    }
}
