//! Heterogeneous-group bind metadata (§4.6 bind phase): builds the
//! `FunctionGroupRunningInfo` every member's agent needs to locate its
//! peers, with a **global rank id** assigned per device in
//! {node id ascending, device id ascending} order.
//!
//! There is no dedicated "create options" concept in the data model
//! (§3's `InstanceInfo` carries only a plain `labels` map), so this is
//! injected as a `labels` entry under the `FUNCTION_GROUP_RUNNING_INFO`
//! key — the natural place for agent-facing metadata that isn't itself a
//! scheduling input.

use scheduler_shared::UnitId;
use serde::{Deserialize, Serialize};

pub const FUNCTION_GROUP_RUNNING_INFO_LABEL: &str = "FUNCTION_GROUP_RUNNING_INFO";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRank {
    pub node_id: UnitId,
    pub device_id: String,
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionGroupRunningInfo {
    pub devices: Vec<DeviceRank>,
}

/// One member's placement, as seen by the bind phase: which unit it
/// landed on and which device ids (if any) it was allocated.
pub struct MemberPlacement {
    pub node_id: UnitId,
    pub device_ids: Vec<String>,
}

/// Flattens every member's device ids, sorts by {node id, device id}, and
/// assigns a 0-based global rank, building the JSON blob that gets
/// injected on every member before Bind.
pub fn build_function_group_running_info(members: &[MemberPlacement]) -> FunctionGroupRunningInfo {
    let mut devices: Vec<DeviceRank> = members
        .iter()
        .flat_map(|member| {
            member.device_ids.iter().map(|device_id| DeviceRank {
                node_id: member.node_id,
                device_id: device_id.clone(),
                rank: 0,
            })
        })
        .collect();
    devices.sort_by(|a, b| a.node_id.cmp(&b.node_id).then_with(|| a.device_id.cmp(&b.device_id)));
    for (rank, device) in devices.iter_mut().enumerate() {
        device.rank = rank as u32;
    }
    FunctionGroupRunningInfo { devices }
}

impl FunctionGroupRunningInfo {
    pub fn to_label_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_devices_ascending_by_node_then_device() {
        let node_a = UnitId::random();
        let node_b = UnitId::random();
        let (first, second) = if node_a < node_b { (node_a, node_b) } else { (node_b, node_a) };

        let members = vec![
            MemberPlacement {
                node_id: second,
                device_ids: vec!["gpu-1".to_string(), "gpu-0".to_string()],
            },
            MemberPlacement {
                node_id: first,
                device_ids: vec!["gpu-0".to_string()],
            },
        ];
        let info = build_function_group_running_info(&members);
        assert_eq!(info.devices.len(), 3);
        assert_eq!(info.devices[0].node_id, first);
        assert_eq!(info.devices[0].rank, 0);
        assert_eq!(info.devices[1].node_id, second);
        assert_eq!(info.devices[1].device_id, "gpu-0");
        assert_eq!(info.devices[1].rank, 1);
        assert_eq!(info.devices[2].device_id, "gpu-1");
        assert_eq!(info.devices[2].rank, 2);
    }

    #[test]
    fn empty_members_produce_empty_info() {
        let info = build_function_group_running_info(&[]);
        assert!(info.devices.is_empty());
        assert_eq!(info.to_label_value(), "{\"devices\":[]}");
    }
}
