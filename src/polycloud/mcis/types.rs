/*
 * Copyright (C) 2025 The Polycloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-VM lifecycle states. `Creating`, `Rebooting`, and `Terminating` are
/// the pending states; everything else is terminal until the next action.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum VmStatus {
    Creating,
    Running,
    Suspended,
    Rebooting,
    Terminating,
    Terminated,
    Failed,
}

impl Default for VmStatus {
    fn default() -> Self {
        VmStatus::Creating
    }
}

impl VmStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VmStatus::Creating => "Creating",
            VmStatus::Running => "Running",
            VmStatus::Suspended => "Suspended",
            VmStatus::Rebooting => "Rebooting",
            VmStatus::Terminating => "Terminating",
            VmStatus::Terminated => "Terminated",
            VmStatus::Failed => "Failed",
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(
            self,
            VmStatus::Creating | VmStatus::Rebooting | VmStatus::Terminating
        )
    }
}

/// Maps the free-form status string the driver reports into the state
/// machine. In-between driver states collapse onto the closest stable state;
/// a vanished VM reads as terminated; anything unrecognized is a failure.
pub fn map_driver_vm_status(raw: &str) -> VmStatus {
    match raw {
        "Creating" => VmStatus::Creating,
        "Running" | "Resuming" => VmStatus::Running,
        "Suspended" | "Suspending" => VmStatus::Suspended,
        "Rebooting" => VmStatus::Rebooting,
        "Terminating" => VmStatus::Terminating,
        "Terminated" | "NotExist" => VmStatus::Terminated,
        _ => VmStatus::Failed,
    }
}

/// Control verbs accepted on an MCIS or a single VM.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VmAction {
    Suspend,
    Resume,
    Reboot,
    Terminate,
    Refine,
    Continue,
}

impl VmAction {
    pub fn as_str(self) -> &'static str {
        match self {
            VmAction::Suspend => "suspend",
            VmAction::Resume => "resume",
            VmAction::Reboot => "reboot",
            VmAction::Terminate => "terminate",
            VmAction::Refine => "refine",
            VmAction::Continue => "continue",
        }
    }

    pub fn parse(verb: &str) -> Option<VmAction> {
        match verb {
            "suspend" => Some(VmAction::Suspend),
            "resume" => Some(VmAction::Resume),
            "reboot" => Some(VmAction::Reboot),
            "terminate" => Some(VmAction::Terminate),
            "refine" => Some(VmAction::Refine),
            "continue" => Some(VmAction::Continue),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegionZone {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
}

/// One VM request inside an MCIS create. `sub_group_size > 1` expands into
/// sibling VMs named `{name}-{idx}` sharing the sub-group.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmReq {
    pub name: String,
    #[serde(default = "default_sub_group_size")]
    pub sub_group_size: u32,
    pub connection_name: String,
    pub spec_id: String,
    pub image_id: String,
    pub v_net_id: String,
    pub subnet_id: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub ssh_key_id: String,
    #[serde(default)]
    pub data_disk_ids: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub vm_user_account: String,
}

fn default_sub_group_size() -> u32 {
    1
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McisReq {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub vm: Vec<VmReq>,
    #[serde(default = "default_install_mon_agent")]
    pub install_mon_agent: bool,
    #[serde(default)]
    pub label: HashMap<String, String>,
    #[serde(default)]
    pub system_label: String,
    /// When set, VM records are persisted but provisioning is deferred until
    /// a `continue` action arrives.
    #[serde(default)]
    pub hold: bool,
}

fn default_install_mon_agent() -> bool {
    true
}

/// Persisted per-VM record. The `status` field is derived from driver
/// observations and control transitions, never written by external callers.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub sub_group_id: String,
    pub connection_name: String,
    pub spec_id: String,
    pub image_id: String,
    pub v_net_id: String,
    pub subnet_id: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub ssh_key_id: String,
    #[serde(default)]
    pub data_disk_ids: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: VmStatus,
    #[serde(default)]
    pub target_status: String,
    #[serde(default)]
    pub target_action: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub ssh_port: String,
    #[serde(default)]
    pub region: RegionZone,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub vm_user_account: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub mon_agent_status: String,
}

/// Persisted MCIS record. The `vm` array is assembled from child keys on
/// reads and is never stored inline.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McisInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub target_status: String,
    #[serde(default)]
    pub target_action: String,
    #[serde(default)]
    pub install_mon_agent: bool,
    #[serde(default)]
    pub label: HashMap<String, String>,
    #[serde(default)]
    pub system_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vm: Vec<VmInfo>,
}

pub fn mcis_prefix(ns_id: &str) -> String {
    format!("/ns/{}/mcis", ns_id)
}

pub fn mcis_key(ns_id: &str, mcis_id: &str) -> String {
    format!("{}/{}", mcis_prefix(ns_id), mcis_id)
}

pub fn vm_key(ns_id: &str, mcis_id: &str, vm_id: &str) -> String {
    format!("{}/vm/{}", mcis_key(ns_id, mcis_id), vm_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_status_strings_map_into_state_machine() {
        assert_eq!(map_driver_vm_status("Running"), VmStatus::Running);
        assert_eq!(map_driver_vm_status("Resuming"), VmStatus::Running);
        assert_eq!(map_driver_vm_status("Suspending"), VmStatus::Suspended);
        assert_eq!(map_driver_vm_status("NotExist"), VmStatus::Terminated);
        assert_eq!(map_driver_vm_status("SomethingOdd"), VmStatus::Failed);
    }

    #[test]
    fn action_verbs_round_trip() {
        for action in [
            VmAction::Suspend,
            VmAction::Resume,
            VmAction::Reboot,
            VmAction::Terminate,
            VmAction::Refine,
            VmAction::Continue,
        ] {
            assert_eq!(VmAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(VmAction::parse("restart"), None);
    }

    #[test]
    fn keys_mirror_object_hierarchy() {
        assert_eq!(mcis_key("ns-a", "m1"), "/ns/ns-a/mcis/m1");
        assert_eq!(vm_key("ns-a", "m1", "web-1"), "/ns/ns-a/mcis/m1/vm/web-1");
    }

    #[test]
    fn sub_group_size_defaults_to_one() {
        let req: VmReq = serde_json::from_str(
            r#"{"name":"web","connectionName":"aws-1","specId":"s","imageId":"i",
                "vNetId":"v","subnetId":"sn","sshKeyId":"k"}"#,
        )
        .expect("decode vm request");
        assert_eq!(req.sub_group_size, 1);
    }
}
