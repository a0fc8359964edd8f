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

use crate::polycloud::driver::types::KeyValue;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ClusterStatus {
    Creating,
    Active,
    Inactive,
    Updating,
    Deleting,
    Failed,
}

impl Default for ClusterStatus {
    fn default() -> Self {
        ClusterStatus::Creating
    }
}

impl ClusterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Creating => "Creating",
            ClusterStatus::Active => "Active",
            ClusterStatus::Inactive => "Inactive",
            ClusterStatus::Updating => "Updating",
            ClusterStatus::Deleting => "Deleting",
            ClusterStatus::Failed => "Failed",
        }
    }
}

pub fn map_driver_cluster_status(raw: &str) -> ClusterStatus {
    match raw {
        "Creating" => ClusterStatus::Creating,
        "Active" | "Running" => ClusterStatus::Active,
        "Inactive" => ClusterStatus::Inactive,
        "Updating" => ClusterStatus::Updating,
        "Deleting" => ClusterStatus::Deleting,
        _ => ClusterStatus::Failed,
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupReq {
    /// Optional; when empty an identifier is composed from the cluster's
    /// position indices.
    #[serde(default)]
    pub name: String,
    pub image_id: String,
    pub spec_id: String,
    pub ssh_key_id: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub on_auto_scaling: bool,
    pub desired_node_size: i32,
    pub min_node_size: i32,
    pub max_node_size: i32,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReq {
    pub name: String,
    pub connection_name: String,
    pub version: String,
    pub v_net_id: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub node_groups: Vec<NodeGroupReq>,
    #[serde(default)]
    pub label: HashMap<String, String>,
    #[serde(default)]
    pub system_label: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub status: ClusterStatus,
    pub image_id: String,
    pub spec_id: String,
    pub ssh_key_id: String,
    #[serde(default)]
    pub root_disk_type: String,
    #[serde(default)]
    pub root_disk_size: String,
    #[serde(default)]
    pub on_auto_scaling: bool,
    #[serde(default)]
    pub desired_node_size: i32,
    #[serde(default)]
    pub min_node_size: i32,
    #[serde(default)]
    pub max_node_size: i32,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAccess {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub kubeconfig: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub connection_name: String,
    #[serde(default)]
    pub version: String,
    pub v_net_id: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub node_groups: Vec<NodeGroupInfo>,
    #[serde(default)]
    pub access: ClusterAccess,
    #[serde(default)]
    pub addons: Vec<KeyValue>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
    #[serde(default)]
    pub associated_object_list: Vec<String>,
    #[serde(default)]
    pub label: HashMap<String, String>,
    #[serde(default)]
    pub system_label: String,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

pub fn cluster_prefix(ns_id: &str) -> String {
    format!("/ns/{}/cluster", ns_id)
}

pub fn cluster_key(ns_id: &str, cluster_id: &str) -> String {
    format!("{}/{}", cluster_prefix(ns_id), cluster_id)
}

/// Composes a node-group identifier from the cluster's CSP and region
/// position plus a discriminator, e.g. `ng` + 1 + 2 + `a` → `ng12a`.
pub fn compose_node_group_name(prefix: &str, csp_idx: usize, region_idx: usize, add: &str) -> String {
    format!("{}{}{}{}", prefix, csp_idx, region_idx, add)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_group_names_compose_from_indices() {
        assert_eq!(compose_node_group_name("ng", 0, 0, "1"), "ng001");
        assert_eq!(compose_node_group_name("ng", 1, 2, "a"), "ng12a");
    }

    #[test]
    fn driver_status_strings_map() {
        assert_eq!(map_driver_cluster_status("Active"), ClusterStatus::Active);
        assert_eq!(map_driver_cluster_status("Running"), ClusterStatus::Active);
        assert_eq!(
            map_driver_cluster_status("Updating"),
            ClusterStatus::Updating
        );
        assert_eq!(map_driver_cluster_status("??"), ClusterStatus::Failed);
    }

    #[test]
    fn keys_mirror_object_hierarchy() {
        assert_eq!(cluster_key("ns-a", "c1"), "/ns/ns-a/cluster/c1");
    }
}
