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

use chrono::Utc;

use crate::polycloud::common::concurrency::cluster_lock_key;
use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::common::validation::check_name;
use crate::polycloud::common::{gen_uid, label, namespace};
use crate::polycloud::cluster::types::{
    cluster_key, cluster_prefix, compose_node_group_name, map_driver_cluster_status, ClusterAccess,
    ClusterInfo, ClusterReq, ClusterStatus, NodeGroupInfo, NodeGroupReq,
};
use crate::polycloud::driver::types::{
    AutoscaleSizeReqInfo, ClusterNetworkReqInfo, ClusterReqInfo,
    NodeGroupReqInfo as DriverNodeGroupReqInfo,
};
use crate::polycloud::logger::log_info;
use crate::polycloud::resource::registry::{
    self, resource_key, subnet_key, AssociationAction, ResourceKind,
};
use crate::polycloud::resource::{image, securitygroup, spec, sshkey, vnet};
use crate::polycloud::util::get_child_list;

const CLUSTER_COMPONENT: &str = "cluster";
const CLUSTER_KIND: &str = "cluster";

struct ResolvedClusterRefs {
    vpc_name: String,
    subnet_names: Vec<String>,
    security_group_names: Vec<String>,
}

fn driver_name(csp_resource_name: &str, uuid: &str) -> String {
    if csp_resource_name.is_empty() {
        uuid.to_string()
    } else {
        csp_resource_name.to_string()
    }
}

fn resolve_cluster_refs(
    ctx: &CoreContext,
    ns_id: &str,
    req: &ClusterReq,
) -> OpResult<ResolvedClusterRefs> {
    let parent = vnet::get_vnet(ctx, ns_id, &req.v_net_id)?;
    if parent.connection_name != req.connection_name {
        return Err(OpError::Validation(format!(
            "vNet '{}' belongs to connection '{}', but the cluster targets '{}'",
            req.v_net_id, parent.connection_name, req.connection_name
        )));
    }

    let mut subnet_names = Vec::with_capacity(req.subnet_ids.len());
    for subnet_id in &req.subnet_ids {
        let subnet = vnet::get_subnet(ctx, ns_id, &req.v_net_id, subnet_id)?;
        subnet_names.push(driver_name(&subnet.csp_resource_name, &subnet.uuid));
    }

    let mut security_group_names = Vec::with_capacity(req.security_group_ids.len());
    for sg_id in &req.security_group_ids {
        let sg = securitygroup::get_security_group(ctx, ns_id, sg_id)?;
        security_group_names.push(driver_name(&sg.csp_resource_name, &sg.uuid));
    }

    Ok(ResolvedClusterRefs {
        vpc_name: driver_name(&parent.csp_resource_name, &parent.uuid),
        subnet_names,
        security_group_names,
    })
}

fn resolve_node_group(
    ctx: &CoreContext,
    ns_id: &str,
    connection_name: &str,
    req: &NodeGroupReq,
    id: &str,
) -> OpResult<(NodeGroupInfo, DriverNodeGroupReqInfo)> {
    let group_image = image::get_image(ctx, ns_id, &req.image_id)?;
    let group_spec = spec::get_spec(ctx, ns_id, &req.spec_id)?;
    let group_key = sshkey::get_sshkey(ctx, ns_id, &req.ssh_key_id)?;

    for (what, resource_connection) in [
        ("image", group_image.connection_name.as_str()),
        ("spec", group_spec.connection_name.as_str()),
        ("sshKey", group_key.connection_name.as_str()),
    ] {
        if resource_connection != connection_name {
            return Err(OpError::Validation(format!(
                "{} referenced by node group '{}' belongs to connection '{}'",
                what, id, resource_connection
            )));
        }
    }

    if req.min_node_size > req.max_node_size || req.desired_node_size < req.min_node_size {
        return Err(OpError::Validation(format!(
            "node group '{}' sizes must satisfy min <= desired <= max",
            id
        )));
    }

    let uuid = gen_uid();
    let info = NodeGroupInfo {
        id: id.to_string(),
        name: id.to_string(),
        uuid: uuid.clone(),
        status: ClusterStatus::Creating,
        image_id: req.image_id.clone(),
        spec_id: req.spec_id.clone(),
        ssh_key_id: req.ssh_key_id.clone(),
        root_disk_type: req.root_disk_type.clone(),
        root_disk_size: req.root_disk_size.clone(),
        on_auto_scaling: req.on_auto_scaling,
        desired_node_size: req.desired_node_size,
        min_node_size: req.min_node_size,
        max_node_size: req.max_node_size,
        description: req.description.clone(),
        ..Default::default()
    };

    let driver_req = DriverNodeGroupReqInfo {
        name: uuid,
        image_name: if group_image.csp_resource_name.is_empty() {
            group_image.csp_resource_id.clone()
        } else {
            group_image.csp_resource_name.clone()
        },
        vm_spec_name: group_spec.csp_spec_name.clone(),
        root_disk_type: req.root_disk_type.clone(),
        root_disk_size: req.root_disk_size.clone(),
        key_pair_name: driver_name(&group_key.csp_resource_name, &group_key.uuid),
        on_auto_scaling: req.on_auto_scaling,
        desired_node_size: req.desired_node_size,
        min_node_size: req.min_node_size,
        max_node_size: req.max_node_size,
    };

    Ok((info, driver_req))
}

fn cluster_reference_keys(ns_id: &str, cluster: &ClusterInfo) -> Vec<String> {
    let mut keys = vec![resource_key(ns_id, ResourceKind::VNet, &cluster.v_net_id)];
    for subnet_id in &cluster.subnet_ids {
        keys.push(subnet_key(ns_id, &cluster.v_net_id, subnet_id));
    }
    for sg_id in &cluster.security_group_ids {
        keys.push(resource_key(ns_id, ResourceKind::SecurityGroup, sg_id));
    }
    for group in &cluster.node_groups {
        let key = resource_key(ns_id, ResourceKind::SshKey, &group.ssh_key_id);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn merge_driver_node_groups(
    record: &mut ClusterInfo,
    driver_groups: &[crate::polycloud::driver::types::NodeGroupInfo],
) {
    for group in &mut record.node_groups {
        if let Some(reported) = driver_groups
            .iter()
            .find(|driver_group| driver_group.iid.name_id == group.uuid)
        {
            group.csp_resource_id = reported.iid.system_id.clone();
            group.csp_resource_name = reported.iid.name_id.clone();
            group.status = if reported.status.is_empty() {
                ClusterStatus::Active
            } else {
                map_driver_cluster_status(&reported.status)
            };
            group.on_auto_scaling = reported.on_auto_scaling;
            if reported.desired_node_size > 0 {
                group.desired_node_size = reported.desired_node_size;
            }
            group.nodes = reported
                .nodes
                .iter()
                .map(|node| node.system_id.clone())
                .collect();
            group.key_value_list = reported.key_value_list.clone();
        }
    }
}

fn persist_cluster(ctx: &CoreContext, ns_id: &str, record: &ClusterInfo) -> OpResult<()> {
    registry::persist(ctx, &cluster_key(ns_id, &record.id), record)
}

/// Creates a managed cluster with its initial node groups in one driver
/// call. Node-group identifiers left empty in the request are composed from
/// position indices.
pub async fn create_cluster(
    ctx: &CoreContext,
    ns_id: &str,
    req: &ClusterReq,
) -> OpResult<ClusterInfo> {
    check_name(&req.name)?;
    if req.connection_name.is_empty() {
        return Err(OpError::Validation("connectionName is required".to_string()));
    }
    if req.node_groups.is_empty() {
        return Err(OpError::Validation(
            "a cluster requires at least one node group".to_string(),
        ));
    }
    if !namespace::check_ns(ctx, ns_id)? {
        return Err(OpError::not_found("namespace", ns_id));
    }
    let _guard = ctx
        .locks()
        .try_acquire(&cluster_lock_key(ns_id, &req.name))?;
    if ctx
        .keyspace()
        .exists(&cluster_key(ns_id, &req.name))
        .map_err(OpError::internal)?
    {
        return Err(OpError::already_exists(CLUSTER_KIND, &req.name));
    }

    let refs = resolve_cluster_refs(ctx, ns_id, req)?;

    let uuid = gen_uid();
    let mut node_groups = Vec::with_capacity(req.node_groups.len());
    let mut driver_groups = Vec::with_capacity(req.node_groups.len());
    for (idx, group_req) in req.node_groups.iter().enumerate() {
        let id = if group_req.name.is_empty() {
            compose_node_group_name("ng", 0, 0, &(idx + 1).to_string())
        } else {
            check_name(&group_req.name)?;
            group_req.name.clone()
        };
        if node_groups
            .iter()
            .any(|existing: &NodeGroupInfo| existing.id == id)
        {
            return Err(OpError::Validation(format!(
                "duplicate node group id '{}'",
                id
            )));
        }
        let (info, driver_req) =
            resolve_node_group(ctx, ns_id, &req.connection_name, group_req, &id)?;
        node_groups.push(info);
        driver_groups.push(driver_req);
    }

    let driver_req = ClusterReqInfo {
        name: uuid.clone(),
        version: req.version.clone(),
        network: ClusterNetworkReqInfo {
            vpc_name: refs.vpc_name,
            subnet_names: refs.subnet_names,
            security_group_names: refs.security_group_names,
        },
        node_group_list: driver_groups,
    };

    let call_result = ctx
        .driver()
        .create_cluster(&req.connection_name, driver_req)
        .await?;

    let mut record = ClusterInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: uuid.clone(),
        connection_name: req.connection_name.clone(),
        version: if call_result.version.is_empty() {
            req.version.clone()
        } else {
            call_result.version.clone()
        },
        v_net_id: req.v_net_id.clone(),
        subnet_ids: req.subnet_ids.clone(),
        security_group_ids: req.security_group_ids.clone(),
        status: if call_result.status.is_empty() {
            ClusterStatus::Active
        } else {
            map_driver_cluster_status(&call_result.status)
        },
        node_groups,
        access: ClusterAccess {
            endpoint: call_result.access_info.endpoint.clone(),
            kubeconfig: call_result.access_info.kubeconfig.clone(),
        },
        addons: call_result.addons.key_value_list.clone(),
        description: req.description.clone(),
        csp_resource_id: call_result.iid.system_id.clone(),
        csp_resource_name: call_result.iid.name_id.clone(),
        key_value_list: call_result.key_value_list.clone(),
        associated_object_list: Vec::new(),
        label: req.label.clone(),
        system_label: req.system_label.clone(),
        created_time: Some(Utc::now()),
    };
    merge_driver_node_groups(&mut record, &call_result.node_group_list);

    persist_cluster(ctx, ns_id, &record)?;

    let own_key = cluster_key(ns_id, &record.id);
    for reference in cluster_reference_keys(ns_id, &record) {
        let _ = registry::update_associations_at(ctx, &reference, AssociationAction::Add, &own_key);
    }

    label::upsert_label_best_effort(
        ctx,
        CLUSTER_KIND,
        &uuid,
        &own_key,
        req.label.clone(),
        [
            ("provider".to_string(), "polycloud".to_string()),
            ("namespace".to_string(), ns_id.to_string()),
        ]
        .into(),
    );

    log_info(
        CLUSTER_COMPONENT,
        "Created cluster",
        &[
            ("namespace", ns_id),
            ("cluster", &record.id),
            ("nodeGroups", &record.node_groups.len().to_string()),
        ],
    );

    Ok(record)
}

pub fn get_cluster(ctx: &CoreContext, ns_id: &str, cluster_id: &str) -> OpResult<ClusterInfo> {
    registry::load_at(ctx, &cluster_key(ns_id, cluster_id))?
        .ok_or_else(|| OpError::not_found(CLUSTER_KIND, cluster_id))
}

pub fn list_cluster(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<ClusterInfo>> {
    let prefix = cluster_prefix(ns_id);
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;

    let mut clusters = Vec::new();
    for entry in get_child_list(&entries, &prefix) {
        let cluster: ClusterInfo =
            serde_json::from_str(&entry.value).map_err(OpError::internal)?;
        clusters.push(cluster);
    }
    Ok(clusters)
}

/// Polls the driver for the cluster's current shape and persists it.
pub async fn refresh_cluster(
    ctx: &CoreContext,
    ns_id: &str,
    cluster_id: &str,
) -> OpResult<ClusterInfo> {
    let mut record = get_cluster(ctx, ns_id, cluster_id)?;

    let reported = ctx
        .driver()
        .get_cluster(
            &record.connection_name,
            &driver_name(&record.csp_resource_name, &record.uuid),
        )
        .await?;

    record.status = if reported.status.is_empty() {
        record.status
    } else {
        map_driver_cluster_status(&reported.status)
    };
    record.version = if reported.version.is_empty() {
        record.version
    } else {
        reported.version.clone()
    };
    record.access = ClusterAccess {
        endpoint: reported.access_info.endpoint.clone(),
        kubeconfig: reported.access_info.kubeconfig.clone(),
    };
    merge_driver_node_groups(&mut record, &reported.node_group_list);

    persist_cluster(ctx, ns_id, &record)?;
    Ok(record)
}

/// Adds a node group to an existing cluster. Node-group mutations are
/// serialized per cluster through the entity lock.
pub async fn add_node_group(
    ctx: &CoreContext,
    ns_id: &str,
    cluster_id: &str,
    req: &NodeGroupReq,
) -> OpResult<ClusterInfo> {
    let _guard = ctx
        .locks()
        .try_acquire(&cluster_lock_key(ns_id, cluster_id))?;

    let mut record = get_cluster(ctx, ns_id, cluster_id)?;

    let id = if req.name.is_empty() {
        compose_node_group_name("ng", 0, 0, &(record.node_groups.len() + 1).to_string())
    } else {
        check_name(&req.name)?;
        req.name.clone()
    };
    if record.node_groups.iter().any(|group| group.id == id) {
        return Err(OpError::already_exists("nodeGroup", &id));
    }

    let (info, driver_req) = resolve_node_group(ctx, ns_id, &record.connection_name, req, &id)?;

    let reported = ctx
        .driver()
        .add_node_group(
            &record.connection_name,
            &driver_name(&record.csp_resource_name, &record.uuid),
            driver_req,
        )
        .await?;

    record.node_groups.push(info);
    merge_driver_node_groups(&mut record, &reported.node_group_list);
    persist_cluster(ctx, ns_id, &record)?;

    log_info(
        CLUSTER_COMPONENT,
        "Added node group",
        &[("cluster", cluster_id), ("nodeGroup", &id)],
    );

    get_cluster(ctx, ns_id, cluster_id)
}

pub async fn remove_node_group(
    ctx: &CoreContext,
    ns_id: &str,
    cluster_id: &str,
    node_group_id: &str,
) -> OpResult<ClusterInfo> {
    let _guard = ctx
        .locks()
        .try_acquire(&cluster_lock_key(ns_id, cluster_id))?;

    let mut record = get_cluster(ctx, ns_id, cluster_id)?;
    let group = record
        .node_groups
        .iter()
        .find(|group| group.id == node_group_id)
        .cloned()
        .ok_or_else(|| OpError::not_found("nodeGroup", node_group_id))?;

    if record.node_groups.len() == 1 {
        return Err(OpError::Conflict(
            "a cluster must retain at least one node group".to_string(),
        ));
    }

    ctx.driver()
        .remove_node_group(
            &record.connection_name,
            &driver_name(&record.csp_resource_name, &record.uuid),
            &driver_name(&group.csp_resource_name, &group.uuid),
        )
        .await?;

    record.node_groups.retain(|existing| existing.id != node_group_id);
    persist_cluster(ctx, ns_id, &record)?;
    Ok(record)
}

pub async fn set_autoscaling(
    ctx: &CoreContext,
    ns_id: &str,
    cluster_id: &str,
    node_group_id: &str,
    on: bool,
) -> OpResult<ClusterInfo> {
    let _guard = ctx
        .locks()
        .try_acquire(&cluster_lock_key(ns_id, cluster_id))?;

    let mut record = get_cluster(ctx, ns_id, cluster_id)?;
    let group = record
        .node_groups
        .iter_mut()
        .find(|group| group.id == node_group_id)
        .ok_or_else(|| OpError::not_found("nodeGroup", node_group_id))?;

    let group_driver_name = driver_name(&group.csp_resource_name, &group.uuid);
    ctx.driver()
        .set_node_group_autoscaling(
            &record.connection_name,
            &driver_name(&record.csp_resource_name, &record.uuid),
            &group_driver_name,
            on,
        )
        .await?;

    let group = record
        .node_groups
        .iter_mut()
        .find(|group| group.id == node_group_id)
        .expect("node group disappeared while holding the cluster lock");
    group.on_auto_scaling = on;
    persist_cluster(ctx, ns_id, &record)?;
    Ok(record)
}

pub async fn change_autoscale_size(
    ctx: &CoreContext,
    ns_id: &str,
    cluster_id: &str,
    node_group_id: &str,
    desired: i32,
    min: i32,
    max: i32,
) -> OpResult<ClusterInfo> {
    if min > max || desired < min || desired > max {
        return Err(OpError::Validation(
            "autoscale sizes must satisfy min <= desired <= max".to_string(),
        ));
    }

    let _guard = ctx
        .locks()
        .try_acquire(&cluster_lock_key(ns_id, cluster_id))?;

    let mut record = get_cluster(ctx, ns_id, cluster_id)?;
    let group = record
        .node_groups
        .iter()
        .find(|group| group.id == node_group_id)
        .cloned()
        .ok_or_else(|| OpError::not_found("nodeGroup", node_group_id))?;

    let reported = ctx
        .driver()
        .change_node_group_scale(
            &record.connection_name,
            &driver_name(&record.csp_resource_name, &record.uuid),
            &driver_name(&group.csp_resource_name, &group.uuid),
            AutoscaleSizeReqInfo {
                desired_node_size: desired,
                min_node_size: min,
                max_node_size: max,
            },
        )
        .await?;

    {
        let group = record
            .node_groups
            .iter_mut()
            .find(|group| group.id == node_group_id)
            .expect("node group disappeared while holding the cluster lock");
        group.desired_node_size = desired;
        group.min_node_size = min;
        group.max_node_size = max;
    }
    merge_driver_node_groups(&mut record, &reported.node_group_list);
    persist_cluster(ctx, ns_id, &record)?;
    Ok(record)
}

pub async fn upgrade_cluster(
    ctx: &CoreContext,
    ns_id: &str,
    cluster_id: &str,
    version: &str,
) -> OpResult<ClusterInfo> {
    if version.is_empty() {
        return Err(OpError::Validation("version is required".to_string()));
    }

    let _guard = ctx
        .locks()
        .try_acquire(&cluster_lock_key(ns_id, cluster_id))?;

    let mut record = get_cluster(ctx, ns_id, cluster_id)?;
    let reported = ctx
        .driver()
        .upgrade_cluster(
            &record.connection_name,
            &driver_name(&record.csp_resource_name, &record.uuid),
            version,
        )
        .await?;

    record.version = if reported.version.is_empty() {
        version.to_string()
    } else {
        reported.version.clone()
    };
    record.status = if reported.status.is_empty() {
        ClusterStatus::Updating
    } else {
        map_driver_cluster_status(&reported.status)
    };
    persist_cluster(ctx, ns_id, &record)?;
    Ok(record)
}

/// Deletes a cluster, releasing the references it held on shared resources.
pub async fn delete_cluster(
    ctx: &CoreContext,
    ns_id: &str,
    cluster_id: &str,
    force: bool,
) -> OpResult<()> {
    let _guard = ctx
        .locks()
        .try_acquire(&cluster_lock_key(ns_id, cluster_id))?;

    let record = get_cluster(ctx, ns_id, cluster_id)?;
    if !record.associated_object_list.is_empty() {
        return Err(OpError::Conflict(format!(
            "cluster '{}' is still referenced by {:?}",
            cluster_id, record.associated_object_list
        )));
    }

    ctx.driver()
        .delete_cluster(
            &record.connection_name,
            &driver_name(&record.csp_resource_name, &record.uuid),
            force,
        )
        .await?;

    let own_key = cluster_key(ns_id, cluster_id);
    for reference in cluster_reference_keys(ns_id, &record) {
        match registry::update_associations_at(
            ctx,
            &reference,
            AssociationAction::Remove,
            &own_key,
        ) {
            Ok(_) | Err(OpError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
    }

    ctx.keyspace()
        .delete(&own_key)
        .map_err(OpError::internal)?;
    label::remove_label(ctx, CLUSTER_KIND, &record.uuid)?;

    log_info(
        CLUSTER_COMPONENT,
        "Deleted cluster",
        &[("namespace", ns_id), ("cluster", cluster_id)],
    );
    Ok(())
}
