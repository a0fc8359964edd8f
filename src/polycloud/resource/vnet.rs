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

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::polycloud::common::concurrency::resource_lock_key;
use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::common::validation::{check_cidr, check_name};
use crate::polycloud::common::{gen_uid, label};
use crate::polycloud::driver::types::{KeyValue, SubnetInfo as DriverSubnetInfo, SubnetReqInfo, VpcReqInfo};
use crate::polycloud::logger::{log_info, log_warn};
use crate::polycloud::resource::registry::{
    self, resource_key, subnet_key, ResourceKind,
};
use crate::polycloud::util::get_child_list;

const VNET_COMPONENT: &str = "vnet";
const SUBNET_KIND: &str = "subnet";

/// How a vNet comes into being: provisioned fresh on the CSP, or registered
/// from an object that already exists there.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VNetCreateOption {
    Provision,
    Register,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetReq {
    pub name: String,
    #[serde(default)]
    pub id_from_csp: String,
    pub ipv4_cidr: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VNetReq {
    pub name: String,
    pub connection_name: String,
    #[serde(default)]
    pub cidr_block: String,
    #[serde(default)]
    pub subnet_info_list: Vec<SubnetReq>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub csp_resource_id: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub vnet_id: String,
    pub connection_name: String,
    #[serde(default)]
    pub ipv4_cidr: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub associated_object_list: Vec<String>,
    #[serde(default)]
    pub is_auto_generated: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VNetInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub connection_name: String,
    #[serde(default)]
    pub cidr_block: String,
    #[serde(default)]
    pub subnet_info_list: Vec<SubnetInfo>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
    #[serde(default)]
    pub associated_object_list: Vec<String>,
    #[serde(default)]
    pub is_auto_generated: bool,
    #[serde(default)]
    pub system_label: String,
}

fn validate_vnet_req(req: &VNetReq, option: VNetCreateOption) -> OpResult<()> {
    check_name(&req.name)?;
    if req.connection_name.is_empty() {
        return Err(OpError::Validation(
            "connectionName is required".to_string(),
        ));
    }
    if option == VNetCreateOption::Provision {
        check_cidr(&req.cidr_block)?;
    }
    for subnet in &req.subnet_info_list {
        check_name(&subnet.name)?;
        check_cidr(&subnet.ipv4_cidr)?;
    }
    Ok(())
}

/// Accepts a vNet creation request, drives the CSP through the driver, and
/// returns the persisted record with its subnets assembled.
pub async fn create_vnet(
    ctx: &CoreContext,
    ns_id: &str,
    req: &VNetReq,
    option: VNetCreateOption,
) -> OpResult<VNetInfo> {
    validate_vnet_req(req, option)?;

    let _guard = ctx
        .locks()
        .try_acquire(&resource_lock_key(ns_id, ResourceKind::VNet.as_str(), &req.name))?;
    registry::ensure_creatable(ctx, ns_id, ResourceKind::VNet, &req.name)?;

    let uuid = gen_uid();

    // The tenant id never reaches the CSP; the driver sees the synthesized
    // uuid so tenants sharing one CSP account cannot collide.
    let mut subnet_names: Vec<(String, SubnetReq)> = Vec::new();
    let mut driver_subnets = Vec::new();
    for subnet in &req.subnet_info_list {
        let subnet_uuid = gen_uid();
        driver_subnets.push(SubnetReqInfo {
            name: subnet_uuid.clone(),
            ipv4_cidr: subnet.ipv4_cidr.clone(),
            zone: subnet.zone.clone(),
            key_value_list: subnet.key_value_list.clone(),
        });
        subnet_names.push((subnet_uuid, subnet.clone()));
    }

    let driver_req = VpcReqInfo {
        name: uuid.clone(),
        ipv4_cidr: req.cidr_block.clone(),
        subnet_info_list: driver_subnets,
        csp_id: req.csp_resource_id.clone(),
    };

    let call_result = match option {
        VNetCreateOption::Provision => {
            ctx.driver()
                .create_vpc(&req.connection_name, driver_req)
                .await?
        }
        VNetCreateOption::Register if req.csp_resource_id.is_empty() => {
            ctx.driver()
                .lookup_vpc(&req.connection_name, &req.name)
                .await?
        }
        VNetCreateOption::Register => {
            ctx.driver()
                .register_vpc(&req.connection_name, driver_req)
                .await?
        }
    };

    let system_label = match option {
        VNetCreateOption::Provision => String::new(),
        VNetCreateOption::Register if req.csp_resource_id.is_empty() => {
            "Registered from driver resource".to_string()
        }
        VNetCreateOption::Register => "Registered from CSP resource".to_string(),
    };

    let content = VNetInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: uuid.clone(),
        connection_name: req.connection_name.clone(),
        cidr_block: call_result.ipv4_cidr.clone(),
        subnet_info_list: Vec::new(),
        description: req.description.clone(),
        csp_resource_id: call_result.iid.system_id.clone(),
        csp_resource_name: call_result.iid.name_id.clone(),
        status: "Available".to_string(),
        key_value_list: call_result.key_value_list.clone(),
        associated_object_list: Vec::new(),
        is_auto_generated: false,
        system_label,
    };

    let key = resource_key(ns_id, ResourceKind::VNet, &content.id);
    registry::persist(ctx, &key, &content)?;

    for driver_subnet in &call_result.subnet_info_list {
        if let Err(err) =
            persist_subnet_from_driver(ctx, ns_id, &content, driver_subnet, &subnet_names)
        {
            log_warn(
                VNET_COMPONENT,
                "Failed to record subnet returned by driver",
                &[
                    ("namespace", ns_id),
                    ("vnet", &content.id),
                    ("cause", &err.to_string()),
                ],
            );
        }
    }

    label::upsert_label_best_effort(
        ctx,
        ResourceKind::VNet.as_str(),
        &uuid,
        &key,
        Default::default(),
        [
            ("provider".to_string(), "polycloud".to_string()),
            ("namespace".to_string(), ns_id.to_string()),
        ]
        .into(),
    );

    log_info(
        VNET_COMPONENT,
        "Created vNet",
        &[("namespace", ns_id), ("vnet", &content.id)],
    );

    get_vnet(ctx, ns_id, &content.id)
}

fn sanitize_subnet_id(raw: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if cleaned.is_empty() || !cleaned.chars().next().unwrap_or('-').is_ascii_alphanumeric() {
        fallback.to_string()
    } else {
        cleaned.chars().take(32).collect()
    }
}

fn persist_subnet_from_driver(
    ctx: &CoreContext,
    ns_id: &str,
    parent: &VNetInfo,
    driver_subnet: &DriverSubnetInfo,
    requested: &[(String, SubnetReq)],
) -> OpResult<SubnetInfo> {
    let matched = requested
        .iter()
        .find(|(uuid, _)| *uuid == driver_subnet.iid.name_id);

    let (id, uuid, description, is_auto_generated) = match matched {
        Some((uuid, subnet_req)) => (
            subnet_req.name.clone(),
            uuid.clone(),
            subnet_req.description.clone(),
            false,
        ),
        None => {
            // Subnet the CSP materialized on its own (default subnets, or a
            // registered VPC's existing ones): adopt it under a derived id.
            let uuid = gen_uid();
            let id = sanitize_subnet_id(&driver_subnet.iid.name_id, &uuid);
            (id, uuid, String::new(), true)
        }
    };

    let content = SubnetInfo {
        id: id.clone(),
        name: id.clone(),
        uuid: uuid.clone(),
        vnet_id: parent.id.clone(),
        connection_name: parent.connection_name.clone(),
        ipv4_cidr: driver_subnet.ipv4_cidr.clone(),
        zone: driver_subnet.zone.clone(),
        csp_resource_id: driver_subnet.iid.system_id.clone(),
        csp_resource_name: driver_subnet.iid.name_id.clone(),
        key_value_list: driver_subnet.key_value_list.clone(),
        description,
        associated_object_list: Vec::new(),
        is_auto_generated,
    };

    registry::persist(ctx, &subnet_key(ns_id, &parent.id, &content.id), &content)?;
    label::upsert_label_best_effort(
        ctx,
        SUBNET_KIND,
        &uuid,
        &subnet_key(ns_id, &parent.id, &content.id),
        Default::default(),
        [
            ("provider".to_string(), "polycloud".to_string()),
            ("namespace".to_string(), ns_id.to_string()),
        ]
        .into(),
    );

    Ok(content)
}

/// Adds a subnet to an existing vNet.
pub async fn create_subnet(
    ctx: &CoreContext,
    ns_id: &str,
    vnet_id: &str,
    req: &SubnetReq,
) -> OpResult<SubnetInfo> {
    check_name(&req.name)?;
    check_cidr(&req.ipv4_cidr)?;

    let parent = get_vnet(ctx, ns_id, vnet_id)?;
    if ctx
        .keyspace()
        .exists(&subnet_key(ns_id, vnet_id, &req.name))
        .map_err(OpError::internal)?
    {
        return Err(OpError::already_exists(SUBNET_KIND, &req.name));
    }

    let _guard = ctx
        .locks()
        .try_acquire(&resource_lock_key(ns_id, ResourceKind::VNet.as_str(), vnet_id))?;

    let subnet_uuid = gen_uid();
    let driver_req = SubnetReqInfo {
        name: subnet_uuid.clone(),
        ipv4_cidr: req.ipv4_cidr.clone(),
        zone: req.zone.clone(),
        key_value_list: req.key_value_list.clone(),
    };

    let vpc_info = ctx
        .driver()
        .create_subnet(&parent.connection_name, &driver_name_of(&parent), driver_req)
        .await?;

    let driver_subnet = vpc_info
        .subnet_info_list
        .iter()
        .find(|subnet| subnet.iid.name_id == subnet_uuid)
        .ok_or_else(|| {
            OpError::internal(format!(
                "driver response is missing subnet '{}'",
                subnet_uuid
            ))
        })?;

    persist_subnet_from_driver(
        ctx,
        ns_id,
        &parent,
        driver_subnet,
        &[(subnet_uuid, req.clone())],
    )
}

fn driver_name_of(vnet: &VNetInfo) -> String {
    if vnet.csp_resource_name.is_empty() {
        vnet.uuid.clone()
    } else {
        vnet.csp_resource_name.clone()
    }
}

pub fn get_subnet(
    ctx: &CoreContext,
    ns_id: &str,
    vnet_id: &str,
    subnet_id: &str,
) -> OpResult<SubnetInfo> {
    registry::load_at(ctx, &subnet_key(ns_id, vnet_id, subnet_id))?
        .ok_or_else(|| OpError::not_found(SUBNET_KIND, subnet_id))
}

pub fn list_subnets(ctx: &CoreContext, ns_id: &str, vnet_id: &str) -> OpResult<Vec<SubnetInfo>> {
    let prefix = format!(
        "{}/subnet",
        resource_key(ns_id, ResourceKind::VNet, vnet_id)
    );
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;

    let mut subnets = Vec::new();
    for entry in get_child_list(&entries, &prefix) {
        let subnet: SubnetInfo =
            serde_json::from_str(&entry.value).map_err(OpError::internal)?;
        subnets.push(subnet);
    }
    Ok(subnets)
}

/// Deletes one subnet from a vNet. Refused while a VM still references it.
pub async fn delete_subnet(
    ctx: &CoreContext,
    ns_id: &str,
    vnet_id: &str,
    subnet_id: &str,
    force: bool,
) -> OpResult<()> {
    let parent = get_vnet(ctx, ns_id, vnet_id)?;
    let subnet = get_subnet(ctx, ns_id, vnet_id, subnet_id)?;

    if !subnet.associated_object_list.is_empty() {
        return Err(OpError::Conflict(format!(
            "subnet '{}' is still referenced by {:?}",
            subnet_id, subnet.associated_object_list
        )));
    }

    let subnet_driver_name = if subnet.csp_resource_name.is_empty() {
        subnet.uuid.clone()
    } else {
        subnet.csp_resource_name.clone()
    };

    ctx.driver()
        .delete_subnet(
            &parent.connection_name,
            &driver_name_of(&parent),
            &subnet_driver_name,
            force,
        )
        .await?;

    ctx.keyspace()
        .delete(&subnet_key(ns_id, vnet_id, subnet_id))
        .map_err(OpError::internal)?;
    label::remove_label(ctx, SUBNET_KIND, &subnet.uuid)?;

    Ok(())
}

/// Cascade used by vNet deletion: subnets go first, oldest invariant in the
/// tree (a subnet must never outlive its parent).
pub(crate) async fn delete_child_subnets(
    ctx: &CoreContext,
    ns_id: &str,
    vnet_id: &str,
    parent_record: &Value,
    force: bool,
) -> OpResult<()> {
    let subnets = list_subnets(ctx, ns_id, vnet_id)?;
    let parent_driver_name = registry::csp_name(parent_record);
    let connection_name = parent_record
        .get("connectionName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    for subnet in subnets {
        if !subnet.associated_object_list.is_empty() {
            return Err(OpError::Conflict(format!(
                "subnet '{}' is still referenced by {:?}",
                subnet.id, subnet.associated_object_list
            )));
        }

        let subnet_driver_name = if subnet.csp_resource_name.is_empty() {
            subnet.uuid.clone()
        } else {
            subnet.csp_resource_name.clone()
        };

        ctx.driver()
            .delete_subnet(&connection_name, &parent_driver_name, &subnet_driver_name, force)
            .await?;
        ctx.keyspace()
            .delete(&subnet_key(ns_id, vnet_id, &subnet.id))
            .map_err(OpError::internal)?;
        label::remove_label(ctx, SUBNET_KIND, &subnet.uuid)?;
    }

    Ok(())
}

/// Loads a vNet with its subnets assembled from their child keys.
pub fn get_vnet(ctx: &CoreContext, ns_id: &str, vnet_id: &str) -> OpResult<VNetInfo> {
    let mut vnet: VNetInfo = registry::load(ctx, ns_id, ResourceKind::VNet, vnet_id)?;
    vnet.subnet_info_list = list_subnets(ctx, ns_id, vnet_id)?;
    Ok(vnet)
}

pub fn list_vnet(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<VNetInfo>> {
    let mut vnets: Vec<VNetInfo> = registry::list(ctx, ns_id, ResourceKind::VNet)?;
    for vnet in &mut vnets {
        vnet.subnet_info_list = list_subnets(ctx, ns_id, &vnet.id)?;
    }
    Ok(vnets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_requires_cidr_block() {
        let req = VNetReq {
            name: "vnet1".to_string(),
            connection_name: "aws-1".to_string(),
            ..Default::default()
        };
        assert!(validate_vnet_req(&req, VNetCreateOption::Provision).is_err());
        assert!(validate_vnet_req(&req, VNetCreateOption::Register).is_ok());
    }

    #[test]
    fn subnet_requests_are_validated() {
        let req = VNetReq {
            name: "vnet1".to_string(),
            connection_name: "aws-1".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            subnet_info_list: vec![SubnetReq {
                name: "bad_name".to_string(),
                ipv4_cidr: "10.0.0.0/24".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(validate_vnet_req(&req, VNetCreateOption::Provision).is_err());
    }

    #[test]
    fn auto_generated_subnet_ids_are_sanitized() {
        assert_eq!(sanitize_subnet_id("Default Subnet (AZ-a)", "pc-x"), "DefaultSubnetAZ-a");
        assert_eq!(sanitize_subnet_id("", "pc-x"), "pc-x");
        assert_eq!(sanitize_subnet_id("---", "pc-x"), "pc-x");
    }
}
