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
use crate::polycloud::common::validation::check_name;
use crate::polycloud::common::{gen_uid, label};
use crate::polycloud::driver::types::{
    KeyValue, SecurityGroupReqInfo, SecurityRuleInfo,
};
use crate::polycloud::logger::log_info;
use crate::polycloud::resource::registry::{
    self, resource_key, AssociationAction, ResourceKind,
};
use crate::polycloud::resource::vnet;

const SECURITY_GROUP_COMPONENT: &str = "securitygroup";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRule {
    pub from_port: String,
    pub to_port: String,
    pub ip_protocol: String,
    pub direction: String,
    #[serde(default)]
    pub cidr: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupReq {
    pub name: String,
    pub connection_name: String,
    pub vnet_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub firewall_rules: Vec<FirewallRule>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub connection_name: String,
    pub vnet_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub firewall_rules: Vec<FirewallRule>,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
    #[serde(default)]
    pub associated_object_list: Vec<String>,
    #[serde(default)]
    pub is_auto_generated: bool,
    #[serde(default)]
    pub system_label: String,
}

fn to_driver_rules(rules: &[FirewallRule]) -> Vec<SecurityRuleInfo> {
    rules
        .iter()
        .map(|rule| SecurityRuleInfo {
            from_port: rule.from_port.clone(),
            to_port: rule.to_port.clone(),
            ip_protocol: rule.ip_protocol.clone(),
            direction: rule.direction.clone(),
            cidr: rule.cidr.clone(),
        })
        .collect()
}

pub async fn create_security_group(
    ctx: &CoreContext,
    ns_id: &str,
    req: &SecurityGroupReq,
) -> OpResult<SecurityGroupInfo> {
    check_name(&req.name)?;
    if req.connection_name.is_empty() {
        return Err(OpError::Validation("connectionName is required".to_string()));
    }
    if req.firewall_rules.is_empty() {
        return Err(OpError::Validation(
            "at least one firewall rule is required".to_string(),
        ));
    }
    let _guard = ctx.locks().try_acquire(&resource_lock_key(
        ns_id,
        ResourceKind::SecurityGroup.as_str(),
        &req.name,
    ))?;
    registry::ensure_creatable(ctx, ns_id, ResourceKind::SecurityGroup, &req.name)?;

    // The parent vNet must exist in the same namespace.
    let parent = vnet::get_vnet(ctx, ns_id, &req.vnet_id)?;

    let uuid = gen_uid();
    let driver_req = SecurityGroupReqInfo {
        name: uuid.clone(),
        vpc_name: if parent.csp_resource_name.is_empty() {
            parent.uuid.clone()
        } else {
            parent.csp_resource_name.clone()
        },
        security_rules: to_driver_rules(&req.firewall_rules),
    };

    let call_result = ctx
        .driver()
        .create_security_group(&req.connection_name, driver_req)
        .await?;

    let content = SecurityGroupInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: uuid.clone(),
        connection_name: req.connection_name.clone(),
        vnet_id: req.vnet_id.clone(),
        description: req.description.clone(),
        firewall_rules: req.firewall_rules.clone(),
        csp_resource_id: call_result.iid.system_id.clone(),
        csp_resource_name: call_result.iid.name_id.clone(),
        key_value_list: call_result.key_value_list.clone(),
        associated_object_list: Vec::new(),
        is_auto_generated: false,
        system_label: String::new(),
    };

    let key = resource_key(ns_id, ResourceKind::SecurityGroup, &content.id);
    registry::persist(ctx, &key, &content)?;

    // Record the dependency edge so the vNet cannot vanish underneath us.
    registry::update_associated_object_list(
        ctx,
        ns_id,
        ResourceKind::VNet,
        &req.vnet_id,
        AssociationAction::Add,
        &key,
    )?;

    label::upsert_label_best_effort(
        ctx,
        ResourceKind::SecurityGroup.as_str(),
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
        SECURITY_GROUP_COMPONENT,
        "Created security group",
        &[("namespace", ns_id), ("securityGroup", &content.id)],
    );

    Ok(content)
}

pub fn get_security_group(
    ctx: &CoreContext,
    ns_id: &str,
    sg_id: &str,
) -> OpResult<SecurityGroupInfo> {
    registry::load(ctx, ns_id, ResourceKind::SecurityGroup, sg_id)
}

pub fn list_security_group(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<SecurityGroupInfo>> {
    registry::list(ctx, ns_id, ResourceKind::SecurityGroup)
}

/// Drops the back-reference this group holds on its parent vNet. Called by
/// the generic delete path after the CSP object is gone.
pub(crate) fn release_parent_vnet(
    ctx: &CoreContext,
    ns_id: &str,
    record: &Value,
) -> OpResult<()> {
    let vnet_id = record
        .get("vnetId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let own_id = record.get("id").and_then(Value::as_str).unwrap_or_default();
    if vnet_id.is_empty() || own_id.is_empty() {
        return Ok(());
    }

    let own_key = resource_key(ns_id, ResourceKind::SecurityGroup, own_id);
    // The parent may already be gone when deletes race; that is not an error.
    match registry::update_associated_object_list(
        ctx,
        ns_id,
        ResourceKind::VNet,
        vnet_id,
        AssociationAction::Remove,
        &own_key,
    ) {
        Ok(_) | Err(OpError::NotFound { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_rules_preserve_fields() {
        let rules = vec![FirewallRule {
            from_port: "22".to_string(),
            to_port: "22".to_string(),
            ip_protocol: "tcp".to_string(),
            direction: "inbound".to_string(),
            cidr: "0.0.0.0/0".to_string(),
        }];
        let converted = to_driver_rules(&rules);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].from_port, "22");
        assert_eq!(converted[0].direction, "inbound");
        assert_eq!(converted[0].cidr, "0.0.0.0/0");
    }
}
