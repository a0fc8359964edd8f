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

use crate::polycloud::common::concurrency::resource_lock_key;
use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::common::validation::check_name;
use crate::polycloud::common::{gen_uid, label};
use crate::polycloud::driver::types::KeyValue;
use crate::polycloud::resource::registry::{self, resource_key, ResourceKind};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecReq {
    pub name: String,
    pub connection_name: String,
    pub csp_spec_name: String,
    #[serde(default)]
    pub description: String,
}

/// Catalog record for a CSP machine flavor, registered via driver lookup.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub connection_name: String,
    pub csp_spec_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub num_vcpu: String,
    #[serde(default)]
    pub mem_gib: String,
    #[serde(default)]
    pub clock_ghz: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
    #[serde(default)]
    pub associated_object_list: Vec<String>,
    #[serde(default)]
    pub is_auto_generated: bool,
    #[serde(default)]
    pub system_label: String,
}

pub async fn register_spec(ctx: &CoreContext, ns_id: &str, req: &SpecReq) -> OpResult<SpecInfo> {
    check_name(&req.name)?;
    if req.connection_name.is_empty() {
        return Err(OpError::Validation("connectionName is required".to_string()));
    }
    if req.csp_spec_name.is_empty() {
        return Err(OpError::Validation("cspSpecName is required".to_string()));
    }
    let _guard = ctx.locks().try_acquire(&resource_lock_key(
        ns_id,
        ResourceKind::Spec.as_str(),
        &req.name,
    ))?;
    registry::ensure_creatable(ctx, ns_id, ResourceKind::Spec, &req.name)?;

    let call_result = ctx
        .driver()
        .lookup_vm_spec(&req.connection_name, &req.csp_spec_name)
        .await?;

    let uuid = gen_uid();
    let content = SpecInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: uuid.clone(),
        connection_name: req.connection_name.clone(),
        csp_spec_name: req.csp_spec_name.clone(),
        region: call_result.region.clone(),
        num_vcpu: call_result.v_cpu.count.clone(),
        mem_gib: call_result.mem.clone(),
        clock_ghz: call_result.v_cpu.clock.clone(),
        description: req.description.clone(),
        key_value_list: call_result.key_value_list.clone(),
        associated_object_list: Vec::new(),
        is_auto_generated: false,
        system_label: String::new(),
    };

    let key = resource_key(ns_id, ResourceKind::Spec, &content.id);
    registry::persist(ctx, &key, &content)?;
    label::upsert_label_best_effort(
        ctx,
        ResourceKind::Spec.as_str(),
        &uuid,
        &key,
        Default::default(),
        [
            ("provider".to_string(), "polycloud".to_string()),
            ("namespace".to_string(), ns_id.to_string()),
        ]
        .into(),
    );

    Ok(content)
}

pub fn get_spec(ctx: &CoreContext, ns_id: &str, spec_id: &str) -> OpResult<SpecInfo> {
    registry::load(ctx, ns_id, ResourceKind::Spec, spec_id)
}

pub fn list_spec(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<SpecInfo>> {
    registry::list(ctx, ns_id, ResourceKind::Spec)
}
