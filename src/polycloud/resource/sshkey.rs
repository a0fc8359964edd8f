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
use crate::polycloud::driver::types::{KeyPairReqInfo, KeyValue};
use crate::polycloud::logger::log_info;
use crate::polycloud::resource::registry::{self, resource_key, ResourceKind};

const SSHKEY_COMPONENT: &str = "sshkey";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyReq {
    pub name: String,
    pub connection_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub connection_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
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

pub async fn create_sshkey(
    ctx: &CoreContext,
    ns_id: &str,
    req: &SshKeyReq,
) -> OpResult<SshKeyInfo> {
    check_name(&req.name)?;
    if req.connection_name.is_empty() {
        return Err(OpError::Validation("connectionName is required".to_string()));
    }
    let _guard = ctx.locks().try_acquire(&resource_lock_key(
        ns_id,
        ResourceKind::SshKey.as_str(),
        &req.name,
    ))?;
    registry::ensure_creatable(ctx, ns_id, ResourceKind::SshKey, &req.name)?;

    let uuid = gen_uid();
    let call_result = ctx
        .driver()
        .create_keypair(&req.connection_name, KeyPairReqInfo { name: uuid.clone() })
        .await?;

    let content = SshKeyInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: uuid.clone(),
        connection_name: req.connection_name.clone(),
        description: req.description.clone(),
        username: if req.username.is_empty() {
            call_result.vm_user_id.clone()
        } else {
            req.username.clone()
        },
        fingerprint: call_result.fingerprint.clone(),
        public_key: call_result.public_key.clone(),
        private_key: call_result.private_key.clone(),
        csp_resource_id: call_result.iid.system_id.clone(),
        csp_resource_name: call_result.iid.name_id.clone(),
        key_value_list: call_result.key_value_list.clone(),
        associated_object_list: Vec::new(),
        is_auto_generated: false,
        system_label: String::new(),
    };

    let key = resource_key(ns_id, ResourceKind::SshKey, &content.id);
    registry::persist(ctx, &key, &content)?;
    label::upsert_label_best_effort(
        ctx,
        ResourceKind::SshKey.as_str(),
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
        SSHKEY_COMPONENT,
        "Created SSH key",
        &[("namespace", ns_id), ("sshKey", &content.id)],
    );

    Ok(content)
}

pub fn get_sshkey(ctx: &CoreContext, ns_id: &str, key_id: &str) -> OpResult<SshKeyInfo> {
    registry::load(ctx, ns_id, ResourceKind::SshKey, key_id)
}

pub fn list_sshkey(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<SshKeyInfo>> {
    registry::list(ctx, ns_id, ResourceKind::SshKey)
}
