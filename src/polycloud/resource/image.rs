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
pub struct ImageReq {
    pub name: String,
    pub connection_name: String,
    pub csp_image_id: String,
    #[serde(default)]
    pub description: String,
}

/// Catalog record for a CSP machine image. Registered by looking the image
/// up through the driver; nothing is provisioned.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub connection_name: String,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
    #[serde(default)]
    pub guest_os: String,
    #[serde(default)]
    pub status: String,
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

pub async fn register_image(
    ctx: &CoreContext,
    ns_id: &str,
    req: &ImageReq,
) -> OpResult<ImageInfo> {
    check_name(&req.name)?;
    if req.connection_name.is_empty() {
        return Err(OpError::Validation("connectionName is required".to_string()));
    }
    if req.csp_image_id.is_empty() {
        return Err(OpError::Validation("cspImageId is required".to_string()));
    }
    let _guard = ctx.locks().try_acquire(&resource_lock_key(
        ns_id,
        ResourceKind::Image.as_str(),
        &req.name,
    ))?;
    registry::ensure_creatable(ctx, ns_id, ResourceKind::Image, &req.name)?;

    let call_result = ctx
        .driver()
        .lookup_image(&req.connection_name, &req.csp_image_id)
        .await?;

    let uuid = gen_uid();
    let content = ImageInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: uuid.clone(),
        connection_name: req.connection_name.clone(),
        csp_resource_id: call_result.iid.system_id.clone(),
        csp_resource_name: call_result.iid.name_id.clone(),
        guest_os: call_result.guest_os.clone(),
        status: call_result.status.clone(),
        description: req.description.clone(),
        key_value_list: call_result.key_value_list.clone(),
        associated_object_list: Vec::new(),
        is_auto_generated: false,
        system_label: String::new(),
    };

    let key = resource_key(ns_id, ResourceKind::Image, &content.id);
    registry::persist(ctx, &key, &content)?;
    label::upsert_label_best_effort(
        ctx,
        ResourceKind::Image.as_str(),
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

pub fn get_image(ctx: &CoreContext, ns_id: &str, image_id: &str) -> OpResult<ImageInfo> {
    registry::load(ctx, ns_id, ResourceKind::Image, image_id)
}

pub fn list_image(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<ImageInfo>> {
    registry::list(ctx, ns_id, ResourceKind::Image)
}
