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
use crate::polycloud::driver::types::{DiskReqInfo, KeyValue};
use crate::polycloud::logger::log_info;
use crate::polycloud::resource::registry::{self, resource_key, ResourceKind};

const DATADISK_COMPONENT: &str = "datadisk";

pub const DISK_STATUS_AVAILABLE: &str = "Available";
pub const DISK_STATUS_ATTACHED: &str = "Attached";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDiskReq {
    pub name: String,
    pub connection_name: String,
    pub disk_type: String,
    pub disk_size: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDiskInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub connection_name: String,
    #[serde(default)]
    pub disk_type: String,
    #[serde(default)]
    pub disk_size: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub csp_resource_id: String,
    #[serde(default)]
    pub csp_resource_name: String,
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

pub async fn create_datadisk(
    ctx: &CoreContext,
    ns_id: &str,
    req: &DataDiskReq,
) -> OpResult<DataDiskInfo> {
    check_name(&req.name)?;
    if req.connection_name.is_empty() {
        return Err(OpError::Validation("connectionName is required".to_string()));
    }
    if req.disk_size.is_empty() {
        return Err(OpError::Validation("diskSize is required".to_string()));
    }
    let _guard = ctx.locks().try_acquire(&resource_lock_key(
        ns_id,
        ResourceKind::DataDisk.as_str(),
        &req.name,
    ))?;
    registry::ensure_creatable(ctx, ns_id, ResourceKind::DataDisk, &req.name)?;

    let uuid = gen_uid();
    let call_result = ctx
        .driver()
        .create_disk(
            &req.connection_name,
            DiskReqInfo {
                name: uuid.clone(),
                disk_type: req.disk_type.clone(),
                disk_size: req.disk_size.clone(),
            },
        )
        .await?;

    let content = DataDiskInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: uuid.clone(),
        connection_name: req.connection_name.clone(),
        disk_type: call_result.disk_type.clone(),
        disk_size: call_result.disk_size.clone(),
        status: DISK_STATUS_AVAILABLE.to_string(),
        csp_resource_id: call_result.iid.system_id.clone(),
        csp_resource_name: call_result.iid.name_id.clone(),
        description: req.description.clone(),
        key_value_list: call_result.key_value_list.clone(),
        associated_object_list: Vec::new(),
        is_auto_generated: false,
        system_label: String::new(),
    };

    let key = resource_key(ns_id, ResourceKind::DataDisk, &content.id);
    registry::persist(ctx, &key, &content)?;
    label::upsert_label_best_effort(
        ctx,
        ResourceKind::DataDisk.as_str(),
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
        DATADISK_COMPONENT,
        "Created data disk",
        &[("namespace", ns_id), ("dataDisk", &content.id)],
    );

    Ok(content)
}

pub fn get_datadisk(ctx: &CoreContext, ns_id: &str, disk_id: &str) -> OpResult<DataDiskInfo> {
    registry::load(ctx, ns_id, ResourceKind::DataDisk, disk_id)
}

pub fn list_datadisk(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<DataDiskInfo>> {
    registry::list(ctx, ns_id, ResourceKind::DataDisk)
}
