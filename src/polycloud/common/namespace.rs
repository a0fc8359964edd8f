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

use serde::{Deserialize, Serialize};

use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::common::validation::check_name;
use crate::polycloud::common::{gen_uid, label};
use crate::polycloud::logger::log_info;
use crate::polycloud::util::get_child_list;

const NAMESPACE_COMPONENT: &str = "namespace";
const NAMESPACE_KIND: &str = "ns";
const NAMESPACE_PREFIX: &str = "/ns";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NsReq {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NsInfo {
    pub id: String,
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub description: String,
}

pub fn ns_key(ns_id: &str) -> String {
    format!("{}/{}", NAMESPACE_PREFIX, ns_id)
}

/// Creates a tenant container. Everything else in the system is keyed
/// beneath it.
pub fn create_ns(ctx: &CoreContext, req: &NsReq) -> OpResult<NsInfo> {
    check_name(&req.name)?;

    if check_ns(ctx, &req.name)? {
        return Err(OpError::already_exists("namespace", &req.name));
    }

    let content = NsInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: gen_uid(),
        description: req.description.clone(),
    };

    let encoded = serde_json::to_string(&content).map_err(OpError::internal)?;
    ctx.keyspace()
        .put(&ns_key(&content.id), &encoded)
        .map_err(OpError::internal)?;

    label::upsert_label_best_effort(
        ctx,
        NAMESPACE_KIND,
        &content.uuid,
        &ns_key(&content.id),
        HashMap::new(),
        HashMap::from([("provider".to_string(), "polycloud".to_string())]),
    );

    log_info(
        NAMESPACE_COMPONENT,
        "Created namespace",
        &[("namespace", &content.id)],
    );

    Ok(content)
}

pub fn get_ns(ctx: &CoreContext, ns_id: &str) -> OpResult<NsInfo> {
    check_name(ns_id)?;

    let entry = ctx
        .keyspace()
        .get(&ns_key(ns_id))
        .map_err(OpError::internal)?
        .ok_or_else(|| OpError::not_found("namespace", ns_id))?;

    serde_json::from_str(&entry.value).map_err(OpError::internal)
}

pub fn check_ns(ctx: &CoreContext, ns_id: &str) -> OpResult<bool> {
    check_name(ns_id)?;
    ctx.keyspace()
        .exists(&ns_key(ns_id))
        .map_err(OpError::internal)
}

pub fn list_ns(ctx: &CoreContext) -> OpResult<Vec<NsInfo>> {
    let entries = ctx
        .keyspace()
        .get_list(NAMESPACE_PREFIX, true)
        .map_err(OpError::internal)?;
    let entries = get_child_list(&entries, NAMESPACE_PREFIX);

    let mut namespaces = Vec::with_capacity(entries.len());
    for entry in entries {
        let ns: NsInfo = serde_json::from_str(&entry.value).map_err(OpError::internal)?;
        namespaces.push(ns);
    }
    Ok(namespaces)
}

pub fn list_ns_id(ctx: &CoreContext) -> OpResult<Vec<String>> {
    Ok(list_ns(ctx)?.into_iter().map(|ns| ns.id).collect())
}

/// Destroys a namespace. Refused while any key lives beneath it, so every
/// resource, MCIS, and cluster must be deleted first.
pub fn del_ns(ctx: &CoreContext, ns_id: &str) -> OpResult<()> {
    let ns = get_ns(ctx, ns_id)?;

    let children = ctx
        .keyspace()
        .get_list(&ns_key(ns_id), true)
        .map_err(OpError::internal)?;
    if !children.is_empty() {
        return Err(OpError::Conflict(format!(
            "namespace '{}' still holds {} object(s)",
            ns_id,
            children.len()
        )));
    }

    ctx.keyspace()
        .delete(&ns_key(ns_id))
        .map_err(OpError::internal)?;
    label::remove_label(ctx, NAMESPACE_KIND, &ns.uuid)?;

    log_info(
        NAMESPACE_COMPONENT,
        "Deleted namespace",
        &[("namespace", ns_id)],
    );
    Ok(())
}
