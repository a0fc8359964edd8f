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

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::polycloud::common::concurrency::resource_lock_key;
use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::common::validation::check_name;
use crate::polycloud::common::{label, namespace};
use crate::polycloud::logger::log_info;
use crate::polycloud::util::get_child_list;

const REGISTRY_COMPONENT: &str = "resource";

/// Tag over the shared infrastructure resource kinds. Subnets are children
/// of a vNet and are addressed through their parent rather than this tag.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    VNet,
    SecurityGroup,
    SshKey,
    Image,
    Spec,
    DataDisk,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::VNet,
        ResourceKind::SecurityGroup,
        ResourceKind::SshKey,
        ResourceKind::Image,
        ResourceKind::Spec,
        ResourceKind::DataDisk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::VNet => "vNet",
            ResourceKind::SecurityGroup => "securityGroup",
            ResourceKind::SshKey => "sshKey",
            ResourceKind::Image => "image",
            ResourceKind::Spec => "spec",
            ResourceKind::DataDisk => "dataDisk",
        }
    }

    pub fn parse(name: &str) -> Option<ResourceKind> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// True for catalog kinds that only mirror driver lookups and have no
    /// CSP-side object of their own to delete.
    pub fn is_catalog(self) -> bool {
        matches!(self, ResourceKind::Image | ResourceKind::Spec)
    }
}

pub fn resource_prefix(ns_id: &str, kind: ResourceKind) -> String {
    format!("/ns/{}/resources/{}", ns_id, kind.as_str())
}

pub fn resource_key(ns_id: &str, kind: ResourceKind, id: &str) -> String {
    format!("{}/{}", resource_prefix(ns_id, kind), id)
}

pub fn subnet_key(ns_id: &str, vnet_id: &str, subnet_id: &str) -> String {
    format!(
        "{}/subnet/{}",
        resource_key(ns_id, ResourceKind::VNet, vnet_id),
        subnet_id
    )
}

/// Existence check used as the create-time uniqueness gate.
pub fn check_resource(ctx: &CoreContext, ns_id: &str, kind: ResourceKind, id: &str) -> OpResult<bool> {
    check_name(ns_id)?;
    check_name(id)?;
    ctx.keyspace()
        .exists(&resource_key(ns_id, kind, id))
        .map_err(OpError::internal)
}

/// Shared create-time gate: the namespace must exist and the id must be free.
pub fn ensure_creatable(
    ctx: &CoreContext,
    ns_id: &str,
    kind: ResourceKind,
    id: &str,
) -> OpResult<()> {
    if !namespace::check_ns(ctx, ns_id)? {
        return Err(OpError::not_found("namespace", ns_id));
    }
    if check_resource(ctx, ns_id, kind, id)? {
        return Err(OpError::already_exists(kind.as_str(), id));
    }
    Ok(())
}

pub fn persist<T: Serialize>(ctx: &CoreContext, key: &str, record: &T) -> OpResult<()> {
    let encoded = serde_json::to_string(record).map_err(OpError::internal)?;
    ctx.keyspace().put(key, &encoded).map_err(OpError::internal)
}

pub fn load_at<T: DeserializeOwned>(ctx: &CoreContext, key: &str) -> OpResult<Option<T>> {
    match ctx.keyspace().get(key).map_err(OpError::internal)? {
        Some(entry) => {
            let parsed = serde_json::from_str(&entry.value).map_err(OpError::internal)?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub fn load<T: DeserializeOwned>(
    ctx: &CoreContext,
    ns_id: &str,
    kind: ResourceKind,
    id: &str,
) -> OpResult<T> {
    let key = resource_key(ns_id, kind, id);
    let entry = ctx
        .keyspace()
        .get(&key)
        .map_err(OpError::internal)?
        .ok_or_else(|| OpError::not_found(kind.as_str(), id))?;

    // Label writes are best-effort; a read of the primary re-asserts a
    // missing index entry.
    if let Ok(raw) = serde_json::from_str::<Value>(&entry.value) {
        let uuid = record_field(&raw, "uuid");
        if !uuid.is_empty() {
            match label::get_label(ctx, kind.as_str(), &uuid) {
                Ok(None) => label::upsert_label_best_effort(
                    ctx,
                    kind.as_str(),
                    &uuid,
                    &key,
                    Default::default(),
                    [
                        ("provider".to_string(), "polycloud".to_string()),
                        ("namespace".to_string(), ns_id.to_string()),
                    ]
                    .into(),
                ),
                Ok(Some(_)) | Err(_) => {}
            }
        }
    }

    serde_json::from_str(&entry.value).map_err(OpError::internal)
}

/// Lists the records of one kind, excluding children stored beneath them
/// (a vNet's subnets live one level deeper).
pub fn list<T: DeserializeOwned>(
    ctx: &CoreContext,
    ns_id: &str,
    kind: ResourceKind,
) -> OpResult<Vec<T>> {
    let prefix = resource_prefix(ns_id, kind);
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;
    let entries = get_child_list(&entries, &prefix);

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let record = serde_json::from_str(&entry.value).map_err(OpError::internal)?;
        records.push(record);
    }
    Ok(records)
}

pub fn list_resource_id(ctx: &CoreContext, ns_id: &str, kind: ResourceKind) -> OpResult<Vec<String>> {
    let prefix = resource_prefix(ns_id, kind);
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;
    Ok(get_child_list(&entries, &prefix)
        .into_iter()
        .filter_map(|entry| entry.key.rsplit('/').next().map(str::to_string))
        .collect())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AssociationAction {
    Add,
    Remove,
}

/// Patches the `associatedObjectList` of the record stored at `key`.
/// Entries are primary keys of the dependents; duplicates are dropped.
pub fn update_associations_at(
    ctx: &CoreContext,
    key: &str,
    action: AssociationAction,
    object_key: &str,
) -> OpResult<Vec<String>> {
    let entry = ctx
        .keyspace()
        .get(key)
        .map_err(OpError::internal)?
        .ok_or_else(|| OpError::not_found("resource", key))?;

    let mut record: Value = serde_json::from_str(&entry.value).map_err(OpError::internal)?;
    let mut associations: Vec<String> = record
        .get("associatedObjectList")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match action {
        AssociationAction::Add => {
            if !associations.iter().any(|existing| existing == object_key) {
                associations.push(object_key.to_string());
            }
        }
        AssociationAction::Remove => {
            associations.retain(|existing| existing != object_key);
        }
    }

    record["associatedObjectList"] = Value::from(associations.clone());
    let encoded = serde_json::to_string(&record).map_err(OpError::internal)?;
    ctx.keyspace().put(key, &encoded).map_err(OpError::internal)?;

    Ok(associations)
}

pub fn update_associated_object_list(
    ctx: &CoreContext,
    ns_id: &str,
    kind: ResourceKind,
    id: &str,
    action: AssociationAction,
    object_key: &str,
) -> OpResult<Vec<String>> {
    update_associations_at(ctx, &resource_key(ns_id, kind, id), action, object_key)
}

pub fn get_associated_object_list(
    ctx: &CoreContext,
    ns_id: &str,
    kind: ResourceKind,
    id: &str,
) -> OpResult<Vec<String>> {
    let record: Value = load(ctx, ns_id, kind, id)?;
    Ok(record
        .get("associatedObjectList")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

fn record_field(record: &Value, field: &str) -> String {
    record
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The name this record is known by on the CSP side: the driver-local
/// `cspResourceName` when recorded, else the synthesized `uuid`.
pub fn csp_name(record: &Value) -> String {
    let recorded = record_field(record, "cspResourceName");
    if recorded.is_empty() {
        record_field(record, "uuid")
    } else {
        recorded
    }
}

/// Deletes a resource of any kind: refuse while dependents are recorded,
/// tear down the CSP object through the driver, then remove the record and
/// its label entry. vNet cascades to its subnets before itself.
pub async fn delete_resource(
    ctx: &CoreContext,
    ns_id: &str,
    kind: ResourceKind,
    id: &str,
    force: bool,
) -> OpResult<()> {
    let _guard = ctx
        .locks()
        .try_acquire(&resource_lock_key(ns_id, kind.as_str(), id))?;

    let record: Value = load(ctx, ns_id, kind, id)?;

    let associations = record
        .get("associatedObjectList")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if !associations.is_empty() {
        return Err(OpError::Conflict(format!(
            "{} '{}' is still referenced by {:?}",
            kind.as_str(),
            id,
            associations
        )));
    }

    let connection_name = record_field(&record, "connectionName");
    let driver_name = csp_name(&record);

    match kind {
        ResourceKind::VNet => {
            crate::polycloud::resource::vnet::delete_child_subnets(ctx, ns_id, id, &record, force)
                .await?;
            ctx.driver()
                .delete_vpc(&connection_name, &driver_name, force)
                .await?;
        }
        ResourceKind::SecurityGroup => {
            ctx.driver()
                .delete_security_group(&connection_name, &driver_name, force)
                .await?;
            crate::polycloud::resource::securitygroup::release_parent_vnet(ctx, ns_id, &record)?;
        }
        ResourceKind::SshKey => {
            ctx.driver()
                .delete_keypair(&connection_name, &driver_name, force)
                .await?;
        }
        ResourceKind::DataDisk => {
            ctx.driver()
                .delete_disk(&connection_name, &driver_name, force)
                .await?;
        }
        ResourceKind::Image | ResourceKind::Spec => {
            // Catalog records mirror driver lookups; nothing exists on the
            // CSP side to tear down.
        }
    }

    ctx.keyspace()
        .delete(&resource_key(ns_id, kind, id))
        .map_err(OpError::internal)?;
    label::remove_label(ctx, kind.as_str(), &record_field(&record, "uuid"))?;

    log_info(
        REGISTRY_COMPONENT,
        "Deleted resource",
        &[
            ("namespace", ns_id),
            ("kind", kind.as_str()),
            ("id", id),
        ],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::parse("vpc"), None);
    }

    #[test]
    fn keys_mirror_object_hierarchy() {
        assert_eq!(
            resource_key("ns-a", ResourceKind::VNet, "vnet1"),
            "/ns/ns-a/resources/vNet/vnet1"
        );
        assert_eq!(
            subnet_key("ns-a", "vnet1", "sn1"),
            "/ns/ns-a/resources/vNet/vnet1/subnet/sn1"
        );
    }

    #[test]
    fn csp_name_prefers_recorded_driver_name() {
        let with_name = serde_json::json!({
            "uuid": "pc-123",
            "cspResourceName": "pc-123-renamed",
        });
        assert_eq!(csp_name(&with_name), "pc-123-renamed");

        let without = serde_json::json!({ "uuid": "pc-123" });
        assert_eq!(csp_name(&without), "pc-123");
    }
}
