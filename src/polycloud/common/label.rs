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

use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::logger::log_warn;

const LABEL_COMPONENT: &str = "label";
const LABEL_PREFIX: &str = "/label";

/// Secondary index entry mapping `(kind, uuid)` to the primary key plus
/// user and system labels. Enables label queries without scanning the
/// primary tree.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEntry {
    pub primary_key: String,
    #[serde(default)]
    pub user_labels: HashMap<String, String>,
    #[serde(default)]
    pub system_labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

fn label_key(kind: &str, uuid: &str) -> String {
    format!("{}/{}/{}", LABEL_PREFIX, kind, uuid)
}

/// Writes (or re-asserts) the index entry for an entity. The original
/// `createdAt` survives rewrites so the entry reflects first registration.
pub fn upsert_label(
    ctx: &CoreContext,
    kind: &str,
    uuid: &str,
    primary_key: &str,
    user_labels: HashMap<String, String>,
    system_labels: HashMap<String, String>,
) -> OpResult<LabelEntry> {
    let key = label_key(kind, uuid);

    let created_at = match ctx.keyspace().get(&key).map_err(OpError::internal)? {
        Some(existing) => serde_json::from_str::<LabelEntry>(&existing.value)
            .map(|entry| entry.created_at)
            .unwrap_or_else(|_| Utc::now()),
        None => Utc::now(),
    };

    let entry = LabelEntry {
        primary_key: primary_key.to_string(),
        user_labels,
        system_labels,
        created_at,
    };

    let encoded = serde_json::to_string(&entry).map_err(OpError::internal)?;
    ctx.keyspace().put(&key, &encoded).map_err(OpError::internal)?;
    Ok(entry)
}

/// Best-effort variant used after primary writes: failures are logged and
/// swallowed so they never fail the operation that already succeeded against
/// the driver. The next read of the primary re-asserts the entry.
pub fn upsert_label_best_effort(
    ctx: &CoreContext,
    kind: &str,
    uuid: &str,
    primary_key: &str,
    user_labels: HashMap<String, String>,
    system_labels: HashMap<String, String>,
) {
    if let Err(err) = upsert_label(ctx, kind, uuid, primary_key, user_labels, system_labels) {
        log_warn(
            LABEL_COMPONENT,
            "Deferred label index write; will re-assert on next read",
            &[
                ("kind", kind),
                ("uuid", uuid),
                ("cause", &err.to_string()),
            ],
        );
    }
}

pub fn get_label(ctx: &CoreContext, kind: &str, uuid: &str) -> OpResult<Option<LabelEntry>> {
    match ctx
        .keyspace()
        .get(&label_key(kind, uuid))
        .map_err(OpError::internal)?
    {
        Some(entry) => {
            let parsed = serde_json::from_str(&entry.value).map_err(OpError::internal)?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Removes the index entry. Missing entries are not an error: label writes
/// are best-effort, so deletion must tolerate an entry that never landed.
pub fn remove_label(ctx: &CoreContext, kind: &str, uuid: &str) -> OpResult<()> {
    let key = label_key(kind, uuid);
    if ctx.keyspace().exists(&key).map_err(OpError::internal)? {
        ctx.keyspace().delete(&key).map_err(OpError::internal)?;
    }
    Ok(())
}

/// Scans the index for entries of a kind carrying `labels[key] == value`.
/// Returns `(uuid, entry)` pairs.
pub fn find_by_label(
    ctx: &CoreContext,
    kind: &str,
    key: &str,
    value: &str,
) -> OpResult<Vec<(String, LabelEntry)>> {
    let prefix = format!("{}/{}", LABEL_PREFIX, kind);
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;

    let mut matches = Vec::new();
    for raw in entries {
        let entry: LabelEntry = match serde_json::from_str(&raw.value) {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let hit = entry.user_labels.get(key).map(String::as_str) == Some(value)
            || entry.system_labels.get(key).map(String::as_str) == Some(value);
        if hit {
            let uuid = raw
                .key
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            matches.push((uuid, entry));
        }
    }
    Ok(matches)
}
