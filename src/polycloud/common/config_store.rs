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
use std::env;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::logger::{log_info, log_warn};
use crate::polycloud::util::get_child_list;

const CONFIG_COMPONENT: &str = "config";
const CONFIG_PREFIX: &str = "/config";

/// The allow-listed set of process-tunable parameters. Updates for any other
/// key are rejected.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConfigKey {
    SpiderRestUrl,
    DragonflyRestUrl,
    DbUrl,
    DbDatabase,
    DbUser,
    DbPassword,
    AutocontrolDurationMs,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::SpiderRestUrl,
        ConfigKey::DragonflyRestUrl,
        ConfigKey::DbUrl,
        ConfigKey::DbDatabase,
        ConfigKey::DbUser,
        ConfigKey::DbPassword,
        ConfigKey::AutocontrolDurationMs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::SpiderRestUrl => "SPIDER_REST_URL",
            ConfigKey::DragonflyRestUrl => "DRAGONFLY_REST_URL",
            ConfigKey::DbUrl => "DB_URL",
            ConfigKey::DbDatabase => "DB_DATABASE",
            ConfigKey::DbUser => "DB_USER",
            ConfigKey::DbPassword => "DB_PASSWORD",
            ConfigKey::AutocontrolDurationMs => "AUTOCONTROL_DURATION_MS",
        }
    }

    pub fn parse(name: &str) -> Option<ConfigKey> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }

    fn default_value(self) -> &'static str {
        match self {
            ConfigKey::SpiderRestUrl => "http://localhost:1024/spider",
            ConfigKey::DragonflyRestUrl => "http://localhost:9090/dragonfly",
            ConfigKey::DbUrl => "localhost:3306",
            ConfigKey::DbDatabase => "polycloud",
            ConfigKey::DbUser => "polycloud",
            ConfigKey::DbPassword => "polycloud",
            ConfigKey::AutocontrolDurationMs => "10000",
        }
    }
}

/// Process-wide mirror of the persisted configuration. Single writer (the
/// update path below), many readers (driver transport, autocontrol sweeper).
pub struct RuntimeConfig {
    values: RwLock<HashMap<ConfigKey, String>>,
}

impl RuntimeConfig {
    /// Seeds the mirror from environment variables, falling back to built-in
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut values = HashMap::new();
        for key in ConfigKey::ALL {
            let value =
                env::var(key.as_str()).unwrap_or_else(|_| key.default_value().to_string());
            values.insert(key, value);
        }
        RuntimeConfig {
            values: RwLock::new(values),
        }
    }

    pub fn get(&self, key: ConfigKey) -> String {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(&key).cloned())
            .unwrap_or_else(|| key.default_value().to_string())
    }

    pub fn set(&self, key: ConfigKey, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key, value.into());
        }
    }

    pub fn spider_rest_url(&self) -> String {
        self.get(ConfigKey::SpiderRestUrl)
    }

    pub fn dragonfly_rest_url(&self) -> String {
        self.get(ConfigKey::DragonflyRestUrl)
    }

    /// Autocontrol sweep period. Malformed values fall back to the default.
    pub fn autocontrol_period(&self) -> Duration {
        let raw = self.get(ConfigKey::AutocontrolDurationMs);
        let millis = raw.parse::<u64>().unwrap_or_else(|_| {
            log_warn(
                CONFIG_COMPONENT,
                "Ignoring malformed autocontrol duration",
                &[("value", &raw)],
            );
            ConfigKey::AutocontrolDurationMs
                .default_value()
                .parse()
                .unwrap_or(10000)
        });
        Duration::from_millis(millis.max(1))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConfigReq {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConfigInfo {
    pub id: String,
    pub name: String,
    pub value: String,
}

fn config_key_path(id: &str) -> String {
    format!("{}/{}", CONFIG_PREFIX, id)
}

/// Persists an allow-listed parameter and refreshes the in-process mirror.
pub fn update_config(ctx: &CoreContext, req: &ConfigReq) -> OpResult<ConfigInfo> {
    let key = ConfigKey::parse(&req.name).ok_or_else(|| {
        OpError::Validation(format!("'{}' is not a supported config key", req.name))
    })?;

    let content = ConfigInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        value: req.value.clone(),
    };

    let encoded = serde_json::to_string(&content).map_err(OpError::internal)?;
    ctx.keyspace()
        .put(&config_key_path(&content.id), &encoded)
        .map_err(OpError::internal)?;

    ctx.runtime().set(key, content.value.clone());
    log_info(
        CONFIG_COMPONENT,
        "Updated config parameter",
        &[("name", &content.name)],
    );

    Ok(content)
}

pub fn get_config(ctx: &CoreContext, id: &str) -> OpResult<ConfigInfo> {
    if id.is_empty() {
        return Err(OpError::Validation("config id must not be empty".to_string()));
    }

    let entry = ctx
        .keyspace()
        .get(&config_key_path(id))
        .map_err(OpError::internal)?
        .ok_or_else(|| OpError::not_found("config", id))?;

    serde_json::from_str(&entry.value).map_err(OpError::internal)
}

pub fn check_config(ctx: &CoreContext, id: &str) -> OpResult<bool> {
    if id.is_empty() {
        return Err(OpError::Validation("config id must not be empty".to_string()));
    }
    ctx.keyspace()
        .exists(&config_key_path(id))
        .map_err(OpError::internal)
}

pub fn list_config(ctx: &CoreContext) -> OpResult<Vec<ConfigInfo>> {
    let entries = ctx
        .keyspace()
        .get_list(CONFIG_PREFIX, true)
        .map_err(OpError::internal)?;
    let entries = get_child_list(&entries, CONFIG_PREFIX);

    let mut configs = Vec::with_capacity(entries.len());
    for entry in entries {
        let config: ConfigInfo =
            serde_json::from_str(&entry.value).map_err(OpError::internal)?;
        configs.push(config);
    }
    Ok(configs)
}

pub fn list_config_id(ctx: &CoreContext) -> OpResult<Vec<String>> {
    Ok(list_config(ctx)?.into_iter().map(|c| c.id).collect())
}

pub fn del_all_config(ctx: &CoreContext) -> OpResult<()> {
    let entries = ctx
        .keyspace()
        .get_list(CONFIG_PREFIX, true)
        .map_err(OpError::internal)?;
    for entry in entries {
        ctx.keyspace().delete(&entry.key).map_err(OpError::internal)?;
    }
    Ok(())
}

/// Loads every persisted parameter back into the mirror. Called once at
/// startup before any driver traffic.
pub fn load_persisted_config(ctx: &CoreContext) -> OpResult<()> {
    for config in list_config(ctx)? {
        if let Some(key) = ConfigKey::parse(&config.name) {
            ctx.runtime().set(key, config.value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_parses_known_keys_only() {
        assert_eq!(
            ConfigKey::parse("SPIDER_REST_URL"),
            Some(ConfigKey::SpiderRestUrl)
        );
        assert_eq!(
            ConfigKey::parse("AUTOCONTROL_DURATION_MS"),
            Some(ConfigKey::AutocontrolDurationMs)
        );
        assert_eq!(ConfigKey::parse("NOT_A_KEY"), None);
        assert_eq!(ConfigKey::parse(""), None);
    }

    #[test]
    fn runtime_config_set_is_visible_to_readers() {
        let runtime = RuntimeConfig::from_env();
        runtime.set(ConfigKey::SpiderRestUrl, "http://x:1");
        assert_eq!(runtime.spider_rest_url(), "http://x:1");
    }

    #[test]
    fn malformed_autocontrol_duration_falls_back() {
        let runtime = RuntimeConfig::from_env();
        runtime.set(ConfigKey::AutocontrolDurationMs, "soon");
        assert_eq!(runtime.autocontrol_period(), Duration::from_millis(10000));
        runtime.set(ConfigKey::AutocontrolDurationMs, "250");
        assert_eq!(runtime.autocontrol_period(), Duration::from_millis(250));
    }
}
