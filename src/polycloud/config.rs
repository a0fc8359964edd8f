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

use std::env;
use std::error::Error;
use std::fs;
use std::path::{Component, PathBuf};

/// Enum for filesystem locations the orchestrator depends on.
#[derive(Debug)]
pub enum Config {
    Keyspace,
    LockFile,
}

impl Config {
    /// Returns the associated environment variable for the config parameter.
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::Keyspace => "POLYCLOUD_KEYSPACE",
            Config::LockFile => "POLYCLOUD_LOCK_FILE",
        }
    }

    /// Returns the default location used when the environment variable is unset.
    pub fn default_path(&self) -> &'static str {
        match self {
            Config::Keyspace => {
                #[cfg(test)]
                {
                    "/tmp/polycloud-test/keyspace"
                }
                #[cfg(not(test))]
                {
                    "/var/lib/polycloud.io/keyspace"
                }
            }
            Config::LockFile => {
                #[cfg(test)]
                {
                    "/tmp/polycloud-test/keyspace/.lock"
                }
                #[cfg(not(test))]
                {
                    "/var/lib/polycloud.io/keyspace/.lock"
                }
            }
        }
    }

    /// Returns the effective value, either from environment or default.
    pub fn get_path(&self) -> PathBuf {
        env::var(self.env_var()).map_or_else(
            |_| Self::normalize_path(self.default_path()),
            |value| Self::normalize_path(&value),
        )
    }

    /// Create the directory if absent and reject non-directory collisions.
    pub fn verify(&self, subpath: Option<&str>) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        let mut path = self.get_path();
        if let Some(subpath) = subpath {
            path = path.join(subpath);
        }

        if !&path.exists() {
            fs::create_dir_all(&path)
                .map_err(|e| format!("Failed to create directory '{}': {}", path.display(), e))?;
        } else if !path.is_dir() {
            return Err(format!("Path '{}' exists but is not a directory", path.display()).into());
        }

        Ok(path)
    }

    /// Normalize a directory path by expanding ~, resolving ., .., and returning an absolute, cleaned path.
    fn normalize_path(input: &str) -> PathBuf {
        let path: PathBuf = match input {
            _ if input.starts_with("~/") => env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(&input[2..])),
            _ if !input.starts_with('/') => env::current_dir().ok().map(|cwd| cwd.join(input)),
            _ => None,
        }
        .unwrap_or_else(|| PathBuf::from(input));

        path.components()
            .fold(PathBuf::new(), |mut normalized, component| {
                match component {
                    Component::CurDir => {}
                    Component::ParentDir => {
                        normalized.pop();
                    }
                    _ => normalized.push(component),
                }
                normalized
            })
    }
}
