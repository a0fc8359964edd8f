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

pub mod concurrency;
pub mod config_store;
pub mod context;
pub mod error;
pub mod label;
pub mod namespace;
pub mod validation;

pub use context::CoreContext;
pub use error::{OpError, OpResult};

use uuid::Uuid;

/// Mints the system-assigned identifier for a new entity. The value doubles
/// as the CSP-facing resource name, so it must be globally unique and never
/// reused across tenants sharing one CSP account.
pub fn gen_uid() -> String {
    format!("pc-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_uids_are_unique_and_name_safe() {
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let uid = gen_uid();
            assert!(uid.starts_with("pc-"));
            assert!(uid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-'));
            assert!(seen.insert(uid), "uid collision");
        }
    }
}
