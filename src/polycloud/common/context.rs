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

use std::sync::Arc;

use crate::polycloud::common::concurrency::{ConnectionLimiter, EntityLockTable};
use crate::polycloud::common::config_store::RuntimeConfig;
use crate::polycloud::driver::{DriverClient, DriverTransport, HttpTransport};
use crate::polycloud::util::Keyspace;

const CORE_KEYSPACE: Keyspace = Keyspace::new("core");

/// Everything an orchestration operation needs, threaded explicitly through
/// call sites instead of living in ambient globals: the keyspace handle, the
/// driver client, the config mirror, and the concurrency control tables.
pub struct CoreContext {
    keyspace: Keyspace,
    driver: DriverClient,
    runtime: Arc<RuntimeConfig>,
    locks: EntityLockTable,
    limiter: ConnectionLimiter,
}

impl CoreContext {
    pub fn new(transport: Arc<dyn DriverTransport>, runtime: Arc<RuntimeConfig>) -> Self {
        CoreContext {
            keyspace: CORE_KEYSPACE,
            driver: DriverClient::new(transport),
            runtime,
            locks: EntityLockTable::new(),
            limiter: ConnectionLimiter::new(),
        }
    }

    /// Production wiring: HTTP transport against the configured driver URL.
    pub fn with_http_driver(runtime: Arc<RuntimeConfig>) -> Self {
        let transport = Arc::new(HttpTransport::new(Arc::clone(&runtime)));
        Self::new(transport, runtime)
    }

    pub fn keyspace(&self) -> Keyspace {
        self.keyspace
    }

    pub fn driver(&self) -> &DriverClient {
        &self.driver
    }

    pub fn runtime(&self) -> &Arc<RuntimeConfig> {
        &self.runtime
    }

    pub fn locks(&self) -> &EntityLockTable {
        &self.locks
    }

    pub fn limiter(&self) -> &ConnectionLimiter {
        &self.limiter
    }
}
