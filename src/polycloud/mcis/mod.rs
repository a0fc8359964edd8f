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

//! Lifecycle of multi-cloud infra services: groups of VMs provisioned in
//! parallel across connections, with a per-VM state machine, deterministic
//! status aggregation, control actions, and a periodic reconciliation sweep.

pub mod autocontrol;
pub mod control;
pub mod provision;
pub mod status;
pub mod types;

pub use status::{aggregate, AggregateStatus};
pub use types::{McisInfo, McisReq, VmAction, VmInfo, VmReq, VmStatus};
