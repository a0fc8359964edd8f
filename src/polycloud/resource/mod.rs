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

//! Shared infrastructure resources: virtual networks and their subnets,
//! security groups, SSH keys, registered images and VM specs, and data
//! disks. Each kind owns its validation and driver mapping; the generic
//! persistence, existence, and association bookkeeping lives in
//! [`registry`].

pub mod datadisk;
pub mod image;
pub mod registry;
pub mod securitygroup;
pub mod spec;
pub mod sshkey;
pub mod vnet;

pub use registry::{AssociationAction, ResourceKind};
