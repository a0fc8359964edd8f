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

use std::error::Error;
use std::fmt;

use crate::polycloud::driver::DriverFailure;

/// Client-facing error taxonomy for every orchestration operation.
#[derive(Debug)]
pub enum OpError {
    /// Malformed or missing request fields.
    Validation(String),
    /// Entity or parent namespace absent.
    NotFound { kind: &'static str, id: String },
    /// Duplicate id on Create.
    AlreadyExists { kind: &'static str, id: String },
    /// Invariant violation: non-empty association list, disallowed state
    /// transition, non-empty namespace on delete.
    Conflict(String),
    /// Per-entity lock held or per-connection queue full.
    Busy(String),
    /// Upstream driver failure with sub-kind and raw driver message.
    Driver(DriverFailure),
    /// Keyspace or serialization failure.
    Internal(Box<dyn Error + Send + Sync>),
}

pub type OpResult<T> = Result<T, OpError>;

impl OpError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        OpError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        OpError::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    pub fn internal<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        OpError::Internal(err.into())
    }

    /// Stable label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            OpError::Validation(_) => "Validation",
            OpError::NotFound { .. } => "NotFound",
            OpError::AlreadyExists { .. } => "AlreadyExists",
            OpError::Conflict(_) => "Conflict",
            OpError::Busy(_) => "Busy",
            OpError::Driver(_) => "DriverError",
            OpError::Internal(_) => "Internal",
        }
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpError::Validation(message) => write!(f, "validation failed: {}", message),
            OpError::NotFound { kind, id } => write!(f, "{} '{}' does not exist", kind, id),
            OpError::AlreadyExists { kind, id } => write!(f, "{} '{}' already exists", kind, id),
            OpError::Conflict(message) => write!(f, "conflict: {}", message),
            OpError::Busy(message) => write!(f, "busy: {}", message),
            OpError::Driver(failure) => write!(f, "{}", failure),
            OpError::Internal(err) => write!(f, "internal error: {}", err),
        }
    }
}

impl Error for OpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OpError::Driver(failure) => Some(failure),
            OpError::Internal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<DriverFailure> for OpError {
    fn from(failure: DriverFailure) -> Self {
        OpError::Driver(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polycloud::driver::DriverFailureKind;

    #[test]
    fn labels_match_variants() {
        assert_eq!(OpError::Validation("x".into()).label(), "Validation");
        assert_eq!(OpError::not_found("vNet", "v1").label(), "NotFound");
        assert_eq!(OpError::already_exists("mcis", "m1").label(), "AlreadyExists");
        assert_eq!(OpError::Busy("locked".into()).label(), "Busy");
        let driver = OpError::from(DriverFailure::new(DriverFailureKind::Timeout, "deadline"));
        assert_eq!(driver.label(), "DriverError");
    }

    #[test]
    fn display_includes_entity_identifiers() {
        let err = OpError::not_found("sshKey", "key-1");
        assert_eq!(err.to_string(), "sshKey 'key-1' does not exist");
        let err = OpError::already_exists("namespace", "ns-a");
        assert_eq!(err.to_string(), "namespace 'ns-a' already exists");
    }
}
