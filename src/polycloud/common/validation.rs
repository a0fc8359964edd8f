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

use std::net::Ipv4Addr;

use crate::polycloud::common::error::{OpError, OpResult};

pub const MAX_NAME_LENGTH: usize = 32;

/// Validates a tenant-supplied identifier: `[A-Za-z0-9-]`, bounded length,
/// must start and end with an alphanumeric character.
pub fn check_name(name: &str) -> OpResult<()> {
    if name.is_empty() {
        return Err(OpError::Validation("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(OpError::Validation(format!(
            "name '{}' exceeds max length of {} characters",
            name, MAX_NAME_LENGTH
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(OpError::Validation(format!(
            "name '{}' may contain only alphanumeric characters and '-'",
            name
        )));
    }
    let first = name.chars().next().unwrap_or('-');
    let last = name.chars().last().unwrap_or('-');
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(OpError::Validation(format!(
            "name '{}' must start and end with an alphanumeric character",
            name
        )));
    }
    Ok(())
}

/// Validates IPv4 CIDR syntax, e.g. `10.0.0.0/24`.
pub fn check_cidr(cidr: &str) -> OpResult<()> {
    let (addr, prefix) = cidr.split_once('/').ok_or_else(|| {
        OpError::Validation(format!("'{}' is not CIDR notation (a.b.c.d/len)", cidr))
    })?;

    addr.parse::<Ipv4Addr>().map_err(|_| {
        OpError::Validation(format!("'{}' has an invalid IPv4 address part", cidr))
    })?;

    let prefix_len: u8 = prefix
        .parse()
        .map_err(|_| OpError::Validation(format!("'{}' has an invalid prefix length", cidr)))?;
    if prefix_len > 32 {
        return Err(OpError::Validation(format!(
            "'{}' prefix length must be at most 32",
            cidr
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_identifiers() {
        assert!(check_name("ns-a").is_ok());
        assert!(check_name("vnet1").is_ok());
        assert!(check_name("Web-Tier-01").is_ok());
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert!(check_name("").is_err());
        assert!(check_name("-leading").is_err());
        assert!(check_name("trailing-").is_err());
        assert!(check_name("under_score").is_err());
        assert!(check_name("dot.name").is_err());
        assert!(check_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn validates_cidr_syntax() {
        assert!(check_cidr("10.0.0.0/24").is_ok());
        assert!(check_cidr("192.168.0.0/16").is_ok());
        assert!(check_cidr("10.0.0.0").is_err());
        assert!(check_cidr("10.0.0.0/33").is_err());
        assert!(check_cidr("300.0.0.0/8").is_err());
    }
}
