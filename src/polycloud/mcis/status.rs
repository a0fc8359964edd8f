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

use std::fmt;

use crate::polycloud::mcis::types::VmStatus;

/// Aggregate MCIS status: a deterministic function of the member VM states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggregateStatus {
    /// No member VMs recorded.
    Undefined,
    Running,
    Suspended,
    Terminated,
    Failed,
    /// At least one VM is in a pending state; carries the dominant one.
    InProgress(VmStatus),
    /// Mixed terminal states; carries the dominant terminal state, or
    /// `Failed` when any VM failed.
    Partial(VmStatus),
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateStatus::Undefined => write!(f, "Undefined"),
            AggregateStatus::Running => write!(f, "Running"),
            AggregateStatus::Suspended => write!(f, "Suspended"),
            AggregateStatus::Terminated => write!(f, "Terminated"),
            AggregateStatus::Failed => write!(f, "Failed"),
            AggregateStatus::InProgress(state) => write!(f, "{}-InProgress", state.as_str()),
            AggregateStatus::Partial(state) => write!(f, "Partial-{}", state.as_str()),
        }
    }
}

fn count_of(statuses: &[VmStatus], wanted: VmStatus) -> usize {
    statuses.iter().filter(|status| **status == wanted).count()
}

/// Computes the aggregate label over observed VM states:
/// all equal terminal state → that state; any pending state → the dominant
/// pending action as `-InProgress`; mixed terminal states → `Partial-` with
/// `Failed` dominating whenever present.
pub fn aggregate(statuses: &[VmStatus]) -> AggregateStatus {
    if statuses.is_empty() {
        return AggregateStatus::Undefined;
    }

    let pending_states = [VmStatus::Creating, VmStatus::Rebooting, VmStatus::Terminating];
    let dominant_pending = pending_states
        .into_iter()
        .map(|state| (count_of(statuses, state), state))
        .max_by_key(|(count, _)| *count)
        .filter(|(count, _)| *count > 0)
        .map(|(_, state)| state);

    if let Some(state) = dominant_pending {
        return AggregateStatus::InProgress(state);
    }

    let total = statuses.len();
    if count_of(statuses, VmStatus::Running) == total {
        return AggregateStatus::Running;
    }
    if count_of(statuses, VmStatus::Suspended) == total {
        return AggregateStatus::Suspended;
    }
    if count_of(statuses, VmStatus::Terminated) == total {
        return AggregateStatus::Terminated;
    }
    if count_of(statuses, VmStatus::Failed) == total {
        return AggregateStatus::Failed;
    }

    if count_of(statuses, VmStatus::Failed) > 0 {
        return AggregateStatus::Partial(VmStatus::Failed);
    }

    let terminal_states = [VmStatus::Running, VmStatus::Suspended, VmStatus::Terminated];
    let dominant = terminal_states
        .into_iter()
        .map(|state| (count_of(statuses, state), state))
        .max_by_key(|(count, _)| *count)
        .map(|(_, state)| state)
        .unwrap_or(VmStatus::Running);

    AggregateStatus::Partial(dominant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_states_aggregate_to_themselves() {
        assert_eq!(
            aggregate(&[VmStatus::Running, VmStatus::Running]),
            AggregateStatus::Running
        );
        assert_eq!(
            aggregate(&[VmStatus::Suspended, VmStatus::Suspended]),
            AggregateStatus::Suspended
        );
        assert_eq!(aggregate(&[VmStatus::Terminated]), AggregateStatus::Terminated);
        assert_eq!(aggregate(&[VmStatus::Failed]), AggregateStatus::Failed);
    }

    #[test]
    fn pending_states_dominate() {
        assert_eq!(
            aggregate(&[VmStatus::Running, VmStatus::Creating]),
            AggregateStatus::InProgress(VmStatus::Creating)
        );
        assert_eq!(
            aggregate(&[VmStatus::Terminating, VmStatus::Terminating, VmStatus::Running]),
            AggregateStatus::InProgress(VmStatus::Terminating)
        );
        assert_eq!(
            aggregate(&[VmStatus::Rebooting, VmStatus::Failed]),
            AggregateStatus::InProgress(VmStatus::Rebooting)
        );
    }

    #[test]
    fn any_failure_without_pending_is_partial_failed() {
        assert_eq!(
            aggregate(&[VmStatus::Running, VmStatus::Failed]),
            AggregateStatus::Partial(VmStatus::Failed)
        );
        assert_eq!(
            aggregate(&[VmStatus::Terminated, VmStatus::Failed, VmStatus::Suspended]),
            AggregateStatus::Partial(VmStatus::Failed)
        );
    }

    #[test]
    fn mixed_terminal_states_carry_the_dominant_one() {
        assert_eq!(
            aggregate(&[VmStatus::Running, VmStatus::Running, VmStatus::Suspended]),
            AggregateStatus::Partial(VmStatus::Running)
        );
        assert_eq!(
            aggregate(&[VmStatus::Suspended, VmStatus::Suspended, VmStatus::Terminated]),
            AggregateStatus::Partial(VmStatus::Suspended)
        );
    }

    #[test]
    fn empty_is_undefined() {
        assert_eq!(aggregate(&[]), AggregateStatus::Undefined);
    }

    #[test]
    fn labels_render_the_documented_format() {
        assert_eq!(
            aggregate(&[VmStatus::Creating]).to_string(),
            "Creating-InProgress"
        );
        assert_eq!(
            aggregate(&[VmStatus::Running, VmStatus::Failed]).to_string(),
            "Partial-Failed"
        );
        assert_eq!(aggregate(&[VmStatus::Running]).to_string(), "Running");
    }
}
