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
use std::sync::{Arc, Mutex};

use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::namespace;
use crate::polycloud::logger::{log_info, log_warn};
use crate::polycloud::mcis::control::control_mcis;
use crate::polycloud::mcis::provision::{list_mcis_id, list_vms};
use crate::polycloud::mcis::status::aggregate;
use crate::polycloud::mcis::types::{mcis_key, McisInfo, VmAction, VmStatus};
use crate::polycloud::observability::metrics;
use crate::polycloud::resource::registry;
use crate::polycloud::scheduler::{JobResult, ScheduleSpec, Scheduler, ScheduledTaskHandle};

const AUTOCONTROL_COMPONENT: &str = "autocontrol";
const MAX_RECONCILE_ATTEMPTS: u32 = 3;

/// Picks the action that moves the observed aggregate toward the recorded
/// target, or `None` when converged (or no sensible move exists).
fn action_toward(target_status: &str, observed: &[VmStatus]) -> Option<VmAction> {
    let current = aggregate(observed).to_string();
    if current == target_status {
        return None;
    }

    match target_status {
        "Running" if observed.iter().any(|s| *s == VmStatus::Suspended) => Some(VmAction::Resume),
        "Suspended" if observed.iter().any(|s| *s == VmStatus::Running) => Some(VmAction::Suspend),
        "Terminated" if observed.iter().any(|s| !matches!(s, VmStatus::Terminated)) => {
            Some(VmAction::Terminate)
        }
        _ => None,
    }
}

/// Periodic sweeper reconciling MCIS records whose `targetStatus` drifted
/// from the observed state, re-issuing the matching action up to a bounded
/// attempt count. The interval comes from `AUTOCONTROL_DURATION_MS`.
pub fn spawn_autocontrol(ctx: Arc<CoreContext>) -> ScheduledTaskHandle {
    let period = ctx.runtime().autocontrol_period();
    let attempts: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));

    Scheduler::global().schedule(
        ScheduleSpec::Every {
            label: "autocontrol",
            period,
        },
        move |_job_ctx| {
            let ctx = Arc::clone(&ctx);
            let attempts = Arc::clone(&attempts);
            Box::pin(async move {
                sweep_once(&ctx, &attempts).await;
                JobResult::Continue
            })
        },
    )
}

pub(crate) async fn sweep_once(ctx: &Arc<CoreContext>, attempts: &Arc<Mutex<HashMap<String, u32>>>) {
    let namespaces = match namespace::list_ns_id(ctx) {
        Ok(namespaces) => namespaces,
        Err(err) => {
            log_warn(
                AUTOCONTROL_COMPONENT,
                "Sweep skipped; namespace listing failed",
                &[("cause", &err.to_string())],
            );
            metrics::record_autocontrol_sweep("error");
            return;
        }
    };

    for ns_id in namespaces {
        let mcis_ids = match list_mcis_id(ctx, &ns_id) {
            Ok(ids) => ids,
            Err(err) => {
                log_warn(
                    AUTOCONTROL_COMPONENT,
                    "Sweep skipped for namespace",
                    &[("namespace", &ns_id), ("cause", &err.to_string())],
                );
                continue;
            }
        };

        for mcis_id in mcis_ids {
            reconcile_one(ctx, attempts, &ns_id, &mcis_id).await;
        }
    }
}

async fn reconcile_one(
    ctx: &Arc<CoreContext>,
    attempts: &Arc<Mutex<HashMap<String, u32>>>,
    ns_id: &str,
    mcis_id: &str,
) {
    let record: McisInfo = match registry::load_at(ctx, &mcis_key(ns_id, mcis_id)) {
        Ok(Some(record)) => record,
        _ => return,
    };

    // "None" means no unmet intent is recorded.
    if record.target_status.is_empty() || record.target_status == "None" {
        return;
    }

    let vms = match list_vms(ctx, ns_id, mcis_id) {
        Ok(vms) => vms,
        Err(_) => return,
    };
    let statuses: Vec<VmStatus> = vms.iter().map(|vm| vm.status).collect();

    // Pending VMs settle on their own; intervening now would only collide
    // with the in-flight action.
    if statuses.iter().any(|status| status.is_pending()) {
        return;
    }

    let attempt_key = mcis_key(ns_id, mcis_id);
    let Some(action) = action_toward(&record.target_status, &statuses) else {
        if let Ok(mut map) = attempts.lock() {
            map.remove(&attempt_key);
        }
        metrics::record_autocontrol_sweep("converged");
        return;
    };

    let tries = {
        let mut map = match attempts.lock() {
            Ok(map) => map,
            Err(_) => return,
        };
        let entry = map.entry(attempt_key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };
    if tries > MAX_RECONCILE_ATTEMPTS {
        log_warn(
            AUTOCONTROL_COMPONENT,
            "Giving up on drifted MCIS after repeated attempts",
            &[
                ("namespace", ns_id),
                ("mcis", mcis_id),
                ("target", &record.target_status),
            ],
        );
        metrics::record_autocontrol_sweep("exhausted");
        return;
    }

    log_info(
        AUTOCONTROL_COMPONENT,
        "Reconciling drifted MCIS",
        &[
            ("namespace", ns_id),
            ("mcis", mcis_id),
            ("target", &record.target_status),
            ("action", action.as_str()),
            ("attempt", &tries.to_string()),
        ],
    );

    match control_mcis(ctx, ns_id, mcis_id, action).await {
        Ok(_) => metrics::record_autocontrol_sweep("applied"),
        Err(err) => {
            log_warn(
                AUTOCONTROL_COMPONENT,
                "Reconcile action failed",
                &[
                    ("namespace", ns_id),
                    ("mcis", mcis_id),
                    ("cause", &err.to_string()),
                ],
            );
            metrics::record_autocontrol_sweep("error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converged_targets_need_no_action() {
        assert_eq!(
            action_toward("Running", &[VmStatus::Running, VmStatus::Running]),
            None
        );
        assert_eq!(action_toward("Suspended", &[VmStatus::Suspended]), None);
    }

    #[test]
    fn drifted_targets_pick_the_matching_action() {
        assert_eq!(
            action_toward("Running", &[VmStatus::Suspended, VmStatus::Running]),
            Some(VmAction::Resume)
        );
        assert_eq!(
            action_toward("Suspended", &[VmStatus::Running]),
            Some(VmAction::Suspend)
        );
        assert_eq!(
            action_toward("Terminated", &[VmStatus::Running, VmStatus::Suspended]),
            Some(VmAction::Terminate)
        );
    }

    #[test]
    fn unreachable_targets_are_left_alone() {
        // Every VM failed; no control verb moves Failed toward Running.
        assert_eq!(action_toward("Running", &[VmStatus::Failed]), None);
    }
}
