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

use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::polycloud::common::concurrency::vm_lock_key;
use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::common::label;
use crate::polycloud::driver::{DriverFailure, DriverFailureKind};
use crate::polycloud::logger::{log_info, log_warn};
use crate::polycloud::mcis::provision::{
    self, get_mcis, get_vm, list_vms, persist_vm, refresh_stored_aggregate, remove_vm_associations,
    resolve_vm_refs,
};
use crate::polycloud::mcis::types::{
    map_driver_vm_status, mcis_key, vm_key, McisInfo, VmAction, VmInfo, VmReq, VmStatus,
};
use crate::polycloud::observability::metrics;
use crate::polycloud::resource::registry::{self, AssociationAction, ResourceKind};
use crate::polycloud::resource::datadisk::{
    get_datadisk, DISK_STATUS_ATTACHED, DISK_STATUS_AVAILABLE,
};

const MCIS_COMPONENT: &str = "mcis";
const MCIS_KIND: &str = "mcis";
const VM_KIND: &str = "vm";
const TARGET_NONE: &str = "None";

/// Per-VM outcome of a group control action.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmControlOutcome {
    pub vm_id: String,
    pub ok: bool,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McisControlResult {
    pub mcis_id: String,
    pub action: String,
    pub status: String,
    pub results: Vec<VmControlOutcome>,
}

/// The stable state an action converges to when it succeeds.
fn expected_status(action: VmAction) -> VmStatus {
    match action {
        VmAction::Suspend => VmStatus::Suspended,
        VmAction::Resume | VmAction::Reboot => VmStatus::Running,
        VmAction::Terminate => VmStatus::Terminated,
        VmAction::Refine | VmAction::Continue => VmStatus::Running,
    }
}

/// Pending state persisted while the driver call is in flight, when the
/// state machine models one for the action.
fn interim_status(action: VmAction) -> Option<VmStatus> {
    match action {
        VmAction::Reboot => Some(VmStatus::Rebooting),
        VmAction::Terminate => Some(VmStatus::Terminating),
        _ => None,
    }
}

/// Gates an action against the current VM state. Pending states reject every
/// action; the rest follow the machine:
/// `Running ↔ Suspended`, `Running|Suspended → Rebooting → Running`,
/// any non-terminated state `→ Terminating → Terminated`.
fn allowed_transition(current: VmStatus, action: VmAction) -> OpResult<()> {
    if current.is_pending() {
        return Err(OpError::Conflict(format!(
            "VM is {}; wait for the pending action to settle",
            current.as_str()
        )));
    }

    let allowed = match action {
        VmAction::Suspend => current == VmStatus::Running,
        VmAction::Resume => current == VmStatus::Suspended,
        VmAction::Reboot => matches!(current, VmStatus::Running | VmStatus::Suspended),
        VmAction::Terminate => current != VmStatus::Terminated,
        VmAction::Refine | VmAction::Continue => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(OpError::Conflict(format!(
            "action '{}' is not allowed while the VM is {}",
            action.as_str(),
            current.as_str()
        )))
    }
}

/// Applies a single control action to one VM. At most one action is in
/// flight per VM; a concurrent second action returns `Busy` immediately.
pub async fn control_vm(
    ctx: &CoreContext,
    ns_id: &str,
    mcis_id: &str,
    vm_id: &str,
    action: VmAction,
) -> OpResult<VmInfo> {
    let _guard = ctx
        .locks()
        .try_acquire(&vm_lock_key(ns_id, mcis_id, vm_id))?;

    let mut vm = get_vm(ctx, ns_id, mcis_id, vm_id)?;
    allowed_transition(vm.status, action)?;

    let previous_status = vm.status;
    vm.target_status = expected_status(action).as_str().to_string();
    vm.target_action = action.as_str().to_string();
    if let Some(pending) = interim_status(action) {
        vm.status = pending;
    }
    persist_vm(ctx, ns_id, mcis_id, &vm)?;

    let permit = ctx.limiter().acquire(&vm.connection_name).await;
    let permit = match permit {
        Ok(permit) => permit,
        Err(err) => {
            vm.status = previous_status;
            vm.target_status = TARGET_NONE.to_string();
            vm.target_action = TARGET_NONE.to_string();
            persist_vm(ctx, ns_id, mcis_id, &vm)?;
            return Err(err);
        }
    };

    let driver_result = match action {
        VmAction::Terminate => ctx
            .driver()
            .terminate_vm(&vm.connection_name, &driver_vm_name(&vm), false)
            .await
            .map(|_| String::new()),
        _ => ctx
            .driver()
            .control_vm(&vm.connection_name, &driver_vm_name(&vm), action.as_str())
            .await
            .map(|status| status.status),
    };
    drop(permit);

    match driver_result {
        Ok(reported) => {
            vm.status = if reported.is_empty() {
                expected_status(action)
            } else {
                map_driver_vm_status(&reported)
            };
            vm.target_status = TARGET_NONE.to_string();
            vm.target_action = TARGET_NONE.to_string();
            vm.system_message = String::new();
            persist_vm(ctx, ns_id, mcis_id, &vm)?;
            metrics::record_fanout_task("controlVm", "ok");
            Ok(vm)
        }
        Err(failure) => {
            // A failed transition is terminal for this VM; the group carries
            // on and the caller reads the failure from the record.
            vm.status = VmStatus::Failed;
            vm.target_status = TARGET_NONE.to_string();
            vm.target_action = TARGET_NONE.to_string();
            vm.system_message = failure.to_string();
            persist_vm(ctx, ns_id, mcis_id, &vm)?;
            metrics::record_fanout_task("controlVm", failure.kind.as_str());
            Err(OpError::Driver(failure))
        }
    }
}

fn driver_vm_name(vm: &VmInfo) -> String {
    if vm.csp_resource_name.is_empty() {
        vm.uuid.clone()
    } else {
        vm.csp_resource_name.clone()
    }
}

/// Applies a control action across every VM of an MCIS in parallel.
/// Per-VM failures (including `Busy` and `Conflict`) never abort siblings;
/// the result enumerates each VM's outcome.
pub async fn control_mcis(
    ctx: &Arc<CoreContext>,
    ns_id: &str,
    mcis_id: &str,
    action: VmAction,
) -> OpResult<McisControlResult> {
    if matches!(action, VmAction::Refine | VmAction::Continue) {
        return Err(OpError::Validation(format!(
            "action '{}' is handled by its dedicated operation",
            action.as_str()
        )));
    }

    let mut record: McisInfo = registry::load_at(ctx, &mcis_key(ns_id, mcis_id))?
        .ok_or_else(|| OpError::not_found(MCIS_KIND, mcis_id))?;
    record.target_status = expected_status(action).as_str().to_string();
    record.target_action = action.as_str().to_string();
    registry::persist(ctx, &mcis_key(ns_id, mcis_id), &record)?;

    let vms = list_vms(ctx, ns_id, mcis_id)?;
    let mut handles = Vec::with_capacity(vms.len());
    for vm in vms {
        let ctx = Arc::clone(ctx);
        let ns_id = ns_id.to_string();
        let mcis_id = mcis_id.to_string();
        handles.push(tokio::spawn(async move {
            let outcome = control_vm(&ctx, &ns_id, &mcis_id, &vm.id, action).await;
            match outcome {
                Ok(updated) => VmControlOutcome {
                    vm_id: vm.id,
                    ok: true,
                    message: updated.status.as_str().to_string(),
                },
                Err(err) => VmControlOutcome {
                    vm_id: vm.id,
                    ok: false,
                    message: err.to_string(),
                },
            }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for joined in join_all(handles).await {
        match joined {
            Ok(outcome) => results.push(outcome),
            Err(_) => log_warn(
                MCIS_COMPONENT,
                "Control task aborted unexpectedly",
                &[("namespace", ns_id), ("mcis", mcis_id)],
            ),
        }
    }

    let status = refresh_stored_aggregate(ctx, ns_id, mcis_id)?;

    log_info(
        MCIS_COMPONENT,
        "Applied control action",
        &[
            ("namespace", ns_id),
            ("mcis", mcis_id),
            ("action", action.as_str()),
            ("status", &status),
        ],
    );

    Ok(McisControlResult {
        mcis_id: mcis_id.to_string(),
        action: action.as_str().to_string(),
        status,
        results,
    })
}

/// Polls every VM's state through the driver and persists what was observed,
/// then returns the MCIS with a fresh aggregate. Read-only with respect to
/// the CSP; repeated polls against an unchanged CSP converge to the same
/// stored state.
pub async fn refresh_mcis_status(
    ctx: &Arc<CoreContext>,
    ns_id: &str,
    mcis_id: &str,
) -> OpResult<McisInfo> {
    let vms = list_vms(ctx, ns_id, mcis_id)?;

    let mut handles = Vec::with_capacity(vms.len());
    for vm in vms {
        // VMs that never reached the driver have nothing to poll.
        if vm.csp_resource_id.is_empty() {
            continue;
        }
        let ctx = Arc::clone(ctx);
        let ns_id = ns_id.to_string();
        let mcis_id = mcis_id.to_string();
        handles.push(tokio::spawn(async move {
            poll_single_vm(&ctx, &ns_id, &mcis_id, vm).await;
        }));
    }
    let _ = join_all(handles).await;

    refresh_stored_aggregate(ctx, ns_id, mcis_id)?;
    get_mcis(ctx, ns_id, mcis_id)
}

async fn poll_single_vm(ctx: &CoreContext, ns_id: &str, mcis_id: &str, mut vm: VmInfo) {
    let permit = match ctx.limiter().acquire(&vm.connection_name).await {
        Ok(permit) => permit,
        Err(err) => {
            log_warn(
                MCIS_COMPONENT,
                "Skipping status poll; connection saturated",
                &[("vm", &vm.id), ("cause", &err.to_string())],
            );
            return;
        }
    };

    let polled = ctx
        .driver()
        .vm_status(&vm.connection_name, &driver_vm_name(&vm))
        .await;
    drop(permit);

    let observed = match polled {
        Ok(info) if !info.status.is_empty() => map_driver_vm_status(&info.status),
        Ok(_) => vm.status,
        Err(DriverFailure {
            kind: DriverFailureKind::NotFound,
            ..
        }) => VmStatus::Terminated,
        Err(failure) => {
            log_warn(
                MCIS_COMPONENT,
                "Status poll failed; keeping last observed state",
                &[("vm", &vm.id), ("cause", &failure.to_string())],
            );
            return;
        }
    };

    if observed != vm.status {
        vm.status = observed;
        if let Err(err) = persist_vm(ctx, ns_id, mcis_id, &vm) {
            log_warn(
                MCIS_COMPONENT,
                "Failed to persist polled VM state",
                &[("vm", &vm.id), ("cause", &err.to_string())],
            );
        }
    }
}

/// Drops the records of VMs that ended `Failed` or `Terminated`, releasing
/// their associations. No driver calls are made.
pub fn refine_mcis(ctx: &CoreContext, ns_id: &str, mcis_id: &str) -> OpResult<McisInfo> {
    let vms = list_vms(ctx, ns_id, mcis_id)?;
    for vm in vms {
        if !matches!(vm.status, VmStatus::Failed | VmStatus::Terminated) {
            continue;
        }
        remove_vm_associations(ctx, ns_id, &vm, mcis_id);
        ctx.keyspace()
            .delete(&vm_key(ns_id, mcis_id, &vm.id))
            .map_err(OpError::internal)?;
        label::remove_label(ctx, VM_KIND, &vm.uuid)?;
        log_info(
            MCIS_COMPONENT,
            "Refined away dead VM",
            &[("namespace", ns_id), ("mcis", mcis_id), ("vm", &vm.id)],
        );
    }

    refresh_stored_aggregate(ctx, ns_id, mcis_id)?;
    get_mcis(ctx, ns_id, mcis_id)
}

/// Resumes provisioning for an MCIS created with `hold`: every VM record
/// still waiting (no CSP identity yet) is pushed through the normal fan-out.
pub async fn continue_mcis(
    ctx: &Arc<CoreContext>,
    ns_id: &str,
    mcis_id: &str,
    token: CancellationToken,
) -> OpResult<McisInfo> {
    let vms = list_vms(ctx, ns_id, mcis_id)?;
    let mut planned = Vec::new();
    for vm in vms {
        if vm.status != VmStatus::Creating || !vm.csp_resource_id.is_empty() {
            continue;
        }
        let req = VmReq {
            name: vm.name.clone(),
            sub_group_size: 1,
            connection_name: vm.connection_name.clone(),
            spec_id: vm.spec_id.clone(),
            image_id: vm.image_id.clone(),
            v_net_id: vm.v_net_id.clone(),
            subnet_id: vm.subnet_id.clone(),
            security_group_ids: vm.security_group_ids.clone(),
            ssh_key_id: vm.ssh_key_id.clone(),
            data_disk_ids: vm.data_disk_ids.clone(),
            description: vm.description.clone(),
            root_disk_type: vm.root_disk_type.clone(),
            root_disk_size: vm.root_disk_size.clone(),
            vm_user_account: vm.vm_user_account.clone(),
        };
        let refs = resolve_vm_refs(ctx, ns_id, &req)?;
        planned.push((vm, refs));
    }

    if planned.is_empty() {
        return get_mcis(ctx, ns_id, mcis_id);
    }

    let mut record: McisInfo = registry::load_at(ctx, &mcis_key(ns_id, mcis_id))?
        .ok_or_else(|| OpError::not_found(MCIS_KIND, mcis_id))?;
    record.target_action = "Create".to_string();
    registry::persist(ctx, &mcis_key(ns_id, mcis_id), &record)?;

    provision::run_provisioning(ctx, ns_id, mcis_id, planned, token).await?;
    get_mcis(ctx, ns_id, mcis_id)
}

/// Dispatches a control verb (`suspend|resume|reboot|terminate|refine|continue`)
/// or a plain `status` poll against an MCIS.
pub async fn handle_mcis_action(
    ctx: &Arc<CoreContext>,
    ns_id: &str,
    mcis_id: &str,
    verb: &str,
    token: CancellationToken,
) -> OpResult<McisInfo> {
    if verb == "status" {
        return refresh_mcis_status(ctx, ns_id, mcis_id).await;
    }

    let action = VmAction::parse(verb)
        .ok_or_else(|| OpError::Validation(format!("unknown action '{}'", verb)))?;

    match action {
        VmAction::Refine => refine_mcis(ctx, ns_id, mcis_id),
        VmAction::Continue => continue_mcis(ctx, ns_id, mcis_id, token).await,
        _ => {
            control_mcis(ctx, ns_id, mcis_id, action).await?;
            get_mcis(ctx, ns_id, mcis_id)
        }
    }
}

/// Deletes an MCIS and all its VMs. VMs still alive on the CSP are
/// terminated through the driver first; termination failures are logged and
/// the teardown continues, leaving any stragglers for operator cleanup.
pub async fn delete_mcis(ctx: &Arc<CoreContext>, ns_id: &str, mcis_id: &str) -> OpResult<()> {
    let record: McisInfo = registry::load_at(ctx, &mcis_key(ns_id, mcis_id))?
        .ok_or_else(|| OpError::not_found(MCIS_KIND, mcis_id))?;

    for vm in list_vms(ctx, ns_id, mcis_id)? {
        if !matches!(vm.status, VmStatus::Terminated | VmStatus::Failed)
            && !vm.csp_resource_id.is_empty()
        {
            if let Err(failure) = ctx
                .driver()
                .terminate_vm(&vm.connection_name, &driver_vm_name(&vm), true)
                .await
            {
                log_warn(
                    MCIS_COMPONENT,
                    "VM termination failed during MCIS delete",
                    &[("vm", &vm.id), ("cause", &failure.to_string())],
                );
            }
        }

        remove_vm_associations(ctx, ns_id, &vm, mcis_id);
        ctx.keyspace()
            .delete(&vm_key(ns_id, mcis_id, &vm.id))
            .map_err(OpError::internal)?;
        label::remove_label(ctx, VM_KIND, &vm.uuid)?;
    }

    ctx.keyspace()
        .delete(&mcis_key(ns_id, mcis_id))
        .map_err(OpError::internal)?;
    label::remove_label(ctx, MCIS_KIND, &record.uuid)?;

    log_info(
        MCIS_COMPONENT,
        "Deleted MCIS",
        &[("namespace", ns_id), ("mcis", mcis_id)],
    );
    Ok(())
}

/// Deletes one VM from an MCIS, terminating it on the CSP when still alive.
pub async fn delete_vm(
    ctx: &CoreContext,
    ns_id: &str,
    mcis_id: &str,
    vm_id: &str,
) -> OpResult<()> {
    let _guard = ctx
        .locks()
        .try_acquire(&vm_lock_key(ns_id, mcis_id, vm_id))?;

    let vm = get_vm(ctx, ns_id, mcis_id, vm_id)?;
    if !matches!(vm.status, VmStatus::Terminated | VmStatus::Failed)
        && !vm.csp_resource_id.is_empty()
    {
        ctx.driver()
            .terminate_vm(&vm.connection_name, &driver_vm_name(&vm), true)
            .await?;
    }

    remove_vm_associations(ctx, ns_id, &vm, mcis_id);
    ctx.keyspace()
        .delete(&vm_key(ns_id, mcis_id, vm_id))
        .map_err(OpError::internal)?;
    label::remove_label(ctx, VM_KIND, &vm.uuid)?;
    Ok(())
}

/// Attaches an available data disk to a VM.
pub async fn attach_data_disk(
    ctx: &CoreContext,
    ns_id: &str,
    mcis_id: &str,
    vm_id: &str,
    disk_id: &str,
) -> OpResult<VmInfo> {
    let _guard = ctx
        .locks()
        .try_acquire(&vm_lock_key(ns_id, mcis_id, vm_id))?;

    let mut vm = get_vm(ctx, ns_id, mcis_id, vm_id)?;
    let disk = get_datadisk(ctx, ns_id, disk_id)?;

    if disk.connection_name != vm.connection_name {
        return Err(OpError::Validation(format!(
            "dataDisk '{}' belongs to connection '{}', but the VM uses '{}'",
            disk_id, disk.connection_name, vm.connection_name
        )));
    }
    if vm.data_disk_ids.iter().any(|existing| existing == disk_id) {
        return Err(OpError::Conflict(format!(
            "dataDisk '{}' is already attached to VM '{}'",
            disk_id, vm_id
        )));
    }
    if disk.status == DISK_STATUS_ATTACHED {
        return Err(OpError::Conflict(format!(
            "dataDisk '{}' is already attached elsewhere",
            disk_id
        )));
    }

    let disk_driver_name = if disk.csp_resource_name.is_empty() {
        disk.uuid.clone()
    } else {
        disk.csp_resource_name.clone()
    };
    ctx.driver()
        .attach_disk(&vm.connection_name, &disk_driver_name, &driver_vm_name(&vm))
        .await?;

    let disk_key = crate::polycloud::resource::registry::resource_key(
        ns_id,
        ResourceKind::DataDisk,
        disk_id,
    );
    registry::update_associations_at(
        ctx,
        &disk_key,
        AssociationAction::Add,
        &vm_key(ns_id, mcis_id, vm_id),
    )?;

    let mut updated_disk = disk;
    updated_disk.status = DISK_STATUS_ATTACHED.to_string();
    updated_disk.associated_object_list =
        registry::get_associated_object_list(ctx, ns_id, ResourceKind::DataDisk, disk_id)?;
    registry::persist(ctx, &disk_key, &updated_disk)?;

    vm.data_disk_ids.push(disk_id.to_string());
    persist_vm(ctx, ns_id, mcis_id, &vm)?;
    Ok(vm)
}

/// Detaches a data disk from a VM.
pub async fn detach_data_disk(
    ctx: &CoreContext,
    ns_id: &str,
    mcis_id: &str,
    vm_id: &str,
    disk_id: &str,
) -> OpResult<VmInfo> {
    let _guard = ctx
        .locks()
        .try_acquire(&vm_lock_key(ns_id, mcis_id, vm_id))?;

    let mut vm = get_vm(ctx, ns_id, mcis_id, vm_id)?;
    if !vm.data_disk_ids.iter().any(|existing| existing == disk_id) {
        return Err(OpError::Conflict(format!(
            "dataDisk '{}' is not attached to VM '{}'",
            disk_id, vm_id
        )));
    }

    let disk = get_datadisk(ctx, ns_id, disk_id)?;
    let disk_driver_name = if disk.csp_resource_name.is_empty() {
        disk.uuid.clone()
    } else {
        disk.csp_resource_name.clone()
    };
    ctx.driver()
        .detach_disk(&vm.connection_name, &disk_driver_name, &driver_vm_name(&vm))
        .await?;

    let disk_key = crate::polycloud::resource::registry::resource_key(
        ns_id,
        ResourceKind::DataDisk,
        disk_id,
    );
    registry::update_associations_at(
        ctx,
        &disk_key,
        AssociationAction::Remove,
        &vm_key(ns_id, mcis_id, vm_id),
    )?;

    let mut updated_disk = disk;
    updated_disk.status = DISK_STATUS_AVAILABLE.to_string();
    updated_disk.associated_object_list =
        registry::get_associated_object_list(ctx, ns_id, ResourceKind::DataDisk, disk_id)?;
    registry::persist(ctx, &disk_key, &updated_disk)?;

    vm.data_disk_ids.retain(|existing| existing != disk_id);
    persist_vm(ctx, ns_id, mcis_id, &vm)?;
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_gates_follow_the_diagram() {
        assert!(allowed_transition(VmStatus::Running, VmAction::Suspend).is_ok());
        assert!(allowed_transition(VmStatus::Suspended, VmAction::Resume).is_ok());
        assert!(allowed_transition(VmStatus::Running, VmAction::Reboot).is_ok());
        assert!(allowed_transition(VmStatus::Suspended, VmAction::Reboot).is_ok());
        assert!(allowed_transition(VmStatus::Failed, VmAction::Terminate).is_ok());

        assert!(allowed_transition(VmStatus::Suspended, VmAction::Suspend).is_err());
        assert!(allowed_transition(VmStatus::Running, VmAction::Resume).is_err());
        assert!(allowed_transition(VmStatus::Terminated, VmAction::Terminate).is_err());
        assert!(allowed_transition(VmStatus::Creating, VmAction::Suspend).is_err());
        assert!(allowed_transition(VmStatus::Rebooting, VmAction::Terminate).is_err());
    }

    #[test]
    fn actions_converge_to_expected_states() {
        assert_eq!(expected_status(VmAction::Suspend), VmStatus::Suspended);
        assert_eq!(expected_status(VmAction::Resume), VmStatus::Running);
        assert_eq!(expected_status(VmAction::Reboot), VmStatus::Running);
        assert_eq!(expected_status(VmAction::Terminate), VmStatus::Terminated);
    }

    #[test]
    fn only_reboot_and_terminate_have_interim_states() {
        assert_eq!(interim_status(VmAction::Reboot), Some(VmStatus::Rebooting));
        assert_eq!(
            interim_status(VmAction::Terminate),
            Some(VmStatus::Terminating)
        );
        assert_eq!(interim_status(VmAction::Suspend), None);
        assert_eq!(interim_status(VmAction::Resume), None);
    }
}
