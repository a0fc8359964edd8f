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

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::polycloud::common::concurrency::{resource_lock_key, vm_lock_key};
use crate::polycloud::common::context::CoreContext;
use crate::polycloud::common::error::{OpError, OpResult};
use crate::polycloud::common::validation::check_name;
use crate::polycloud::common::{gen_uid, label, namespace};
use crate::polycloud::driver::types::VmReqInfo;
use crate::polycloud::logger::{log_error, log_info, log_warn};
use crate::polycloud::mcis::status::aggregate;
use crate::polycloud::mcis::types::{
    map_driver_vm_status, mcis_key, mcis_prefix, vm_key, McisInfo, McisReq, RegionZone, VmInfo,
    VmReq, VmStatus,
};
use crate::polycloud::observability::metrics;
use crate::polycloud::resource::registry::{
    self, resource_key, subnet_key, AssociationAction, ResourceKind,
};
use crate::polycloud::resource::{datadisk, image, securitygroup, spec, sshkey, vnet};
use crate::polycloud::util::get_child_list;

const MCIS_COMPONENT: &str = "mcis";
const MCIS_KIND: &str = "mcis";
const VM_KIND: &str = "vm";
const TARGET_NONE: &str = "None";
const TARGET_RUNNING: &str = "Running";
const ACTION_CREATE: &str = "Create";
const ACTION_HOLD: &str = "Hold";
const AGENT_INSTALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver-facing names for every MCIR a VM request references, resolved
/// before anything is persisted so a dangling reference fails the whole
/// request up front.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedVmRefs {
    pub vpc_name: String,
    pub subnet_name: String,
    pub security_group_names: Vec<String>,
    pub key_pair_name: String,
    pub image_name: String,
    pub spec_name: String,
    pub data_disk_names: Vec<String>,
}

fn driver_name(csp_resource_name: &str, uuid: &str) -> String {
    if csp_resource_name.is_empty() {
        uuid.to_string()
    } else {
        csp_resource_name.to_string()
    }
}

fn check_connection(
    what: &'static str,
    id: &str,
    resource_connection: &str,
    vm_connection: &str,
) -> OpResult<()> {
    if resource_connection != vm_connection {
        return Err(OpError::Validation(format!(
            "{} '{}' belongs to connection '{}', but the VM targets '{}'",
            what, id, resource_connection, vm_connection
        )));
    }
    Ok(())
}

pub(crate) fn resolve_vm_refs(
    ctx: &CoreContext,
    ns_id: &str,
    req: &VmReq,
) -> OpResult<ResolvedVmRefs> {
    let vnet = vnet::get_vnet(ctx, ns_id, &req.v_net_id)?;
    check_connection("vNet", &req.v_net_id, &vnet.connection_name, &req.connection_name)?;

    let subnet = vnet::get_subnet(ctx, ns_id, &req.v_net_id, &req.subnet_id)?;

    let mut security_group_names = Vec::with_capacity(req.security_group_ids.len());
    for sg_id in &req.security_group_ids {
        let sg = securitygroup::get_security_group(ctx, ns_id, sg_id)?;
        check_connection("securityGroup", sg_id, &sg.connection_name, &req.connection_name)?;
        security_group_names.push(driver_name(&sg.csp_resource_name, &sg.uuid));
    }

    let key = sshkey::get_sshkey(ctx, ns_id, &req.ssh_key_id)?;
    check_connection("sshKey", &req.ssh_key_id, &key.connection_name, &req.connection_name)?;

    let image = image::get_image(ctx, ns_id, &req.image_id)?;
    check_connection("image", &req.image_id, &image.connection_name, &req.connection_name)?;

    let machine_spec = spec::get_spec(ctx, ns_id, &req.spec_id)?;
    check_connection("spec", &req.spec_id, &machine_spec.connection_name, &req.connection_name)?;

    let mut data_disk_names = Vec::with_capacity(req.data_disk_ids.len());
    for disk_id in &req.data_disk_ids {
        let disk = datadisk::get_datadisk(ctx, ns_id, disk_id)?;
        check_connection("dataDisk", disk_id, &disk.connection_name, &req.connection_name)?;
        data_disk_names.push(driver_name(&disk.csp_resource_name, &disk.uuid));
    }

    Ok(ResolvedVmRefs {
        vpc_name: driver_name(&vnet.csp_resource_name, &vnet.uuid),
        subnet_name: driver_name(&subnet.csp_resource_name, &subnet.uuid),
        security_group_names,
        key_pair_name: driver_name(&key.csp_resource_name, &key.uuid),
        image_name: if image.csp_resource_name.is_empty() {
            image.csp_resource_id.clone()
        } else {
            image.csp_resource_name.clone()
        },
        spec_name: machine_spec.csp_spec_name.clone(),
        data_disk_names,
    })
}

fn vm_reference_keys(ns_id: &str, vm: &VmInfo) -> Vec<String> {
    let mut keys = vec![
        resource_key(ns_id, ResourceKind::VNet, &vm.v_net_id),
        subnet_key(ns_id, &vm.v_net_id, &vm.subnet_id),
        resource_key(ns_id, ResourceKind::SshKey, &vm.ssh_key_id),
    ];
    for sg_id in &vm.security_group_ids {
        keys.push(resource_key(ns_id, ResourceKind::SecurityGroup, sg_id));
    }
    for disk_id in &vm.data_disk_ids {
        keys.push(resource_key(ns_id, ResourceKind::DataDisk, disk_id));
    }
    keys
}

pub(crate) fn add_vm_associations(ctx: &CoreContext, ns_id: &str, vm: &VmInfo, mcis_id: &str) {
    let own_key = vm_key(ns_id, mcis_id, &vm.id);
    for reference in vm_reference_keys(ns_id, vm) {
        if let Err(err) =
            registry::update_associations_at(ctx, &reference, AssociationAction::Add, &own_key)
        {
            log_warn(
                MCIS_COMPONENT,
                "Failed to record association",
                &[("reference", &reference), ("cause", &err.to_string())],
            );
        }
    }
}

pub(crate) fn remove_vm_associations(ctx: &CoreContext, ns_id: &str, vm: &VmInfo, mcis_id: &str) {
    let own_key = vm_key(ns_id, mcis_id, &vm.id);
    for reference in vm_reference_keys(ns_id, vm) {
        match registry::update_associations_at(ctx, &reference, AssociationAction::Remove, &own_key)
        {
            Ok(_) | Err(OpError::NotFound { .. }) => {}
            Err(err) => log_warn(
                MCIS_COMPONENT,
                "Failed to release association",
                &[("reference", &reference), ("cause", &err.to_string())],
            ),
        }
    }
}

pub(crate) fn persist_vm(ctx: &CoreContext, ns_id: &str, mcis_id: &str, vm: &VmInfo) -> OpResult<()> {
    registry::persist(ctx, &vm_key(ns_id, mcis_id, &vm.id), vm)
}

pub fn get_vm(ctx: &CoreContext, ns_id: &str, mcis_id: &str, vm_id: &str) -> OpResult<VmInfo> {
    registry::load_at(ctx, &vm_key(ns_id, mcis_id, vm_id))?
        .ok_or_else(|| OpError::not_found(VM_KIND, vm_id))
}

pub fn list_vms(ctx: &CoreContext, ns_id: &str, mcis_id: &str) -> OpResult<Vec<VmInfo>> {
    let prefix = format!("{}/vm", mcis_key(ns_id, mcis_id));
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;

    let mut vms = Vec::new();
    for entry in get_child_list(&entries, &prefix) {
        let vm: VmInfo = serde_json::from_str(&entry.value).map_err(OpError::internal)?;
        vms.push(vm);
    }
    Ok(vms)
}

/// Recomputes the aggregate over stored VM states and writes it back onto
/// the MCIS record. Returns the fresh aggregate label.
pub(crate) fn refresh_stored_aggregate(
    ctx: &CoreContext,
    ns_id: &str,
    mcis_id: &str,
) -> OpResult<String> {
    let vms = list_vms(ctx, ns_id, mcis_id)?;
    let statuses: Vec<VmStatus> = vms.iter().map(|vm| vm.status).collect();
    let label = aggregate(&statuses).to_string();

    let mut record: McisInfo = registry::load_at(ctx, &mcis_key(ns_id, mcis_id))?
        .ok_or_else(|| OpError::not_found(MCIS_KIND, mcis_id))?;
    record.status = label.clone();
    if !statuses.iter().any(|status| status.is_pending()) {
        record.target_status = TARGET_NONE.to_string();
        record.target_action = TARGET_NONE.to_string();
    }
    registry::persist(ctx, &mcis_key(ns_id, mcis_id), &record)?;

    Ok(label)
}

/// Loads an MCIS with its VM children assembled and its aggregate status
/// recomputed from the stored VM states.
pub fn get_mcis(ctx: &CoreContext, ns_id: &str, mcis_id: &str) -> OpResult<McisInfo> {
    let mut record: McisInfo = registry::load_at(ctx, &mcis_key(ns_id, mcis_id))?
        .ok_or_else(|| OpError::not_found(MCIS_KIND, mcis_id))?;
    let vms = list_vms(ctx, ns_id, mcis_id)?;
    let statuses: Vec<VmStatus> = vms.iter().map(|vm| vm.status).collect();
    record.status = aggregate(&statuses).to_string();
    record.vm = vms;
    Ok(record)
}

pub fn list_mcis(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<McisInfo>> {
    let prefix = mcis_prefix(ns_id);
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;

    let mut result = Vec::new();
    for entry in get_child_list(&entries, &prefix) {
        let record: McisInfo = serde_json::from_str(&entry.value).map_err(OpError::internal)?;
        result.push(get_mcis(ctx, ns_id, &record.id)?);
    }
    Ok(result)
}

pub fn list_mcis_id(ctx: &CoreContext, ns_id: &str) -> OpResult<Vec<String>> {
    let prefix = mcis_prefix(ns_id);
    let entries = ctx
        .keyspace()
        .get_list(&prefix, true)
        .map_err(OpError::internal)?;
    Ok(get_child_list(&entries, &prefix)
        .into_iter()
        .filter_map(|entry| entry.key.rsplit('/').next().map(str::to_string))
        .collect())
}

fn expand_vm_requests(req: &McisReq) -> OpResult<Vec<(VmReq, String, String)>> {
    let mut expanded = Vec::new();
    let mut seen = HashSet::new();

    for vm_req in &req.vm {
        check_name(&vm_req.name)?;
        if vm_req.sub_group_size == 0 {
            return Err(OpError::Validation(format!(
                "subGroupSize for '{}' must be at least 1",
                vm_req.name
            )));
        }

        if vm_req.sub_group_size == 1 {
            if !seen.insert(vm_req.name.clone()) {
                return Err(OpError::Validation(format!(
                    "duplicate VM name '{}' in request",
                    vm_req.name
                )));
            }
            expanded.push((vm_req.clone(), vm_req.name.clone(), String::new()));
        } else {
            for idx in 1..=vm_req.sub_group_size {
                let vm_id = format!("{}-{}", vm_req.name, idx);
                if !seen.insert(vm_id.clone()) {
                    return Err(OpError::Validation(format!(
                        "duplicate VM name '{}' in request",
                        vm_id
                    )));
                }
                expanded.push((vm_req.clone(), vm_id, vm_req.name.clone()));
            }
        }
    }

    Ok(expanded)
}

/// Creates an MCIS: persists the group and VM records, then provisions every
/// VM in parallel through the per-connection limiter. Sibling failures never
/// abort the fan-out and nothing is rolled back; the caller reads the
/// per-VM outcome from the returned record.
pub async fn create_mcis(
    ctx: &Arc<CoreContext>,
    ns_id: &str,
    req: &McisReq,
    token: CancellationToken,
) -> OpResult<McisInfo> {
    check_name(&req.name)?;
    if !namespace::check_ns(ctx, ns_id)? {
        return Err(OpError::not_found("namespace", ns_id));
    }
    if req.vm.is_empty() {
        return Err(OpError::Validation(
            "an MCIS requires at least one VM request".to_string(),
        ));
    }
    let _guard = ctx
        .locks()
        .try_acquire(&resource_lock_key(ns_id, MCIS_KIND, &req.name))?;
    if ctx
        .keyspace()
        .exists(&mcis_key(ns_id, &req.name))
        .map_err(OpError::internal)?
    {
        return Err(OpError::already_exists(MCIS_KIND, &req.name));
    }

    // Resolve every reference before persisting anything: a dangling id
    // fails the whole request without side effects.
    let expanded = expand_vm_requests(req)?;
    let mut planned: Vec<(VmInfo, ResolvedVmRefs)> = Vec::with_capacity(expanded.len());
    for (vm_req, vm_id, sub_group_id) in &expanded {
        let refs = resolve_vm_refs(ctx, ns_id, vm_req)?;
        let vm = VmInfo {
            id: vm_id.clone(),
            name: vm_id.clone(),
            uuid: gen_uid(),
            sub_group_id: sub_group_id.clone(),
            connection_name: vm_req.connection_name.clone(),
            spec_id: vm_req.spec_id.clone(),
            image_id: vm_req.image_id.clone(),
            v_net_id: vm_req.v_net_id.clone(),
            subnet_id: vm_req.subnet_id.clone(),
            security_group_ids: vm_req.security_group_ids.clone(),
            ssh_key_id: vm_req.ssh_key_id.clone(),
            data_disk_ids: vm_req.data_disk_ids.clone(),
            description: vm_req.description.clone(),
            status: VmStatus::Creating,
            target_status: TARGET_RUNNING.to_string(),
            target_action: ACTION_CREATE.to_string(),
            vm_user_account: vm_req.vm_user_account.clone(),
            root_disk_type: vm_req.root_disk_type.clone(),
            root_disk_size: vm_req.root_disk_size.clone(),
            created_time: Some(Utc::now()),
            ..Default::default()
        };
        planned.push((vm, refs));
    }

    let mcis_uuid = gen_uid();
    let record = McisInfo {
        id: req.name.clone(),
        name: req.name.clone(),
        uuid: mcis_uuid.clone(),
        description: req.description.clone(),
        status: aggregate(&[VmStatus::Creating]).to_string(),
        target_status: TARGET_RUNNING.to_string(),
        target_action: if req.hold { ACTION_HOLD } else { ACTION_CREATE }.to_string(),
        install_mon_agent: req.install_mon_agent,
        label: req.label.clone(),
        system_label: req.system_label.clone(),
        vm: Vec::new(),
    };
    registry::persist(ctx, &mcis_key(ns_id, &record.id), &record)?;
    label::upsert_label_best_effort(
        ctx,
        MCIS_KIND,
        &mcis_uuid,
        &mcis_key(ns_id, &record.id),
        req.label.clone(),
        [
            ("provider".to_string(), "polycloud".to_string()),
            ("namespace".to_string(), ns_id.to_string()),
        ]
        .into(),
    );

    for (vm, _) in &planned {
        persist_vm(ctx, ns_id, &record.id, vm)?;
        add_vm_associations(ctx, ns_id, vm, &record.id);
        label::upsert_label_best_effort(
            ctx,
            VM_KIND,
            &vm.uuid,
            &vm_key(ns_id, &record.id, &vm.id),
            Default::default(),
            [
                ("provider".to_string(), "polycloud".to_string()),
                ("namespace".to_string(), ns_id.to_string()),
            ]
            .into(),
        );
    }

    log_info(
        MCIS_COMPONENT,
        "Registered MCIS",
        &[
            ("namespace", ns_id),
            ("mcis", &record.id),
            ("vms", &planned.len().to_string()),
        ],
    );

    if req.hold {
        return get_mcis(ctx, ns_id, &record.id);
    }

    run_provisioning(ctx, ns_id, &record.id, planned, token.clone()).await?;

    if req.install_mon_agent && !token.is_cancelled() {
        dispatch_agent_install(ctx, ns_id, &record.id).await;
    }

    get_mcis(ctx, ns_id, &record.id)
}

/// Provisions the given VM records in parallel and waits for all of them.
/// The parent completes only after every child resolves, success or fail.
pub(crate) async fn run_provisioning(
    ctx: &Arc<CoreContext>,
    ns_id: &str,
    mcis_id: &str,
    planned: Vec<(VmInfo, ResolvedVmRefs)>,
    token: CancellationToken,
) -> OpResult<()> {
    let mut handles = Vec::with_capacity(planned.len());
    for (vm, refs) in planned {
        let ctx = Arc::clone(ctx);
        let ns_id = ns_id.to_string();
        let mcis_id = mcis_id.to_string();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            provision_single_vm(&ctx, &ns_id, &mcis_id, vm, refs, token).await;
        }));
    }

    for joined in join_all(handles).await {
        if joined.is_err() {
            log_error(
                MCIS_COMPONENT,
                "Provisioning task aborted unexpectedly",
                &[("namespace", ns_id), ("mcis", mcis_id)],
            );
        }
    }

    refresh_stored_aggregate(ctx, ns_id, mcis_id)?;
    Ok(())
}

async fn provision_single_vm(
    ctx: &CoreContext,
    ns_id: &str,
    mcis_id: &str,
    mut vm: VmInfo,
    refs: ResolvedVmRefs,
    token: CancellationToken,
) {
    let lock_key = vm_lock_key(ns_id, mcis_id, &vm.id);
    let _guard = match ctx.locks().try_acquire(&lock_key) {
        Ok(guard) => guard,
        Err(err) => {
            mark_vm_failed(ctx, ns_id, mcis_id, &mut vm, &err.to_string());
            metrics::record_fanout_task("createMcis", "busy");
            return;
        }
    };

    if token.is_cancelled() {
        mark_vm_failed(ctx, ns_id, mcis_id, &mut vm, "canceled before driver submission");
        metrics::record_fanout_task("createMcis", "cancelled");
        return;
    }

    let permit = match ctx.limiter().acquire(&vm.connection_name).await {
        Ok(permit) => permit,
        Err(err) => {
            mark_vm_failed(ctx, ns_id, mcis_id, &mut vm, &err.to_string());
            metrics::record_fanout_task("createMcis", "busy");
            return;
        }
    };

    // A cancellation that lands while we waited for a slot must not reach
    // the driver; results of calls already issued elsewhere are discarded
    // by their own tasks.
    if token.is_cancelled() {
        drop(permit);
        mark_vm_failed(ctx, ns_id, mcis_id, &mut vm, "canceled before driver submission");
        metrics::record_fanout_task("createMcis", "cancelled");
        return;
    }

    let driver_req = VmReqInfo {
        name: vm.uuid.clone(),
        image_name: refs.image_name.clone(),
        vpc_name: refs.vpc_name.clone(),
        subnet_name: refs.subnet_name.clone(),
        security_group_names: refs.security_group_names.clone(),
        key_pair_name: refs.key_pair_name.clone(),
        vm_spec_name: refs.spec_name.clone(),
        data_disk_names: refs.data_disk_names.clone(),
        root_disk_type: vm.root_disk_type.clone(),
        root_disk_size: vm.root_disk_size.clone(),
        vm_user_id: vm.vm_user_account.clone(),
    };

    let outcome = ctx.driver().start_vm(&vm.connection_name, driver_req).await;
    drop(permit);

    match outcome {
        Ok(info) => {
            vm.csp_resource_id = info.iid.system_id.clone();
            vm.csp_resource_name = info.iid.name_id.clone();
            vm.public_ip = info.public_ip.clone();
            vm.private_ip = info.private_ip.clone();
            vm.ssh_port = parse_ssh_port(&info.ssh_access_point);
            vm.region = RegionZone {
                region: info.region.region.clone(),
                zone: info.region.zone.clone(),
            };
            vm.status = if info.vm_status.is_empty() {
                VmStatus::Running
            } else {
                map_driver_vm_status(&info.vm_status)
            };
            vm.target_status = TARGET_NONE.to_string();
            vm.target_action = TARGET_NONE.to_string();
            vm.system_message = String::new();

            if let Err(err) = persist_vm(ctx, ns_id, mcis_id, &vm) {
                // The CSP object exists but the record write failed: surface
                // loudly, the resource is now orphaned until operator action.
                log_error(
                    MCIS_COMPONENT,
                    "VM provisioned but record write failed; CSP resource is orphaned",
                    &[
                        ("namespace", ns_id),
                        ("mcis", mcis_id),
                        ("vm", &vm.id),
                        ("cspResourceId", &vm.csp_resource_id),
                        ("cause", &err.to_string()),
                    ],
                );
            }
            metrics::record_fanout_task("createMcis", "ok");
        }
        Err(failure) => {
            mark_vm_failed(ctx, ns_id, mcis_id, &mut vm, &failure.to_string());
            metrics::record_fanout_task("createMcis", failure.kind.as_str());
        }
    }
}

fn mark_vm_failed(ctx: &CoreContext, ns_id: &str, mcis_id: &str, vm: &mut VmInfo, cause: &str) {
    vm.status = VmStatus::Failed;
    vm.target_status = TARGET_NONE.to_string();
    vm.target_action = TARGET_NONE.to_string();
    vm.system_message = cause.to_string();
    if let Err(err) = persist_vm(ctx, ns_id, mcis_id, vm) {
        log_error(
            MCIS_COMPONENT,
            "Failed to record VM failure",
            &[
                ("namespace", ns_id),
                ("mcis", mcis_id),
                ("vm", &vm.id),
                ("cause", &err.to_string()),
            ],
        );
    }
    log_warn(
        MCIS_COMPONENT,
        "VM provisioning failed",
        &[
            ("namespace", ns_id),
            ("mcis", mcis_id),
            ("vm", &vm.id),
            ("cause", cause),
        ],
    );
}

fn parse_ssh_port(access_point: &str) -> String {
    access_point
        .rsplit_once(':')
        .map(|(_, port)| port.to_string())
        .filter(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or_else(|| "22".to_string())
}

/// Best-effort monitoring agent installation, dispatched after provisioning.
/// Failures are recorded on the VM and never change the MCIS status.
async fn dispatch_agent_install(ctx: &CoreContext, ns_id: &str, mcis_id: &str) {
    let vms = match list_vms(ctx, ns_id, mcis_id) {
        Ok(vms) => vms,
        Err(err) => {
            log_warn(
                MCIS_COMPONENT,
                "Skipping agent install; VM listing failed",
                &[("namespace", ns_id), ("mcis", mcis_id), ("cause", &err.to_string())],
            );
            return;
        }
    };

    let client = reqwest::Client::new();
    let monitor_url = format!(
        "{}/agent/install",
        ctx.runtime().dragonfly_rest_url().trim_end_matches('/')
    );

    for mut vm in vms {
        if vm.status != VmStatus::Running || vm.public_ip.is_empty() {
            continue;
        }

        let payload = serde_json::json!({
            "nsId": ns_id,
            "mcisId": mcis_id,
            "vmId": vm.id,
            "publicIp": vm.public_ip,
            "sshPort": vm.ssh_port,
            "userName": vm.vm_user_account,
        });

        let sent = client
            .post(monitor_url.as_str())
            .timeout(AGENT_INSTALL_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        vm.mon_agent_status = match sent {
            Ok(response) if response.status().is_success() => "installed".to_string(),
            Ok(response) => {
                log_warn(
                    MCIS_COMPONENT,
                    "Agent install rejected",
                    &[
                        ("vm", &vm.id),
                        ("status", response.status().as_str()),
                    ],
                );
                "failed".to_string()
            }
            Err(err) => {
                log_warn(
                    MCIS_COMPONENT,
                    "Agent install unreachable",
                    &[("vm", &vm.id), ("cause", &err.to_string())],
                );
                "failed".to_string()
            }
        };

        if let Err(err) = persist_vm(ctx, ns_id, mcis_id, &vm) {
            log_warn(
                MCIS_COMPONENT,
                "Failed to record agent install outcome",
                &[("vm", &vm.id), ("cause", &err.to_string())],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vm_req(name: &str, size: u32) -> VmReq {
        VmReq {
            name: name.to_string(),
            sub_group_size: size,
            connection_name: "aws-1".to_string(),
            spec_id: "small".to_string(),
            image_id: "ubuntu".to_string(),
            v_net_id: "vnet1".to_string(),
            subnet_id: "sn1".to_string(),
            security_group_ids: vec!["sg1".to_string()],
            ssh_key_id: "key1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn sub_groups_expand_into_indexed_siblings() {
        let req = McisReq {
            name: "m1".to_string(),
            vm: vec![vm_req("web", 3), vm_req("db", 1)],
            label: HashMap::new(),
            ..Default::default()
        };
        let expanded = expand_vm_requests(&req).expect("expansion");
        let ids: Vec<&str> = expanded.iter().map(|(_, id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["web-1", "web-2", "web-3", "db"]);
        assert_eq!(expanded[0].2, "web");
        assert_eq!(expanded[3].2, "");
    }

    #[test]
    fn zero_sub_group_size_is_rejected() {
        let req = McisReq {
            name: "m1".to_string(),
            vm: vec![vm_req("web", 0)],
            ..Default::default()
        };
        assert!(matches!(
            expand_vm_requests(&req),
            Err(OpError::Validation(_))
        ));
    }

    #[test]
    fn duplicate_vm_names_are_rejected() {
        let req = McisReq {
            name: "m1".to_string(),
            vm: vec![vm_req("web", 1), vm_req("web", 1)],
            ..Default::default()
        };
        assert!(matches!(
            expand_vm_requests(&req),
            Err(OpError::Validation(_))
        ));
    }

    #[test]
    fn ssh_port_parses_from_access_point() {
        assert_eq!(parse_ssh_port("3.35.10.2:22"), "22");
        assert_eq!(parse_ssh_port("3.35.10.2:2022"), "2022");
        assert_eq!(parse_ssh_port("no-port"), "22");
        assert_eq!(parse_ssh_port(""), "22");
    }
}
