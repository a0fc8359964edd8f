use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use polycloud::polycloud::common::error::OpError;
use polycloud::polycloud::mcis::control::{continue_mcis, delete_mcis};
use polycloud::polycloud::mcis::provision::{create_mcis, get_mcis, list_vms};
use polycloud::polycloud::mcis::types::{McisReq, VmStatus};
use polycloud::polycloud::resource::registry::{self, ResourceKind};
use polycloud::polycloud::test_support::keyspace_lock;

use crate::support::{
    keyspace_sandbox, seed_infra, seed_namespace, test_context, vm_req_for, StubDriver,
};

fn mcis_req(name: &str, vms: Vec<polycloud::polycloud::mcis::types::VmReq>) -> McisReq {
    McisReq {
        name: name.to_string(),
        vm: vms,
        // Keep the monitoring agent out of unit scenarios; it would dial a
        // real endpoint.
        install_mon_agent: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn partial_driver_failure_yields_partial_failed() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    seed_infra(&ctx, "ns-a", "conn-bad", "bad").await;
    // Fail the second connection only after its shared resources exist.
    stub.fail_connection("conn-bad");

    let created = create_mcis(
        &ctx,
        "ns-a",
        &mcis_req(
            "m1",
            vec![
                vm_req_for("ok", "conn-ok", "web-ok", 1),
                vm_req_for("bad", "conn-bad", "web-bad", 1),
            ],
        ),
        CancellationToken::new(),
    )
    .await
    .expect("create mcis");

    assert_eq!(created.status, "Partial-Failed");

    let ok_vm = created.vm.iter().find(|vm| vm.id == "web-ok").expect("ok vm");
    assert_eq!(ok_vm.status, VmStatus::Running);
    assert_eq!(ok_vm.public_ip, "3.35.10.2");
    assert_eq!(ok_vm.ssh_port, "22");
    assert!(ok_vm.csp_resource_id.starts_with("i-"));

    let bad_vm = created.vm.iter().find(|vm| vm.id == "web-bad").expect("bad vm");
    assert_eq!(bad_vm.status, VmStatus::Failed);
    assert!(bad_vm.system_message.contains("Unavailable") || bad_vm.system_message.contains("down"));

    // No rollback: the successful sibling is untouched.
    assert_eq!(list_vms(&ctx, "ns-a", "m1").expect("list vms").len(), 2);

    delete_mcis(&ctx, "ns-a", "m1").await.expect("delete mcis");
    assert!(matches!(
        get_mcis(&ctx, "ns-a", "m1"),
        Err(OpError::NotFound { .. })
    ));
    assert!(list_vms(&ctx, "ns-a", "m1").expect("list").is_empty());
}

#[tokio::test]
async fn referenced_vnet_cannot_be_deleted_until_mcis_is_gone() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;

    create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 1)]),
        CancellationToken::new(),
    )
    .await
    .expect("create mcis");

    let blocked =
        registry::delete_resource(&ctx, "ns-a", ResourceKind::VNet, "vnet-ok", false).await;
    match blocked {
        Err(OpError::Conflict(message)) => {
            assert!(message.contains("/ns/ns-a/mcis/m1/vm/web"), "{message}")
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    delete_mcis(&ctx, "ns-a", "m1").await.expect("delete mcis");

    // The security group still references the vNet; drop it first, then the
    // vNet deletes cleanly.
    registry::delete_resource(&ctx, "ns-a", ResourceKind::SecurityGroup, "sg-ok", false)
        .await
        .expect("delete security group");
    registry::delete_resource(&ctx, "ns-a", ResourceKind::VNet, "vnet-ok", false)
        .await
        .expect("delete vnet after mcis removal");
}

#[tokio::test]
async fn duplicate_mcis_id_is_rejected() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;

    create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 1)]),
        CancellationToken::new(),
    )
    .await
    .expect("first create");

    let second = create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "db", 1)]),
        CancellationToken::new(),
    )
    .await;
    assert!(matches!(second, Err(OpError::AlreadyExists { .. })));
}

#[tokio::test]
async fn dangling_reference_fails_before_any_vm_is_persisted() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;

    let mut req = vm_req_for("ok", "conn-ok", "web", 1);
    req.ssh_key_id = "missing-key".to_string();

    let result = create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![req]),
        CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(OpError::NotFound { .. })));
    assert!(matches!(
        get_mcis(&ctx, "ns-a", "m1"),
        Err(OpError::NotFound { .. })
    ));
    assert!(!stub.recorded_paths().iter().any(|path| path == "/vm"));
}

#[tokio::test]
async fn sub_groups_expand_with_unique_uuids() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;

    let created = create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 3)]),
        CancellationToken::new(),
    )
    .await
    .expect("create mcis");

    assert_eq!(created.status, "Running");
    let ids: HashSet<&str> = created.vm.iter().map(|vm| vm.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["web-1", "web-2", "web-3"]));
    assert!(created.vm.iter().all(|vm| vm.sub_group_id == "web"));

    let uuids: HashSet<&str> = created.vm.iter().map(|vm| vm.uuid.as_str()).collect();
    assert_eq!(uuids.len(), 3, "uuids must be globally unique");
}

#[tokio::test]
async fn cancelled_create_never_reaches_the_driver() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;

    let token = CancellationToken::new();
    token.cancel();

    let created = create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 2)]),
        token,
    )
    .await
    .expect("create resolves even when cancelled");

    assert!(created.vm.iter().all(|vm| vm.status == VmStatus::Failed));
    assert!(!stub.recorded_paths().iter().any(|path| path == "/vm"));
}

#[tokio::test]
async fn held_mcis_provisions_only_on_continue() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;

    let mut req = mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 1)]);
    req.hold = true;

    let held = create_mcis(&ctx, "ns-a", &req, CancellationToken::new())
        .await
        .expect("create held mcis");
    assert_eq!(held.status, "Creating-InProgress");
    assert_eq!(held.target_action, "Hold");
    assert!(!stub.recorded_paths().iter().any(|path| path == "/vm"));

    let resumed = continue_mcis(&ctx, "ns-a", "m1", CancellationToken::new())
        .await
        .expect("continue mcis");
    assert_eq!(resumed.status, "Running");
    assert!(stub.recorded_paths().iter().any(|path| path == "/vm"));
}
