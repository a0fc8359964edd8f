use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use polycloud::polycloud::common::error::OpError;
use polycloud::polycloud::mcis::control::{control_mcis, control_vm, refresh_mcis_status};
use polycloud::polycloud::mcis::provision::{create_mcis, get_mcis, get_vm};
use polycloud::polycloud::mcis::types::{McisReq, VmAction, VmStatus};
use polycloud::polycloud::test_support::keyspace_lock;

use crate::support::{
    keyspace_sandbox, seed_infra, seed_namespace, test_context, vm_req_for, StubDriver,
};

fn mcis_req(name: &str, vms: Vec<polycloud::polycloud::mcis::types::VmReq>) -> McisReq {
    McisReq {
        name: name.to_string(),
        vm: vms,
        install_mon_agent: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn concurrent_actions_on_one_vm_lose_with_busy() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "solo", 1)]),
        CancellationToken::new(),
    )
    .await
    .expect("create mcis");

    // Give the winner time in flight so the loser genuinely overlaps.
    stub.set_latency(Duration::from_millis(50));

    let (suspend, reboot) = tokio::join!(
        control_vm(&ctx, "ns-a", "m1", "solo", VmAction::Suspend),
        control_vm(&ctx, "ns-a", "m1", "solo", VmAction::Reboot),
    );

    let busy_count = [&suspend, &reboot]
        .iter()
        .filter(|result| matches!(result, Err(OpError::Busy(_))))
        .count();
    assert_eq!(busy_count, 1, "exactly one action must lose with Busy");
    assert_eq!(
        [&suspend, &reboot]
            .iter()
            .filter(|result| result.is_ok())
            .count(),
        1,
        "exactly one action must win"
    );

    // The winner's transition landed; the record is in a stable state.
    let vm = get_vm(&ctx, "ns-a", "m1", "solo").expect("vm record");
    assert!(matches!(vm.status, VmStatus::Suspended | VmStatus::Running));
}

#[tokio::test]
async fn suspend_resume_walks_the_state_machine() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 2)]),
        CancellationToken::new(),
    )
    .await
    .expect("create mcis");

    let result = control_mcis(&ctx, "ns-a", "m1", VmAction::Suspend)
        .await
        .expect("suspend mcis");
    assert_eq!(result.status, "Suspended");
    assert!(result.results.iter().all(|outcome| outcome.ok));

    // Suspending an already-suspended VM violates the state machine.
    let again = control_vm(&ctx, "ns-a", "m1", "web-1", VmAction::Suspend).await;
    assert!(matches!(again, Err(OpError::Conflict(_))));

    let resumed = control_mcis(&ctx, "ns-a", "m1", VmAction::Resume)
        .await
        .expect("resume mcis");
    assert_eq!(resumed.status, "Running");
}

#[tokio::test]
async fn status_poll_is_idempotent_and_tracks_the_driver() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    let created = create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 1)]),
        CancellationToken::new(),
    )
    .await
    .expect("create mcis");

    let first = refresh_mcis_status(&ctx, "ns-a", "m1").await.expect("poll");
    let second = refresh_mcis_status(&ctx, "ns-a", "m1").await.expect("poll again");
    assert_eq!(first.status, second.status);
    assert_eq!(first.vm[0].status, second.vm[0].status);

    // The CSP moved the VM behind our back; the next poll observes it.
    let uuid = &created.vm[0].uuid;
    stub.set_vm_state(uuid, "Suspended");
    let observed = refresh_mcis_status(&ctx, "ns-a", "m1").await.expect("poll");
    assert_eq!(observed.status, "Suspended");
    assert_eq!(observed.vm[0].status, VmStatus::Suspended);

    // Stored state matches what a plain read now returns.
    let stored = get_mcis(&ctx, "ns-a", "m1").expect("get");
    assert_eq!(stored.status, "Suspended");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bulk_status_poll_fans_out() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    create_mcis(
        &ctx,
        "ns-a",
        &mcis_req("m1", vec![vm_req_for("ok", "conn-ok", "web", 50)]),
        CancellationToken::new(),
    )
    .await
    .expect("create mcis");

    stub.set_latency(Duration::from_millis(100));

    let started = Instant::now();
    let polled = refresh_mcis_status(&ctx, "ns-a", "m1").await.expect("poll");
    let elapsed = started.elapsed();

    assert_eq!(polled.vm.len(), 50);
    // Serial polling would cost 50 × 100 ms; the fan-out (capped at 10 per
    // connection) must land far below that.
    assert!(
        elapsed < Duration::from_millis(2500),
        "bulk poll took {elapsed:?}"
    );
}

#[tokio::test]
async fn terminate_then_reterminate_conflicts() {
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

    let terminated = control_vm(&ctx, "ns-a", "m1", "web", VmAction::Terminate)
        .await
        .expect("terminate");
    assert_eq!(terminated.status, VmStatus::Terminated);

    let again = control_vm(&ctx, "ns-a", "m1", "web", VmAction::Terminate).await;
    assert!(matches!(again, Err(OpError::Conflict(_))));

    let aggregate = get_mcis(&ctx, "ns-a", "m1").expect("get");
    assert_eq!(aggregate.status, "Terminated");
}
