use polycloud::polycloud::common::error::OpError;
use polycloud::polycloud::common::namespace::{create_ns, NsReq};
use polycloud::polycloud::resource::registry::{
    self, AssociationAction, ResourceKind,
};
use polycloud::polycloud::resource::vnet::{
    create_vnet, get_vnet, SubnetReq, VNetCreateOption, VNetReq,
};
use polycloud::polycloud::test_support::keyspace_lock;

use crate::support::{keyspace_sandbox, test_context, StubDriver};

fn seed_namespace(ctx: &polycloud::polycloud::common::CoreContext, name: &str) {
    create_ns(
        ctx,
        &NsReq {
            name: name.to_string(),
            description: String::new(),
        },
    )
    .expect("create namespace");
}

fn vnet_req() -> VNetReq {
    VNetReq {
        name: "vnet1".to_string(),
        connection_name: "aws-seoul-1".to_string(),
        cidr_block: "10.0.0.0/16".to_string(),
        subnet_info_list: vec![SubnetReq {
            name: "sn1".to_string(),
            ipv4_cidr: "10.0.0.0/24".to_string(),
            ..Default::default()
        }],
        description: "primary network".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_returns_vnet_with_backreferenced_subnet() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    let created = create_vnet(&ctx, "ns-a", &vnet_req(), VNetCreateOption::Provision)
        .await
        .expect("create vnet");

    assert_eq!(created.id, "vnet1");
    assert_eq!(created.cidr_block, "10.0.0.0/16");
    assert!(created.csp_resource_id.starts_with("vpc-"));
    // The driver never sees the tenant id, only the synthesized name.
    assert_eq!(created.csp_resource_name, created.uuid);

    assert_eq!(created.subnet_info_list.len(), 1);
    let subnet = &created.subnet_info_list[0];
    assert_eq!(subnet.id, "sn1");
    assert_eq!(subnet.vnet_id, "vnet1");
    assert_eq!(subnet.ipv4_cidr, "10.0.0.0/24");
    assert!(subnet.csp_resource_id.starts_with("subnet-"));

    let fetched = get_vnet(&ctx, "ns-a", "vnet1").expect("get vnet");
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.subnet_info_list.len(), 1);
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    create_vnet(&ctx, "ns-a", &vnet_req(), VNetCreateOption::Provision)
        .await
        .expect("first create");

    let second = create_vnet(&ctx, "ns-a", &vnet_req(), VNetCreateOption::Provision).await;
    assert!(matches!(second, Err(OpError::AlreadyExists { .. })));
}

#[tokio::test]
async fn create_in_missing_namespace_fails_without_driver_calls() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    let result = create_vnet(&ctx, "ghost", &vnet_req(), VNetCreateOption::Provision).await;
    assert!(matches!(result, Err(OpError::NotFound { .. })));
    assert!(stub.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn associated_vnet_refuses_deletion_until_released() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    create_vnet(&ctx, "ns-a", &vnet_req(), VNetCreateOption::Provision)
        .await
        .expect("create vnet");

    let consumer = "/ns/ns-a/mcis/m1/vm/web-1";
    registry::update_associated_object_list(
        &ctx,
        "ns-a",
        ResourceKind::VNet,
        "vnet1",
        AssociationAction::Add,
        consumer,
    )
    .expect("record association");

    let blocked = registry::delete_resource(&ctx, "ns-a", ResourceKind::VNet, "vnet1", false).await;
    match blocked {
        Err(OpError::Conflict(message)) => assert!(message.contains(consumer)),
        other => panic!("expected Conflict, got {other:?}"),
    }
    // The record survives the refused delete.
    assert!(get_vnet(&ctx, "ns-a", "vnet1").is_ok());

    registry::update_associated_object_list(
        &ctx,
        "ns-a",
        ResourceKind::VNet,
        "vnet1",
        AssociationAction::Remove,
        consumer,
    )
    .expect("release association");

    registry::delete_resource(&ctx, "ns-a", ResourceKind::VNet, "vnet1", false)
        .await
        .expect("delete after release");

    assert!(matches!(
        get_vnet(&ctx, "ns-a", "vnet1"),
        Err(OpError::NotFound { .. })
    ));

    // The cascade removed the subnet on the driver before the VPC.
    let paths = stub.recorded_paths();
    let subnet_delete = paths.iter().position(|p| p.contains("/subnet/"));
    let vpc_delete = paths
        .iter()
        .rposition(|p| p.starts_with("/vpc/") && !p.contains("/subnet/"));
    assert!(subnet_delete.is_some(), "subnet delete missing: {paths:?}");
    assert!(vpc_delete.is_some(), "vpc delete missing: {paths:?}");
    assert!(subnet_delete.unwrap() < vpc_delete.unwrap());
}

#[tokio::test]
async fn register_option_adopts_an_existing_vpc() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let stub = StubDriver::new();
    let ctx = test_context(stub.clone());

    seed_namespace(&ctx, "ns-a");
    let req = VNetReq {
        name: "imported".to_string(),
        connection_name: "aws-seoul-1".to_string(),
        ..Default::default()
    };
    let registered = create_vnet(&ctx, "ns-a", &req, VNetCreateOption::Register)
        .await
        .expect("register vnet");

    assert_eq!(registered.system_label, "Registered from driver resource");
    assert_eq!(registered.cidr_block, "10.9.0.0/16");
    assert!(stub
        .recorded_paths()
        .iter()
        .any(|path| path == "/vpc/imported"));
}
