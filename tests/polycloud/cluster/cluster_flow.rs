use polycloud::polycloud::cluster::engine::{
    add_node_group, change_autoscale_size, create_cluster, delete_cluster, get_cluster,
    remove_node_group, set_autoscaling,
};
use polycloud::polycloud::cluster::types::{ClusterReq, ClusterStatus, NodeGroupReq};
use polycloud::polycloud::common::error::OpError;
use polycloud::polycloud::resource::registry::{self, ResourceKind};
use polycloud::polycloud::test_support::keyspace_lock;

use crate::support::{keyspace_sandbox, seed_infra, seed_namespace, test_context, StubDriver};

fn node_group(name: &str) -> NodeGroupReq {
    NodeGroupReq {
        name: name.to_string(),
        image_id: "img-ok".to_string(),
        spec_id: "spec-ok".to_string(),
        ssh_key_id: "key-ok".to_string(),
        on_auto_scaling: true,
        desired_node_size: 2,
        min_node_size: 1,
        max_node_size: 4,
        ..Default::default()
    }
}

fn cluster_req(name: &str, groups: Vec<NodeGroupReq>) -> ClusterReq {
    ClusterReq {
        name: name.to_string(),
        connection_name: "conn-ok".to_string(),
        version: "1.29".to_string(),
        v_net_id: "vnet-ok".to_string(),
        subnet_ids: vec!["sn-ok".to_string()],
        security_group_ids: vec!["sg-ok".to_string()],
        node_groups: groups,
        ..Default::default()
    }
}

#[tokio::test]
async fn create_records_cluster_with_access_info() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;

    let created = create_cluster(&ctx, "ns-a", &cluster_req("c1", vec![node_group("pool-a")]))
        .await
        .expect("create cluster");

    assert_eq!(created.id, "c1");
    assert_eq!(created.status, ClusterStatus::Active);
    assert_eq!(created.version, "1.29");
    assert!(created.csp_resource_id.starts_with("eks-"));
    assert_eq!(created.access.endpoint, "https://cluster.endpoint");
    assert!(!created.access.kubeconfig.is_empty());

    assert_eq!(created.node_groups.len(), 1);
    let group = &created.node_groups[0];
    assert_eq!(group.id, "pool-a");
    assert_eq!(group.status, ClusterStatus::Active);
    assert!(group.csp_resource_id.starts_with("ng-"));
    assert_eq!(group.nodes.len(), 1);

    // The cluster holds references on its shared resources.
    let vnet_refs = registry::get_associated_object_list(&ctx, "ns-a", ResourceKind::VNet, "vnet-ok")
        .expect("vnet associations");
    assert!(vnet_refs.contains(&"/ns/ns-a/cluster/c1".to_string()));
}

#[tokio::test]
async fn node_groups_are_added_and_removed_sequentially() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    create_cluster(&ctx, "ns-a", &cluster_req("c1", vec![node_group("pool-a")]))
        .await
        .expect("create cluster");

    let widened = add_node_group(&ctx, "ns-a", "c1", &node_group("pool-b"))
        .await
        .expect("add node group");
    assert_eq!(widened.node_groups.len(), 2);

    let duplicate = add_node_group(&ctx, "ns-a", "c1", &node_group("pool-b")).await;
    assert!(matches!(duplicate, Err(OpError::AlreadyExists { .. })));

    let narrowed = remove_node_group(&ctx, "ns-a", "c1", "pool-a")
        .await
        .expect("remove node group");
    assert_eq!(narrowed.node_groups.len(), 1);

    // The last node group is load-bearing.
    let last = remove_node_group(&ctx, "ns-a", "c1", "pool-b").await;
    assert!(matches!(last, Err(OpError::Conflict(_))));
}

#[tokio::test]
async fn autoscaling_controls_validate_and_persist() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    create_cluster(&ctx, "ns-a", &cluster_req("c1", vec![node_group("pool-a")]))
        .await
        .expect("create cluster");

    let off = set_autoscaling(&ctx, "ns-a", "c1", "pool-a", false)
        .await
        .expect("disable autoscaling");
    assert!(!off.node_groups[0].on_auto_scaling);

    let bad = change_autoscale_size(&ctx, "ns-a", "c1", "pool-a", 5, 1, 4).await;
    assert!(matches!(bad, Err(OpError::Validation(_))));

    let resized = change_autoscale_size(&ctx, "ns-a", "c1", "pool-a", 3, 1, 4)
        .await
        .expect("resize");
    assert_eq!(resized.node_groups[0].desired_node_size, 3);
    assert_eq!(resized.node_groups[0].max_node_size, 4);

    let stored = get_cluster(&ctx, "ns-a", "c1").expect("get cluster");
    assert_eq!(stored.node_groups[0].desired_node_size, 3);
}

#[tokio::test]
async fn delete_releases_shared_resource_references() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    seed_namespace(&ctx, "ns-a");
    seed_infra(&ctx, "ns-a", "conn-ok", "ok").await;
    create_cluster(&ctx, "ns-a", &cluster_req("c1", vec![node_group("pool-a")]))
        .await
        .expect("create cluster");

    delete_cluster(&ctx, "ns-a", "c1", false)
        .await
        .expect("delete cluster");

    assert!(matches!(
        get_cluster(&ctx, "ns-a", "c1"),
        Err(OpError::NotFound { .. })
    ));
    let vnet_refs = registry::get_associated_object_list(&ctx, "ns-a", ResourceKind::VNet, "vnet-ok")
        .expect("vnet associations");
    assert!(!vnet_refs.contains(&"/ns/ns-a/cluster/c1".to_string()));
}
