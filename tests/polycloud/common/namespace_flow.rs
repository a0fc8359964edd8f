use polycloud::polycloud::common::error::OpError;
use polycloud::polycloud::common::namespace::{
    check_ns, create_ns, del_ns, get_ns, list_ns_id, NsReq,
};
use polycloud::polycloud::test_support::keyspace_lock;

use crate::support::{keyspace_sandbox, test_context, StubDriver};

fn ns_req(name: &str) -> NsReq {
    NsReq {
        name: name.to_string(),
        description: "test tenant".to_string(),
    }
}

#[test]
fn create_get_round_trip_echoes_fields() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    let created = create_ns(&ctx, &ns_req("ns-a")).expect("create namespace");
    assert_eq!(created.id, "ns-a");
    assert!(!created.uuid.is_empty());

    let fetched = get_ns(&ctx, "ns-a").expect("get namespace");
    assert_eq!(fetched, created);
    assert!(check_ns(&ctx, "ns-a").expect("check"));
    assert_eq!(list_ns_id(&ctx).expect("list"), vec!["ns-a".to_string()]);
}

#[test]
fn duplicate_create_fails_and_leaves_first_untouched() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    let first = create_ns(&ctx, &ns_req("ns-a")).expect("first create");
    let second = create_ns(
        &ctx,
        &NsReq {
            name: "ns-a".to_string(),
            description: "different".to_string(),
        },
    );
    assert!(matches!(second, Err(OpError::AlreadyExists { .. })));

    let fetched = get_ns(&ctx, "ns-a").expect("get");
    assert_eq!(fetched.description, first.description);
}

#[test]
fn invalid_names_are_rejected() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    for name in ["", "-bad", "bad-", "under_score", "way.too.dotted"] {
        assert!(matches!(
            create_ns(&ctx, &ns_req(name)),
            Err(OpError::Validation(_))
        ));
    }
}

#[test]
fn delete_refuses_non_empty_namespace() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    create_ns(&ctx, &ns_req("ns-a")).expect("create");
    ctx.keyspace()
        .put("/ns/ns-a/resources/sshKey/k1", "{}")
        .expect("seed child");

    assert!(matches!(
        del_ns(&ctx, "ns-a"),
        Err(OpError::Conflict(_))
    ));

    ctx.keyspace()
        .delete("/ns/ns-a/resources/sshKey/k1")
        .expect("clear child");
    del_ns(&ctx, "ns-a").expect("delete now succeeds");
    assert!(!check_ns(&ctx, "ns-a").expect("check"));
}

#[test]
fn missing_namespace_reads_as_not_found() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    assert!(matches!(
        get_ns(&ctx, "ghost"),
        Err(OpError::NotFound { .. })
    ));
}
