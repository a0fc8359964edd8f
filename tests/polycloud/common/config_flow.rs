use polycloud::polycloud::common::config_store::{
    check_config, del_all_config, get_config, list_config, list_config_id, load_persisted_config,
    update_config, ConfigKey, ConfigReq,
};
use polycloud::polycloud::common::error::OpError;
use polycloud::polycloud::test_support::keyspace_lock;

use crate::support::{keyspace_sandbox, test_context, StubDriver};

#[test]
fn update_persists_and_refreshes_the_mirror() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    let updated = update_config(
        &ctx,
        &ConfigReq {
            name: "SPIDER_REST_URL".to_string(),
            value: "http://x:1".to_string(),
        },
    )
    .expect("update config");
    assert_eq!(updated.id, "SPIDER_REST_URL");

    // The in-process mirror sees the new value immediately, so the very
    // next driver request would target it.
    assert_eq!(ctx.runtime().spider_rest_url(), "http://x:1");

    let fetched = get_config(&ctx, "SPIDER_REST_URL").expect("get config");
    assert_eq!(fetched.value, "http://x:1");
    assert!(check_config(&ctx, "SPIDER_REST_URL").expect("check"));

    let listed = list_config(&ctx).expect("list");
    assert!(listed.iter().any(|c| c.value == "http://x:1"));
}

#[test]
fn unknown_keys_are_rejected() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    let result = update_config(
        &ctx,
        &ConfigReq {
            name: "NOT_A_KEY".to_string(),
            value: "whatever".to_string(),
        },
    );
    assert!(matches!(result, Err(OpError::Validation(_))));
    assert!(!check_config(&ctx, "NOT_A_KEY").expect("check"));
}

#[test]
fn persisted_values_reload_into_a_fresh_mirror() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    update_config(
        &ctx,
        &ConfigReq {
            name: "AUTOCONTROL_DURATION_MS".to_string(),
            value: "2500".to_string(),
        },
    )
    .expect("update");

    // A second context simulates process restart: the mirror starts from
    // env defaults until the persisted state is loaded.
    let fresh = test_context(StubDriver::new());
    assert_eq!(fresh.runtime().get(ConfigKey::AutocontrolDurationMs), "10000");
    load_persisted_config(&fresh).expect("load persisted");
    assert_eq!(fresh.runtime().get(ConfigKey::AutocontrolDurationMs), "2500");
}

#[test]
fn del_all_clears_every_entry() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();
    let ctx = test_context(StubDriver::new());

    for (name, value) in [("DB_URL", "db:5432"), ("DB_USER", "svc")] {
        update_config(
            &ctx,
            &ConfigReq {
                name: name.to_string(),
                value: value.to_string(),
            },
        )
        .expect("update");
    }
    assert_eq!(list_config_id(&ctx).expect("ids").len(), 2);

    del_all_config(&ctx).expect("delete all");
    assert!(list_config(&ctx).expect("list").is_empty());
}
