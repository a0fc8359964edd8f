use polycloud::polycloud::test_support::keyspace_lock;
use polycloud::polycloud::util::{get_child_list, Keyspace};

use crate::support::keyspace_sandbox;

#[test]
fn allowed_keys_round_trip() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("paths");

    let allowed = [
        "/token",
        "/alpha.numeric-123",
        "/MIXED.Case-Name",
        "/nested/path-segment",
    ];

    for key in allowed {
        keyspace.put(key, "value").expect("allowed key persisted");
    }

    let entry = keyspace
        .get("/nested/path-segment")
        .expect("get succeeds")
        .expect("nested value present");
    assert_eq!(entry.key, "/nested/path-segment");
    assert_eq!(entry.value, "value");
}

#[test]
fn invalid_keys_are_rejected() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("paths");

    for key in ["", "relative", "/with space", "/dot/../escape", "/trailing//"] {
        assert!(
            keyspace.put(key, "value").is_err(),
            "key {key:?} should be rejected"
        );
    }
}

#[test]
fn missing_keys_read_as_none() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("paths");
    assert!(keyspace.get("/nothing/here").expect("get succeeds").is_none());
    assert!(!keyspace.exists("/nothing/here").expect("exists succeeds"));
    assert!(keyspace.delete("/nothing/here").is_err());
}

#[test]
fn prefix_scans_are_sorted_and_child_filterable() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("paths");
    keyspace.put("/ns/b", "b").expect("put");
    keyspace.put("/ns/a", "a").expect("put");
    keyspace
        .put("/ns/a/resources/vNet/v1", "deep")
        .expect("put");

    let all = keyspace.get_list("/ns", true).expect("recursive scan");
    let keys: Vec<&str> = all.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["/ns/a", "/ns/a/resources/vNet/v1", "/ns/b"]);

    let children = get_child_list(&all, "/ns");
    let child_keys: Vec<&str> = children.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(child_keys, vec!["/ns/a", "/ns/b"]);

    let shallow = keyspace.get_list("/ns", false).expect("shallow scan");
    let shallow_keys: Vec<&str> = shallow.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(shallow_keys, vec!["/ns/a", "/ns/b"]);
}

#[test]
fn delete_prunes_empty_parent_directories() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("paths");
    keyspace.put("/a/b/c", "v").expect("put");
    keyspace.delete("/a/b/c").expect("delete");

    assert!(keyspace.get_list("/a", true).expect("scan").is_empty());
}

#[test]
fn overwrite_replaces_the_value() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("paths");
    keyspace.put("/cfg", "one").expect("put");
    keyspace.put("/cfg", "two").expect("overwrite");
    let entry = keyspace.get("/cfg").expect("get").expect("present");
    assert_eq!(entry.value, "two");
}
