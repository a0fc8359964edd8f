use std::sync::Arc;
use std::thread;

use polycloud::polycloud::test_support::keyspace_lock;
use polycloud::polycloud::util::Keyspace;

use crate::support::keyspace_sandbox;

#[test]
fn parallel_writers_on_distinct_keys_all_land() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("concurrency");
    let barrier = Arc::new(std::sync::Barrier::new(8));

    let mut handles = Vec::new();
    for writer in 0..8 {
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for item in 0..4 {
                keyspace
                    .put(&format!("/writer-{writer}/item-{item}"), "payload")
                    .expect("parallel put");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let entries = keyspace.get_list("/", true).expect("scan");
    assert_eq!(entries.len(), 32);
}

#[test]
fn contended_key_keeps_a_complete_value() {
    let _guard = keyspace_lock().lock();
    let _sandbox = keyspace_sandbox();

    let keyspace = Keyspace::new("concurrency");
    let barrier = Arc::new(std::sync::Barrier::new(4));

    let mut handles = Vec::new();
    for writer in 0..4 {
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let payload = format!("writer-{writer}").repeat(64);
            for _ in 0..8 {
                keyspace.put("/contended", &payload).expect("put");
            }
            payload
        }));
    }

    let payloads: Vec<String> = handles
        .into_iter()
        .map(|handle| handle.join().expect("writer thread"))
        .collect();

    // Atomic rename guarantees the final value is one writer's payload,
    // never an interleaving.
    let entry = keyspace
        .get("/contended")
        .expect("get")
        .expect("value present");
    assert!(payloads.iter().any(|payload| *payload == entry.value));
}
