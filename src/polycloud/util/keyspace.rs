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

use crate::polycloud::logger::log_warn;
use crate::polycloud::observability::metrics;
use crate::polycloud::util::error::{new_error, with_context};
use crate::polycloud::Config;

use fs2::FileExt;
use std::collections::HashSet;
use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::RuntimeFlavor;

const VALUE_FILE_NAME: &str = "_value_";
const KEYSPACE_COMPONENT: &str = "keyspace";
const MAX_KEY_DEPTH: usize = 16;
const MAX_KEY_LENGTH: usize = 512;
const KEYSPACE_BLOCKING_WORKERS: usize = 4;

/// A single key/value entry returned by reads and prefix scans.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

struct BlockingExecutor {
    sender: mpsc::Sender<Job>,
    queue_depth: Arc<AtomicUsize>,
}

struct Job {
    queued_at: Instant,
    run: Box<dyn FnOnce(Duration) + Send + 'static>,
}

impl BlockingExecutor {
    fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let queue_depth = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let shared_receiver = Arc::new(Mutex::new(receiver));

        for index in 0..workers {
            let receiver = Arc::clone(&shared_receiver);
            let queue_depth = Arc::clone(&queue_depth);
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name(format!("keyspace-blocking-{index}"))
                .spawn(move || worker_loop(receiver, queue_depth, active))
                .expect("failed to spawn keyspace blocking worker");
        }

        BlockingExecutor {
            sender,
            queue_depth,
        }
    }

    fn submit<R, E, F>(&self, operation: &'static str, work: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let job = Job {
            queued_at: Instant::now(),
            run: Box::new(move |queue_wait| {
                let start = Instant::now();
                let result = work();
                let run_duration = start.elapsed();
                metrics::observe_keyspace_blocking(operation, queue_wait, run_duration);
                let _ = result_tx.send(result);
            }),
        };

        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        metrics::set_keyspace_blocking_queue(self.queue_depth.load(Ordering::SeqCst));

        if self.sender.send(job).is_err() {
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
            metrics::set_keyspace_blocking_queue(self.queue_depth.load(Ordering::SeqCst));
            panic!("keyspace blocking executor shut down unexpectedly");
        }

        result_rx
            .recv()
            .expect("keyspace blocking worker dropped result")
    }
}

fn worker_loop(
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    queue_depth: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
) {
    loop {
        let job = {
            let guard = receiver
                .lock()
                .expect("keyspace blocking receiver lock poisoned");
            guard.recv()
        };

        match job {
            Ok(job) => {
                queue_depth.fetch_sub(1, Ordering::SeqCst);
                metrics::set_keyspace_blocking_queue(queue_depth.load(Ordering::SeqCst));
                active.fetch_add(1, Ordering::SeqCst);
                metrics::set_keyspace_blocking_active(active.load(Ordering::SeqCst));
                let queue_wait = job.queued_at.elapsed();
                (job.run)(queue_wait);
                active.fetch_sub(1, Ordering::SeqCst);
                metrics::set_keyspace_blocking_active(active.load(Ordering::SeqCst));
            }
            Err(_) => break,
        }
    }
}

fn blocking_executor() -> &'static BlockingExecutor {
    static EXECUTOR: OnceLock<BlockingExecutor> = OnceLock::new();
    EXECUTOR.get_or_init(|| BlockingExecutor::new(KEYSPACE_BLOCKING_WORKERS))
}

fn run_blocking<R, E, F>(operation: &'static str, work: F) -> Result<R, E>
where
    F: FnOnce() -> Result<R, E> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| blocking_executor().submit(operation, work))
            }
            _ => blocking_executor().submit(operation, work),
        },
        Err(_) => blocking_executor().submit(operation, work),
    }
}

/// A file-based lock used for concurrent access control.
/// Read paths acquire the shared guard, while writers take the exclusive guard.
struct FileLock {
    file: File,
}

impl FileLock {
    fn new(shared: bool) -> std::io::Result<Self> {
        let lockfile_path = Config::LockFile.get_path();
        if let Some(parent) = lockfile_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(lockfile_path)?;
        if shared {
            file.lock_shared()?;
        } else {
            file.lock_exclusive()?;
        }
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Hierarchical key/value store backed by the filesystem.
///
/// Keys are `/`-separated paths mirroring the object hierarchy. Writes are
/// atomic per key; no multi-key transaction is offered, so callers must be
/// idempotent and tolerate partial updates across keys.
#[derive(Clone, Copy)]
pub struct Keyspace {
    partition: &'static str,
}

impl Keyspace {
    pub const fn new(partition: &'static str) -> Keyspace {
        Keyspace { partition }
    }

    fn execute_blocking<R, F>(
        &self,
        operation: &'static str,
        work: F,
    ) -> Result<R, Box<dyn Error + Send + Sync>>
    where
        F: FnOnce() -> Result<R, Box<dyn Error + Send + Sync>> + Send + 'static,
        R: Send + 'static,
    {
        run_blocking(operation, work)
    }

    fn ensure_repaired(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        static REPAIRED_PARTITIONS: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
        let tracker = REPAIRED_PARTITIONS.get_or_init(|| Mutex::new(HashSet::new()));
        {
            let repaired = tracker
                .lock()
                .map_err(|_| new_error("Keyspace repair tracking lock poisoned"))?;
            if repaired.contains(&self.partition) {
                return Ok(());
            }
        }

        self.repair_partition()?;

        let mut repaired = tracker
            .lock()
            .map_err(|_| new_error("Keyspace repair tracking lock poisoned"))?;
        repaired.insert(self.partition);
        Ok(())
    }

    fn repair_partition(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _lock = FileLock::new(false).map_err(|e| {
            with_context(
                e,
                "Failed to acquire exclusive keyspace lock for repair pass",
            )
        })?;

        let partition_root = Config::Keyspace.get_path().join(self.partition);
        if !partition_root.exists() {
            return Ok(());
        }

        repair_directory(self.partition, &partition_root)?;

        Ok(())
    }

    /// Stores a value under the given key.
    pub fn put(&self, key: &str, value: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let keyspace = *self;
        let key = key.to_string();
        let value = value.to_string();
        self.execute_blocking("put", move || keyspace.put_blocking(&key, &value))
    }

    fn put_blocking(&self, key: &str, value: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.ensure_repaired()?;
        let key_path = resolve_path(self.partition, key)?;
        let _lock = FileLock::new(false)
            .map_err(|e| with_context(e, "Failed to acquire exclusive keyspace lock"))?;

        put_value(&key_path, value)
    }

    /// Retrieves the entry for the given key, or `None` when absent.
    pub fn get(&self, key: &str) -> Result<Option<KeyValue>, Box<dyn Error + Send + Sync>> {
        let keyspace = *self;
        let key = key.to_string();
        self.execute_blocking("get", move || keyspace.get_blocking(&key))
    }

    fn get_blocking(&self, key: &str) -> Result<Option<KeyValue>, Box<dyn Error + Send + Sync>> {
        self.ensure_repaired()?;
        let key_path = resolve_path(self.partition, key)?;

        let _lock = FileLock::new(true)
            .map_err(|e| with_context(e, "Failed to acquire shared keyspace lock"))?;

        Ok(read_value_if_exists(&key_path)?.map(|value| KeyValue {
            key: key.to_string(),
            value,
        }))
    }

    /// Returns true when a value exists under the given key.
    pub fn exists(&self, key: &str) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(self.get(key)?.is_some())
    }

    /// Lists every entry strictly below the given prefix.
    ///
    /// When `recursive` is false, only entries exactly one level below the
    /// prefix are returned. Results are sorted by key.
    pub fn get_list(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<KeyValue>, Box<dyn Error + Send + Sync>> {
        let keyspace = *self;
        let prefix = prefix.to_string();
        self.execute_blocking("get_list", move || {
            keyspace.get_list_blocking(&prefix, recursive)
        })
    }

    fn get_list_blocking(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<KeyValue>, Box<dyn Error + Send + Sync>> {
        self.ensure_repaired()?;
        let base_path = resolve_path(self.partition, prefix)?;

        let _lock = FileLock::new(true)
            .map_err(|e| with_context(e, "Failed to acquire shared keyspace lock"))?;

        let mut entries = Vec::new();
        if base_path.exists() {
            collect_entries(self.partition, &base_path, recursive, &mut entries)?;
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Deletes the value and associated directory for the given key.
    pub fn delete(&self, key: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let keyspace = *self;
        let key = key.to_string();
        self.execute_blocking("delete", move || keyspace.delete_blocking(&key))
    }

    fn delete_blocking(&self, key: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.ensure_repaired()?;
        let key_path = resolve_path(self.partition, key)?;
        let _lock = FileLock::new(false)
            .map_err(|e| with_context(e, "Failed to acquire exclusive keyspace lock"))?;

        delete(self.partition, &key_path)
    }

    /// Forces a repair pass for this partition.
    pub fn repair_now(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let keyspace = *self;
        self.execute_blocking("repair_now", move || keyspace.repair_partition())
    }
}

/// Retains only the entries exactly one level below the given prefix.
///
/// Used by callers that scanned recursively but want direct children, e.g.
/// listing namespaces without pulling in every resource stored beneath them.
pub fn get_child_list(entries: &[KeyValue], prefix: &str) -> Vec<KeyValue> {
    let normalized = if prefix == "/" {
        String::new()
    } else {
        prefix.trim_end_matches('/').to_string()
    };

    entries
        .iter()
        .filter(|entry| {
            entry
                .key
                .strip_prefix(&normalized)
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|rest| !rest.is_empty() && !rest.contains('/'))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn collect_entries(
    partition: &str,
    dir: &Path,
    recursive: bool,
    entries: &mut Vec<KeyValue>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(with_context(
                e,
                format!("Failed to read keyspace directory '{}'", dir.display()),
            ))
        }
    };

    for entry in read_dir {
        let entry = entry.map_err(|e| {
            with_context(
                e,
                format!("Failed to iterate keyspace directory '{}'", dir.display()),
            )
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        if let Some(value) = read_value_if_exists(&path)? {
            let key = resolve_key(partition, &path)?;
            entries.push(KeyValue { key, value });
        }

        if recursive {
            collect_entries(partition, &path, true, entries)?;
        }
    }

    Ok(())
}

/// Resolves a key path into a full, canonicalized path within the data root.
fn resolve_path(partition: &str, key: &str) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    if key.is_empty() {
        return Err(new_error("Key path is empty"));
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(new_error(format!(
            "Key path \"{}\" exceeds max length of {} characters",
            key, MAX_KEY_LENGTH
        )));
    }

    if !is_valid_key_path(key) {
        return Err(new_error(format!(
            "Key path \"{}\" must start with '/' and contain only alphanumeric segments",
            key
        )));
    }

    if key != "/" {
        let mut depth = 0usize;
        for segment in key.split('/').filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(new_error(format!(
                    "Key path \"{}\" must not contain '.' or '..' segments",
                    key
                )));
            }
            depth += 1;
        }
        if depth > MAX_KEY_DEPTH {
            return Err(new_error(format!(
                "Key path \"{}\" exceeds max depth of {} segments",
                key, MAX_KEY_DEPTH
            )));
        }
    }

    let partition_root = Config::Keyspace.get_path().join(partition);
    fs::create_dir_all(&partition_root).map_err(|e| {
        with_context(
            e,
            format!(
                "Failed to prepare keyspace partition '{}'",
                partition_root.display()
            ),
        )
    })?;

    if key == "/" {
        Ok(partition_root)
    } else {
        Ok(partition_root.join(&key[1..]))
    }
}

fn is_valid_key_path(key: &str) -> bool {
    if !key.starts_with('/') {
        return false;
    }
    if key == "/" {
        return true;
    }

    key.split('/').skip(1).all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    })
}

/// Resolves a canonicalized path within the data root into a key.
fn resolve_key(partition: &str, path: &Path) -> Result<String, Box<dyn Error + Send + Sync>> {
    path.strip_prefix(Config::Keyspace.get_path().join(partition))
        .map(|key| key.to_string_lossy().into_owned())
        .map(|key| format!("/{}", key))
        .map_err(|_| {
            new_error(format!(
                "Path {} is not part of keyspace partition {}",
                path.display(),
                partition
            ))
        })
}

/// Stores a value under the given key path.
fn put_value(key_path: &Path, value: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    fs::create_dir_all(key_path).map_err(|e| {
        with_context(
            e,
            format!("Failed to create directories for '{}'", key_path.display()),
        )
    })?;

    let value_file = key_path.join(VALUE_FILE_NAME);
    persist_atomically(&value_file, value.as_bytes())
}

/// Reads the value associated with the given key if it exists.
fn read_value_if_exists(key_path: &Path) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
    let value_file = key_path.join(VALUE_FILE_NAME);
    if !value_file.exists() {
        return Ok(None);
    }

    let mut file = File::open(&value_file).map_err(|e| {
        with_context(
            e,
            format!("Failed to open value file '{}'", value_file.display()),
        )
    })?;

    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| {
        with_context(
            e,
            format!("Failed to read value file '{}'", value_file.display()),
        )
    })?;

    Ok(Some(contents))
}

/// Deletes the value and associated directory for the given key.
fn delete(partition: &str, key_path: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    let value_file = key_path.join(VALUE_FILE_NAME);
    if !value_file.exists() {
        return Err(new_error(format!(
            "Value file not found: {}",
            value_file.display()
        )));
    }

    fs::remove_file(&value_file).map_err(|e| {
        with_context(
            e,
            format!("Failed to remove value file '{}'", value_file.display()),
        )
    })?;

    cleanup_empty_dirs(partition, key_path);

    Ok(())
}

fn cleanup_empty_dirs(partition: &str, key_path: &Path) {
    let data_root = Config::Keyspace.get_path().join(partition);
    let mut dir = key_path.to_path_buf();
    while dir != data_root && dir.starts_with(&data_root) {
        match fs::remove_dir(&dir) {
            Ok(_) => {
                if let Some(parent) = dir.parent() {
                    dir = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

fn repair_directory(partition: &str, dir: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(with_context(
                e,
                format!("Failed to read keyspace directory '{}'", dir.display()),
            ))
        }
    };

    for entry in read_dir {
        let entry = entry.map_err(|e| {
            with_context(
                e,
                format!("Failed to iterate keyspace directory '{}'", dir.display()),
            )
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| {
            with_context(
                e,
                format!("Failed to determine entry type for '{}'", path.display()),
            )
        })?;

        if file_type.is_dir() {
            repair_directory(partition, &path)?;
            continue;
        }

        if file_type.is_file() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str.ends_with(".tmp") {
                fs::remove_file(&path).map_err(|e| {
                    with_context(
                        e,
                        format!("Failed to remove orphaned file '{}'", path.display()),
                    )
                })?;
                let path_str = path.display().to_string();
                log_warn(
                    KEYSPACE_COMPONENT,
                    "Removed orphaned keyspace temp file",
                    &[("partition", partition), ("path", &path_str)],
                );
            }
        }
    }

    Ok(())
}

/// Returns true when a keyspace error indicates a missing value file.
pub fn is_missing_value_error(err: &dyn Error) -> bool {
    let msg = err.to_string();
    msg.contains("No such file or directory") || msg.contains("Value file not found")
}

fn persist_atomically(target: &Path, data: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
    let parent = target.parent().ok_or_else(|| {
        new_error(format!(
            "Target '{}' does not have a parent directory",
            target.display()
        ))
    })?;

    fs::create_dir_all(parent).map_err(|e| {
        with_context(
            e,
            format!("Failed to create parent directory '{}'", parent.display()),
        )
    })?;

    let tmpfile_path = target.with_extension("tmp");
    let mut tmp_guard = TempFileGuard::new(tmpfile_path.clone());
    let mut tmpfile = File::create(&tmpfile_path).map_err(|e| {
        with_context(
            e,
            format!(
                "Failed to create temporary file '{}'",
                tmpfile_path.display()
            ),
        )
    })?;

    tmpfile.write_all(data).map_err(|e| {
        with_context(
            e,
            format!(
                "Failed to write to temporary file '{}'",
                tmpfile_path.display()
            ),
        )
    })?;
    tmpfile.sync_all().map_err(|e| {
        with_context(
            e,
            format!("Failed to sync temporary file '{}'", tmpfile_path.display()),
        )
    })?;
    drop(tmpfile);

    fs::rename(&tmpfile_path, target)
        .map_err(|e| with_context(e, format!("Failed to replace file '{}'", target.display())))?;
    tmp_guard.keep();

    sync_parent(target)?;

    Ok(())
}

fn sync_parent(path: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Some(dir) = path.parent() {
        let dir_file = File::open(dir).map_err(|e| {
            with_context(e, format!("Failed to open directory '{}'", dir.display()))
        })?;
        dir_file.sync_all().map_err(|e| {
            with_context(e, format!("Failed to sync directory '{}'", dir.display()))
        })?;
    }
    Ok(())
}

struct TempFileGuard {
    path: PathBuf,
    keep: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_list_filters_to_one_level() {
        let entries = vec![
            KeyValue {
                key: "/ns/alpha".to_string(),
                value: "a".to_string(),
            },
            KeyValue {
                key: "/ns/alpha/resources/vNet/v1".to_string(),
                value: "deep".to_string(),
            },
            KeyValue {
                key: "/ns/beta".to_string(),
                value: "b".to_string(),
            },
        ];

        let children = get_child_list(&entries, "/ns");
        let keys: Vec<&str> = children.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["/ns/alpha", "/ns/beta"]);
    }

    #[test]
    fn child_list_of_root_keeps_top_level_only() {
        let entries = vec![
            KeyValue {
                key: "/config".to_string(),
                value: "c".to_string(),
            },
            KeyValue {
                key: "/config/DB_URL".to_string(),
                value: "v".to_string(),
            },
        ];

        let children = get_child_list(&entries, "/");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].key, "/config");
    }

    #[test]
    fn invalid_key_paths_are_rejected() {
        assert!(!is_valid_key_path("relative/path"));
        assert!(!is_valid_key_path("/double//slash"));
        assert!(!is_valid_key_path("/bad segment"));
        assert!(is_valid_key_path("/ns/alpha-1/resources/vNet/v_1.0"));
    }
}
