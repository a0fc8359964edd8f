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

use std::error::Error;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static DRIVER_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static DRIVER_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();
static FANOUT_TASKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static AUTOCONTROL_SWEEPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static KEYSPACE_BLOCKING_QUEUE_DEPTH: OnceLock<IntGauge> = OnceLock::new();
static KEYSPACE_BLOCKING_ACTIVE: OnceLock<IntGauge> = OnceLock::new();
static KEYSPACE_BLOCKING_WAIT: OnceLock<HistogramVec> = OnceLock::new();
static KEYSPACE_BLOCKING_RUN: OnceLock<HistogramVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::new_custom(Some("polycloud".to_string()), None)
            .expect("failed to initialise polycloud metrics registry")
    })
}

fn register_collector<C>(collector: C) -> C
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry()
        .register(Box::new(collector.clone()))
        .expect("failed to register polycloud metric collector");
    collector
}

fn driver_requests_total() -> &'static IntCounterVec {
    DRIVER_REQUESTS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "requests_total",
            "Driver requests grouped by endpoint and result",
        )
        .subsystem("driver");
        let counter = IntCounterVec::new(opts, &["endpoint", "result"])
            .expect("failed to build driver request counter");
        register_collector(counter)
    })
}

fn driver_request_duration() -> &'static HistogramVec {
    DRIVER_REQUEST_DURATION.get_or_init(|| {
        let opts = HistogramOpts::new(
            "request_duration_seconds",
            "Latency distribution for driver requests",
        )
        .subsystem("driver")
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]);
        let histogram = HistogramVec::new(opts, &["endpoint"])
            .expect("failed to build driver request histogram");
        register_collector(histogram)
    })
}

fn fanout_tasks_total() -> &'static IntCounterVec {
    FANOUT_TASKS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "fanout_tasks_total",
            "Child tasks launched by fan-out operations grouped by operation and result",
        );
        let counter = IntCounterVec::new(opts, &["operation", "result"])
            .expect("failed to build fanout task counter");
        register_collector(counter)
    })
}

fn autocontrol_sweeps_total() -> &'static IntCounterVec {
    AUTOCONTROL_SWEEPS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "autocontrol_sweeps_total",
            "Autocontrol reconciliation attempts grouped by result",
        );
        let counter = IntCounterVec::new(opts, &["result"])
            .expect("failed to build autocontrol sweep counter");
        register_collector(counter)
    })
}

fn keyspace_blocking_queue_depth() -> &'static IntGauge {
    KEYSPACE_BLOCKING_QUEUE_DEPTH.get_or_init(|| {
        let gauge = IntGauge::new(
            "keyspace_blocking_queue_depth",
            "Number of keyspace operations waiting for a blocking worker",
        )
        .expect("failed to build keyspace queue gauge");
        register_collector(gauge)
    })
}

fn keyspace_blocking_active() -> &'static IntGauge {
    KEYSPACE_BLOCKING_ACTIVE.get_or_init(|| {
        let gauge = IntGauge::new(
            "keyspace_blocking_active",
            "Number of keyspace operations currently running on blocking workers",
        )
        .expect("failed to build keyspace active gauge");
        register_collector(gauge)
    })
}

fn keyspace_blocking_wait() -> &'static HistogramVec {
    KEYSPACE_BLOCKING_WAIT.get_or_init(|| {
        let opts = HistogramOpts::new(
            "keyspace_blocking_wait_seconds",
            "Queue wait before a keyspace operation runs on a blocking worker",
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]);
        let histogram = HistogramVec::new(opts, &["operation"])
            .expect("failed to build keyspace wait histogram");
        register_collector(histogram)
    })
}

fn keyspace_blocking_run() -> &'static HistogramVec {
    KEYSPACE_BLOCKING_RUN.get_or_init(|| {
        let opts = HistogramOpts::new(
            "keyspace_blocking_run_seconds",
            "Execution time of keyspace operations on blocking workers",
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]);
        let histogram = HistogramVec::new(opts, &["operation"])
            .expect("failed to build keyspace run histogram");
        register_collector(histogram)
    })
}

pub fn record_driver_request(endpoint: &str, result: &str, elapsed: Duration) {
    driver_requests_total()
        .with_label_values(&[endpoint, result])
        .inc();
    driver_request_duration()
        .with_label_values(&[endpoint])
        .observe(elapsed.as_secs_f64());
}

pub fn record_fanout_task(operation: &str, result: &str) {
    fanout_tasks_total()
        .with_label_values(&[operation, result])
        .inc();
}

pub fn record_autocontrol_sweep(result: &str) {
    autocontrol_sweeps_total().with_label_values(&[result]).inc();
}

pub fn set_keyspace_blocking_queue(depth: usize) {
    keyspace_blocking_queue_depth().set(depth as i64);
}

pub fn set_keyspace_blocking_active(active: usize) {
    keyspace_blocking_active().set(active as i64);
}

pub fn observe_keyspace_blocking(operation: &str, queue_wait: Duration, run: Duration) {
    keyspace_blocking_wait()
        .with_label_values(&[operation])
        .observe(queue_wait.as_secs_f64());
    keyspace_blocking_run()
        .with_label_values(&[operation])
        .observe(run.as_secs_f64());
}

pub fn gather() -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_driver_counters() {
        record_driver_request("vm", "ok", Duration::from_millis(25));
        let encoded = gather().expect("metrics gather");
        let text = String::from_utf8(encoded).expect("metrics are utf8");
        assert!(text.contains("polycloud_driver_requests_total"));
    }
}
