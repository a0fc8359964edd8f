use crate::polycloud::logger::log_error;
use futures_util::future::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

const SCHEDULER_COMPONENT: &str = "scheduler";

pub type JobFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobResult {
    Stop,
    Continue,
}

#[derive(Clone)]
pub struct ScheduleContext {
    task_id: TaskId,
    label: &'static str,
    cancellation: CancellationToken,
}

impl ScheduleContext {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    #[cfg(test)]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[cfg(test)]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TaskId(u64);

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    next_id: AtomicU64,
}

#[derive(Clone, Debug)]
pub enum ScheduleSpec {
    Immediate {
        label: &'static str,
    },
    After {
        label: &'static str,
        delay: Duration,
    },
    Every {
        label: &'static str,
        period: Duration,
    },
}

type JobFn = dyn Fn(ScheduleContext) -> JobFuture + Send + Sync + 'static;

pub struct ScheduledTaskHandle {
    cancellation: CancellationToken,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn global() -> Scheduler {
        static INSTANCE: OnceLock<Scheduler> = OnceLock::new();
        INSTANCE
            .get_or_init(|| Scheduler {
                inner: Arc::new(SchedulerInner {
                    next_id: AtomicU64::new(1),
                }),
            })
            .clone()
    }

    pub fn schedule<F>(&self, spec: ScheduleSpec, job: F) -> ScheduledTaskHandle
    where
        F: Fn(ScheduleContext) -> JobFuture + Send + Sync + 'static,
    {
        let job = Arc::new(job) as Arc<JobFn>;
        let task_id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cancellation = CancellationToken::new();
        let join_handle = self.spawn_for_spec(task_id, &cancellation, spec, job);
        ScheduledTaskHandle {
            cancellation,
            join: Arc::new(Mutex::new(Some(join_handle))),
        }
    }

    fn spawn_for_spec(
        &self,
        task_id: TaskId,
        cancellation: &CancellationToken,
        spec: ScheduleSpec,
        job: Arc<JobFn>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        let cancellation = cancellation.clone();

        match spec {
            ScheduleSpec::Immediate { label } => {
                let ctx = ScheduleContext::new(task_id, label, cancellation.clone());
                tokio::spawn(async move {
                    scheduler.run_job(job, ctx).await;
                })
            }
            ScheduleSpec::After { label, delay } => {
                self.spawn_after(task_id, cancellation, label, delay, job)
            }
            ScheduleSpec::Every { label, period } => {
                self.spawn_every(task_id, cancellation, label, period, job)
            }
        }
    }

    async fn run_job(&self, job: Arc<JobFn>, ctx: ScheduleContext) -> JobResult {
        if ctx.cancellation.is_cancelled() {
            return JobResult::Stop;
        }

        AssertUnwindSafe((job.clone())(ctx.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                log_error(
                    SCHEDULER_COMPONENT,
                    "Scheduled task panicked; stopping task",
                    &[
                        ("task_id", &format!("{:?}", ctx.task_id)),
                        ("label", ctx.label),
                    ],
                );
                JobResult::Stop
            })
    }

    fn spawn_after(
        &self,
        task_id: TaskId,
        cancellation: CancellationToken,
        label: &'static str,
        delay: Duration,
        job: Arc<JobFn>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let sleeper = time::sleep(delay);
            tokio::pin!(sleeper);
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = sleeper.as_mut() => {}
            }

            if cancellation.is_cancelled() {
                return;
            }

            let ctx = ScheduleContext::new(task_id, label, cancellation.clone());
            let _ = scheduler.run_job(job, ctx).await;
        })
    }

    fn spawn_every(
        &self,
        task_id: TaskId,
        cancellation: CancellationToken,
        label: &'static str,
        period: Duration,
        job: Arc<JobFn>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                let sleeper = time::sleep(period);
                tokio::pin!(sleeper);
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = sleeper.as_mut() => {}
                }

                if cancellation.is_cancelled() {
                    break;
                }

                let ctx = ScheduleContext::new(task_id, label, cancellation.clone());
                let result = scheduler.run_job(job.clone(), ctx).await;
                if matches!(result, JobResult::Stop) {
                    break;
                }
            }
        })
    }
}

impl ScheduleContext {
    fn new(task_id: TaskId, label: &'static str, cancellation: CancellationToken) -> Self {
        ScheduleContext {
            task_id,
            label,
            cancellation,
        }
    }
}

impl ScheduledTaskHandle {
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn abort(&self) {
        if let Some(handle) = self
            .join
            .lock()
            .expect("scheduler join lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    pub fn cancel_and_abort(&self) {
        self.cancel();
        self.abort();
    }

    #[cfg(test)]
    pub async fn join(&self) -> Result<(), tokio::task::JoinError> {
        let maybe_handle = self
            .join
            .lock()
            .expect("scheduler join lock poisoned")
            .take();
        if let Some(handle) = maybe_handle {
            handle.await.map(|_| ())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time;

    #[tokio::test]
    async fn immediate_task_executes() {
        let scheduler = Scheduler::global();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        scheduler.schedule(ScheduleSpec::Immediate { label: "immediate" }, move |ctx| {
            let counter = counter_clone.clone();
            Box::pin(async move {
                assert_eq!(ctx.label(), "immediate");
                let _ = ctx.task_id();
                counter.fetch_add(1, Ordering::SeqCst);
                JobResult::Stop
            })
        });

        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delayed_task_executes() {
        let scheduler = Scheduler::global();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        scheduler.schedule(
            ScheduleSpec::After {
                label: "delayed",
                delay: Duration::from_millis(50),
            },
            move |ctx| {
                let counter = counter_clone.clone();
                Box::pin(async move {
                    assert_eq!(ctx.label(), "delayed");
                    counter.fetch_add(1, Ordering::SeqCst);
                    JobResult::Stop
                })
            },
        );

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn periodic_task_repeats_until_stopped() {
        let scheduler = Scheduler::global();
        let executions = Arc::new(AtomicUsize::new(0));
        let executions_clone = executions.clone();

        let handle = scheduler.schedule(
            ScheduleSpec::Every {
                label: "periodic",
                period: Duration::from_millis(20),
            },
            move |_ctx| {
                let executions = executions_clone.clone();
                Box::pin(async move {
                    let count = executions.fetch_add(1, Ordering::SeqCst) + 1;
                    if count >= 3 {
                        JobResult::Stop
                    } else {
                        JobResult::Continue
                    }
                })
            },
        );

        time::sleep(Duration::from_millis(300)).await;
        handle.cancel_and_abort();
        assert!(executions.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn cancelled_task_never_runs() {
        let scheduler = Scheduler::global();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let handle = scheduler.schedule(
            ScheduleSpec::After {
                label: "cancelled",
                delay: Duration::from_millis(50),
            },
            move |_ctx| {
                let counter = counter_clone.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    JobResult::Stop
                })
            },
        );

        handle.cancel();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
