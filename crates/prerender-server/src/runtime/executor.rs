//! Job executor bridging boa's promise queue onto tokio.
//!
//! The sandbox schedules three kinds of work: promise microtasks, native
//! async jobs (resource and GraphQL fetches) and generic jobs. This executor
//! queues them and drains them on demand, polling native async jobs on the
//! surrounding tokio runtime so sandbox-initiated fetches make progress while
//! the orchestrator waits on the render promise.
//!
//! Draining preserves task semantics: at most one generic job per round
//! (macrotask), then all pending promise jobs (microtasks), then a yield back
//! to the scheduler.
//!
//! The render deadline is enforced here. The boa context cannot be held
//! across an `await`, so the orchestrator drives the queues through
//! [`SandboxJobExecutor::run_jobs_with_deadline`] and treats an expired
//! deadline as a render timeout.

use boa_engine::context::Context;
use boa_engine::job::{GenericJob, Job, JobExecutor, NativeAsyncJob, PromiseJob};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Result of driving the job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queue is empty; nothing in the sandbox can make progress.
    Completed,
    /// The deadline expired with jobs still pending.
    DeadlineExceeded,
}

pub struct SandboxJobExecutor {
    promise_jobs: RefCell<VecDeque<PromiseJob>>,
    async_jobs: RefCell<VecDeque<NativeAsyncJob>>,
    generic_jobs: RefCell<VecDeque<GenericJob>>,
}

impl SandboxJobExecutor {
    pub fn new() -> Self {
        Self {
            promise_jobs: RefCell::default(),
            async_jobs: RefCell::default(),
            generic_jobs: RefCell::default(),
        }
    }

    /// True if any queue holds pending work.
    pub fn has_pending_jobs(&self) -> bool {
        !self.promise_jobs.borrow().is_empty()
            || !self.async_jobs.borrow().is_empty()
            || !self.generic_jobs.borrow().is_empty()
    }

    /// Runs queued jobs until the queues drain or the deadline expires,
    /// blocking the current thread.
    pub fn run_jobs_with_deadline(
        self: &Rc<Self>,
        context: &mut Context,
        deadline: Instant,
    ) -> DrainOutcome {
        self.clone().block_on_jobs(context, Some(deadline))
    }

    fn block_on_jobs(
        self: Rc<Self>,
        context: &mut Context,
        deadline: Option<Instant>,
    ) -> DrainOutcome {
        if tokio::runtime::Handle::try_current().is_ok() {
            return tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async {
                    let local_set = tokio::task::LocalSet::new();
                    local_set
                        .run_until(self.drive(&RefCell::new(context), deadline))
                        .await
                })
            });
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("failed to build sandbox job runtime");

        tokio::task::LocalSet::new().block_on(&runtime, self.drive(&RefCell::new(context), deadline))
    }

    /// Polls native async jobs concurrently, draining microtasks between
    /// completions, until every queue is empty or the deadline passes.
    async fn drive(
        self: Rc<Self>,
        context: &RefCell<&mut Context>,
        deadline: Option<Instant>,
    ) -> DrainOutcome {
        use futures_concurrency::future::FutureGroup;
        use futures_lite::{StreamExt, future};

        let mut group = FutureGroup::new();

        loop {
            for job in std::mem::take(&mut *self.async_jobs.borrow_mut()) {
                group.insert(job.call(context));
            }

            if group.is_empty()
                && self.promise_jobs.borrow().is_empty()
                && self.generic_jobs.borrow().is_empty()
            {
                return DrainOutcome::Completed;
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return DrainOutcome::DeadlineExceeded;
                }
            }

            if let Some(Err(err)) = future::poll_once(group.next()).await.flatten() {
                tracing::error!("uncaught error in sandbox async job: {err}");
            }

            self.drain_jobs(&mut context.borrow_mut());

            if !group.is_empty()
                && self.promise_jobs.borrow().is_empty()
                && self.generic_jobs.borrow().is_empty()
            {
                // Only network-bound jobs remain; don't spin the CPU.
                tokio::time::sleep(Duration::from_micros(250)).await;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Runs one generic job and all pending promise jobs. Async jobs are
    /// polled separately in `drive`.
    fn drain_jobs(&self, context: &mut Context) {
        if let Some(generic) = self.generic_jobs.borrow_mut().pop_front() {
            if let Err(err) = generic.call(context) {
                tracing::error!("uncaught error in sandbox generic job: {err}");
            }
        }

        let jobs = std::mem::take(&mut *self.promise_jobs.borrow_mut());
        for job in jobs {
            if let Err(err) = job.call(context) {
                tracing::error!("uncaught error in sandbox promise job: {err}");
            }
        }

        context.clear_kept_objects();
    }
}

impl Default for SandboxJobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExecutor for SandboxJobExecutor {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(job) => self.promise_jobs.borrow_mut().push_back(job),
            Job::AsyncJob(job) => self.async_jobs.borrow_mut().push_back(job),
            Job::GenericJob(job) => self.generic_jobs.borrow_mut().push_back(job),
            _ => {
                // Host timers are gated in the bootstrap prelude; boa-level
                // timeout jobs never reach this executor.
                tracing::warn!("unsupported sandbox job type enqueued, ignoring");
            }
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> boa_engine::JsResult<()> {
        self.block_on_jobs(context, None);
        Ok(())
    }

    async fn run_jobs_async(
        self: Rc<Self>,
        context: &RefCell<&mut Context>,
    ) -> boa_engine::JsResult<()>
    where
        Self: Sized,
    {
        self.drive(context, None).await;
        Ok(())
    }
}
