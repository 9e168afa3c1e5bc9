//! Sync scheduler.
//!
//! A single worker task owns every sync job, so at most one push cycle is in
//! flight. Jobs are triggered periodically or on demand; on-demand requests
//! coalesce through a [`Notify`] permit, so any number of requests made
//! before a job starts collapse into that one job.
//!
//! ```text
//! Pending --online--> Running --ok--> Success
//!                        |
//!                        +--failures, attempts left--> RetryScheduled --backoff--> Running
//!                        +--failures, no attempts left--> Failed
//! ```

use crate::config::SyncSettings;
use crate::push::{PushReport, PushSynchronizer};
use crate::remote::Connectivity;
use crate::TenantContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a job was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for connectivity.
    Pending,
    Running { attempt: u32 },
    RetryScheduled { attempt: u32, delay: Duration },
    Success(PushReport),
    Failed { attempts: u32 },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success(_) | JobState::Failed { .. })
    }
}

/// Latest job, as published on the status channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub job_id: u64,
    pub trigger: Trigger,
    pub state: JobState,
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`,
/// capped at `max`.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    const MAX_EXPONENT: u32 = 16;
    let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
    base.saturating_mul(1 << exponent).min(max)
}

#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    push: Arc<PushSynchronizer>,
    connectivity: Arc<dyn Connectivity>,
    requested: Notify,
    status: watch::Sender<Option<JobStatus>>,
    jobs: AtomicU64,
    interval: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    max_backoff: Duration,
    connectivity_poll: Duration,
}

impl SyncScheduler {
    pub fn new(push: Arc<PushSynchronizer>, connectivity: Arc<dyn Connectivity>, settings: &SyncSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                push,
                connectivity,
                requested: Notify::new(),
                status: watch::channel(None).0,
                jobs: AtomicU64::new(0),
                interval: settings.interval,
                max_attempts: settings.max_job_attempts.max(1),
                backoff_base: settings.backoff_base,
                max_backoff: settings.max_backoff,
                connectivity_poll: settings.connectivity_poll,
            }),
        }
    }

    /// Request a sync as soon as possible.
    ///
    /// Replaces any request that has not started yet instead of queuing
    /// another job.
    pub fn trigger_now(&self) {
        self.inner.requested.notify_one();
    }

    /// Watch the latest job's status.
    pub fn status(&self) -> watch::Receiver<Option<JobStatus>> {
        self.inner.status.subscribe()
    }

    /// Jobs started since the scheduler was created.
    pub fn jobs_started(&self) -> u64 {
        self.inner.jobs.load(Ordering::SeqCst)
    }

    /// Start the worker for a tenant session.
    pub fn spawn(&self, ctx: TenantContext, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(ctx, cancel).await })
    }

    async fn run(&self, ctx: TenantContext, cancel: CancellationToken) {
        let period = self.inner.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tenant = %ctx.tenant_id(), interval = ?period, "sync scheduler started");

        loop {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.inner.requested.notified() => Trigger::Immediate,
                _ = ticker.tick() => Trigger::Periodic,
            };

            let job_id = self.inner.jobs.fetch_add(1, Ordering::SeqCst) + 1;
            self.publish(job_id, trigger, JobState::Pending);

            if !self.wait_for_connectivity(job_id, &cancel).await {
                break;
            }
            let state = self.run_job(&ctx, job_id, trigger, &cancel).await;
            debug!(job = job_id, ?trigger, ?state, "sync job finished");
        }

        info!(tenant = %ctx.tenant_id(), "sync scheduler stopped");
    }

    /// Hold a pending job until the device is online. Requests arriving
    /// meanwhile fold into it. Returns `false` when cancelled.
    async fn wait_for_connectivity(&self, job_id: u64, cancel: &CancellationToken) -> bool {
        let mut logged = false;
        loop {
            if self.inner.connectivity.is_online().await {
                return true;
            }
            if !logged {
                debug!(job = job_id, "offline, sync job waiting for connectivity");
                logged = true;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = self.inner.requested.notified() => {}
                _ = tokio::time::sleep(self.inner.connectivity_poll) => {}
            }
        }
    }

    /// Run one job to a terminal state.
    async fn run_job(&self, ctx: &TenantContext, job_id: u64, trigger: Trigger, cancel: &CancellationToken) -> JobState {
        let mut attempt = 1;
        loop {
            self.publish(job_id, trigger, JobState::Running { attempt });

            match self.inner.push.run_cycle(ctx).await {
                Ok(report) if !report.has_failures() => {
                    let state = JobState::Success(report);
                    self.publish(job_id, trigger, state.clone());
                    return state;
                }
                Ok(report) => {
                    warn!(job = job_id, attempt, failed = report.failed, "sync job had failures");
                }
                Err(e) => {
                    error!(job = job_id, attempt, error = %e, "sync job failed");
                }
            }

            if attempt >= self.inner.max_attempts {
                let state = JobState::Failed { attempts: attempt };
                self.publish(job_id, trigger, state.clone());
                return state;
            }

            let delay = backoff_delay(self.inner.backoff_base, attempt, self.inner.max_backoff);
            self.publish(job_id, trigger, JobState::RetryScheduled { attempt, delay });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let state = JobState::Failed { attempts: attempt };
                    self.publish(job_id, trigger, state.clone());
                    return state;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn publish(&self, job_id: u64, trigger: Trigger, state: JobState) {
        self.inner.status.send_replace(Some(JobStatus {
            job_id,
            trigger,
            state,
        }));
    }
}
