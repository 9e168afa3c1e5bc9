//! Tenant session runtime.
//!
//! Owns the background tasks of one tenant session: the scheduler worker
//! and the realtime reconciler. Starting a session for another tenant, or
//! ending the session, cancels both and waits for them before returning.

use crate::config::SyncSettings;
use crate::push::{PushReport, PushSynchronizer};
use crate::queue::MutationQueue;
use crate::realtime::RealtimeReconciler;
use crate::remote::{ChangeFeed, Connectivity, RemoteStore};
use crate::scheduler::{JobStatus, SyncScheduler};
use crate::store::LocalStore;
use crate::tracker::ChangeTracker;
use crate::{Result, TenantContext};
use std::sync::Arc;
use tabsync_engine::AdapterRegistry;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Collaborators the runtime is assembled from.
#[derive(Clone)]
pub struct SyncServices {
    pub store: Arc<dyn LocalStore>,
    pub queue: Arc<dyn MutationQueue>,
    pub remote: Arc<dyn RemoteStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub connectivity: Arc<dyn Connectivity>,
    pub registry: Arc<AdapterRegistry>,
}

struct Session {
    ctx: TenantContext,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SyncRuntime {
    push: Arc<PushSynchronizer>,
    reconciler: Arc<RealtimeReconciler>,
    scheduler: SyncScheduler,
    tracker: ChangeTracker,
    session: Mutex<Option<Session>>,
}

impl SyncRuntime {
    pub fn new(services: SyncServices, settings: &SyncSettings) -> Self {
        let push = Arc::new(PushSynchronizer::new(
            services.store.clone(),
            services.queue.clone(),
            services.remote.clone(),
            services.connectivity.clone(),
            services.registry.clone(),
            settings,
        ));
        let reconciler = Arc::new(RealtimeReconciler::new(
            services.store.clone(),
            services.queue.clone(),
            services.remote,
            services.feed,
            services.registry,
            settings,
        ));
        let scheduler = SyncScheduler::new(push.clone(), services.connectivity, settings);

        Self {
            push,
            reconciler,
            scheduler,
            tracker: ChangeTracker::new(services.store, services.queue),
            session: Mutex::new(None),
        }
    }

    /// Start syncing for `ctx`, ending any session that is running.
    ///
    /// Kicks off an immediate sync so queued writes go out right away.
    pub async fn start_session(&self, ctx: TenantContext) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            Self::shutdown(previous).await;
        }

        let cancel = CancellationToken::new();
        let tasks = vec![
            self.scheduler.spawn(ctx.clone(), cancel.child_token()),
            self.reconciler.clone().spawn(ctx.clone(), cancel.child_token()),
        ];
        info!(tenant = %ctx.tenant_id(), "sync session started");
        self.scheduler.trigger_now();

        *session = Some(Session { ctx, cancel, tasks });
    }

    /// Move the session to another tenant.
    pub async fn switch_tenant(&self, ctx: TenantContext) {
        self.start_session(ctx).await;
    }

    /// Stop the session's tasks and wait for them to finish.
    pub async fn end_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            Self::shutdown(session).await;
        }
    }

    async fn shutdown(session: Session) {
        session.cancel.cancel();
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "sync task ended abnormally");
            }
        }
        info!(tenant = %session.ctx.tenant_id(), "sync session ended");
    }

    /// Tenant of the running session.
    pub async fn current_tenant(&self) -> Option<TenantContext> {
        self.session.lock().await.as_ref().map(|s| s.ctx.clone())
    }

    /// Request an immediate sync of the running session.
    pub fn trigger_sync(&self) {
        self.scheduler.trigger_now();
    }

    /// Run one push cycle inline, outside the scheduler.
    pub async fn sync_once(&self, ctx: &TenantContext) -> Result<PushReport> {
        self.push.run_cycle(ctx).await
    }

    pub fn status(&self) -> watch::Receiver<Option<JobStatus>> {
        self.scheduler.status()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Write path for local changes.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }
}
