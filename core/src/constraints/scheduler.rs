//! Deferred, coalesced auto-runs.
//!
//! History mutations only *request* a run. A single [`AutoRunner`] task
//! waits for requests and executes at most one run at a time; any number
//! of requests that arrive while a run is in flight collapse into one
//! trailing run. Each run is cancelled through its own token.

use super::history::ConstraintHistory;
use super::hooks::RunHooks;
use super::solver::{run_all, CancelToken, RunOptions, RunReport};
use crate::scene::SceneAdapter;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct RunFlags {
    in_flight: bool,
    pending: bool,
    /// Options for the next run; the latest explicit request wins.
    overrides: Option<RunOptions>,
}

/// In-flight guard plus a "pending once" flag.
#[derive(Debug, Default)]
pub struct RunScheduler {
    flags: Mutex<RunFlags>,
    wake: Notify,
}

impl RunScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, RunFlags> {
        self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn request(&self) {
        self.flags().pending = true;
        self.wake.notify_one();
    }

    /// Requests a run with explicit options. Overrides queued while a run
    /// is in flight are kept until the trailing run claims them.
    pub fn request_with(&self, options: RunOptions) {
        {
            let mut flags = self.flags();
            flags.pending = true;
            flags.overrides = Some(options);
        }
        self.wake.notify_one();
    }

    /// Claims the in-flight slot if a request is pending and no run is
    /// active. Consumes the pending request and returns the options the
    /// run should use: queued overrides, else `defaults`.
    pub fn begin(&self, defaults: &RunOptions) -> Option<RunOptions> {
        let mut flags = self.flags();
        if flags.in_flight || !flags.pending {
            return None;
        }
        flags.in_flight = true;
        flags.pending = false;
        Some(flags.overrides.take().unwrap_or_else(|| defaults.clone()))
    }

    /// Releases the in-flight slot. Returns true when a trailing run was
    /// requested meanwhile.
    pub fn finish(&self) -> bool {
        let mut flags = self.flags();
        flags.in_flight = false;
        let trailing = flags.pending;
        drop(flags);
        if trailing {
            self.wake.notify_one();
        }
        trailing
    }

    pub fn is_in_flight(&self) -> bool {
        self.flags().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.flags().pending
    }

    fn is_ready(&self) -> bool {
        let flags = self.flags();
        flags.pending && !flags.in_flight
    }

    pub async fn wait_for_request(&self) {
        loop {
            let notified = self.wake.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }
}

/// A history together with the scene it constrains.
#[derive(Debug)]
pub struct AssemblySession<S> {
    pub history: ConstraintHistory,
    pub scene: S,
}

impl<S: SceneAdapter> AssemblySession<S> {
    pub fn new(history: ConstraintHistory, scene: S) -> Self {
        Self { history, scene }
    }

    pub async fn run(&mut self, options: &RunOptions, hooks: &dyn RunHooks, cancel: &CancelToken) -> RunReport {
        run_all(&mut self.history, &mut self.scene, options, hooks, cancel).await
    }
}

/// Background task executing scheduled runs against a shared session.
#[derive(Debug)]
pub struct AutoRunner {
    handle: JoinHandle<()>,
    /// Token of the current (or last) run. Every run gets a fresh one.
    current: Arc<Mutex<CancelToken>>,
}

fn current_token(slot: &Mutex<CancelToken>) -> MutexGuard<'_, CancelToken> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AutoRunner {
    /// Attaches `scheduler` to the session's history and spawns the run
    /// loop. Finished reports are forwarded to `reports` when given.
    pub async fn spawn<S>(
        session: Arc<tokio::sync::Mutex<AssemblySession<S>>>,
        scheduler: Arc<RunScheduler>,
        options: RunOptions,
        hooks: Arc<dyn RunHooks>,
        reports: Option<UnboundedSender<RunReport>>,
    ) -> Self
    where
        S: SceneAdapter + 'static,
    {
        session.lock().await.history.attach_scheduler(scheduler.clone());
        Self::spawn_detached(session, scheduler, options, hooks, reports)
    }

    /// Spawns the run loop without attaching the scheduler, so history
    /// edits do not trigger runs. Runs start only on explicit requests.
    pub fn spawn_detached<S>(
        session: Arc<tokio::sync::Mutex<AssemblySession<S>>>,
        scheduler: Arc<RunScheduler>,
        options: RunOptions,
        hooks: Arc<dyn RunHooks>,
        reports: Option<UnboundedSender<RunReport>>,
    ) -> Self
    where
        S: SceneAdapter + 'static,
    {
        let current = Arc::new(Mutex::new(CancelToken::new()));
        let slot = current.clone();
        let handle = tokio::spawn(async move {
            loop {
                scheduler.wait_for_request().await;
                // Let edits issued back to back land before the run starts.
                tokio::task::yield_now().await;

                // Install the token before claiming the slot so a cancel
                // issued once the run is in flight always reaches it.
                let token = CancelToken::new();
                *current_token(&slot) = token.clone();
                let Some(run_options) = scheduler.begin(&options) else {
                    continue;
                };

                let report = {
                    let mut guard = session.lock().await;
                    guard.run(&run_options, hooks.as_ref(), &token).await
                };

                if scheduler.finish() {
                    debug!("trailing run queued");
                }
                if let Some(tx) = &reports {
                    if tx.send(report).is_err() {
                        debug!("run report receiver dropped");
                    }
                }
            }
        });

        Self { handle, current }
    }

    /// Cancels the run in progress, if any.
    pub fn cancel(&self) {
        current_token(&self.current).cancel();
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for AutoRunner {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
