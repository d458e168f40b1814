//! Visibility-aware recurring poller.
//!
//! A [`PollScheduler`] runs its task once on creation, then again every
//! `interval` while the host is visible. Hiding the host cancels the pending
//! timer; showing it again triggers an immediate catch-up run. Runs never
//! overlap: anything that arrives while a run is in progress (a manual
//! refresh, a visibility flip) is absorbed by that run and only considered
//! again once it completes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::utils::fmt_duration;

/// Default time between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Source of host visibility changes.
///
/// Only real transitions are published, so a subscriber that observes a
/// change ending in [`Visibility::Visible`] knows the host was hidden in between.
#[derive(Debug, Clone)]
pub struct VisibilitySource {
    tx: Arc<watch::Sender<Visibility>>,
}

impl VisibilitySource {
    pub fn new(initial: Visibility) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, visibility: Visibility) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
        if changed {
            debug!(?visibility, "host visibility changed");
        }
    }

    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> VisibilityWatch {
        VisibilityWatch(self.tx.subscribe())
    }
}

impl Default for VisibilitySource {
    fn default() -> Self {
        Self::new(Visibility::Visible)
    }
}

/// Receiving half of a [`VisibilitySource`].
///
/// Only obtainable through [`VisibilitySource::subscribe`], so every change it
/// reports is a real transition. Several transitions between two polls of the
/// receiver coalesce into one change carrying the latest value.
#[derive(Debug, Clone)]
pub struct VisibilityWatch(watch::Receiver<Visibility>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Not started yet, or shut down.
    Idle,
    /// Waiting for the interval timer.
    Scheduled,
    /// A run is in progress.
    Running,
    /// Host is hidden; no timer is armed.
    Paused,
}

/// Handle to a running poll loop. Dropping it stops the loop.
pub struct PollScheduler {
    name: &'static str,
    state_rx: watch::Receiver<SchedulerState>,
    completed_rx: watch::Receiver<u64>,
    refresh_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollScheduler {
    /// Spawn the poll loop. The first run starts immediately.
    pub fn spawn<F, Fut>(
        name: &'static str,
        interval: Duration,
        visibility: VisibilityWatch,
        task: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (completed_tx, completed_rx) = watch::channel(0u64);
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let poll_loop = PollLoop {
            name,
            interval,
            task,
            visibility: visibility.0,
            visibility_closed: false,
            refresh_rx,
            state_tx,
            completed_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(poll_loop.run());

        Self {
            name,
            state_rx,
            completed_rx,
            refresh_tx,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Number of runs that have completed so far.
    pub fn completed_runs(&self) -> u64 {
        *self.completed_rx.borrow()
    }

    /// Ask for a run without waiting for it.
    pub fn request_refresh(&self) {
        if self.refresh_tx.send(()).is_err() {
            debug!(scheduler = self.name, "refresh requested after shutdown");
        }
    }

    /// Ask for a run and wait until one completes.
    ///
    /// If a run is already in progress, this resolves when that run finishes
    /// instead of starting another.
    pub async fn refresh(&self) {
        let mut completed = self.completed_rx.clone();
        let seen = *completed.borrow_and_update();
        if self.refresh_tx.send(()).is_err() {
            return;
        }
        let _ = completed.wait_for(|runs| *runs > seen).await;
    }

    /// Stop the loop and wait for it to exit. An in-progress run is abandoned.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum RunOutcome {
    Completed,
    Cancelled,
}

struct PollLoop<F> {
    name: &'static str,
    interval: Duration,
    task: F,
    visibility: watch::Receiver<Visibility>,
    visibility_closed: bool,
    refresh_rx: mpsc::UnboundedReceiver<()>,
    state_tx: watch::Sender<SchedulerState>,
    completed_tx: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl<F, Fut> PollLoop<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(mut self) {
        info!(
            scheduler = self.name,
            interval = fmt_duration(self.interval),
            "poll scheduler started"
        );

        let mut next_run: Option<Instant> = None;
        let mut run_now = true;

        loop {
            if run_now {
                run_now = false;
                if let RunOutcome::Cancelled = self.run_once().await {
                    break;
                }
                next_run = self.after_run();
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep_until(next_run), if next_run.is_some() => {
                    trace!(scheduler = self.name, "interval elapsed");
                    run_now = true;
                }
                changed = self.visibility.changed(), if !self.visibility_closed => {
                    if changed.is_err() {
                        debug!(scheduler = self.name, "visibility source dropped, polling on timer only");
                        self.visibility_closed = true;
                        continue;
                    }
                    let visibility = *self.visibility.borrow_and_update();
                    match visibility {
                        Visibility::Hidden => {
                            if next_run.take().is_some() {
                                debug!(scheduler = self.name, "host hidden, pending poll cancelled");
                            }
                            self.state_tx.send_replace(SchedulerState::Paused);
                        }
                        Visibility::Visible => {
                            debug!(scheduler = self.name, "host visible again, catching up");
                            run_now = true;
                        }
                    }
                }
                Some(()) = self.refresh_rx.recv() => {
                    debug!(scheduler = self.name, "manual refresh");
                    run_now = true;
                }
            }
        }

        self.state_tx.send_replace(SchedulerState::Idle);
        info!(scheduler = self.name, "poll scheduler stopped");
    }

    /// Run the task to completion, absorbing refresh requests and visibility
    /// changes that arrive meanwhile.
    async fn run_once(&mut self) -> RunOutcome {
        self.state_tx.send_replace(SchedulerState::Running);
        let start = Instant::now();

        let run = (self.task)();
        tokio::pin!(run);

        loop {
            tokio::select! {
                _ = &mut run => break,
                _ = self.cancel.cancelled() => {
                    debug!(scheduler = self.name, "shutdown during run, abandoning it");
                    return RunOutcome::Cancelled;
                }
                Some(()) = self.refresh_rx.recv() => {
                    trace!(scheduler = self.name, "refresh requested while running, joining current run");
                }
                changed = self.visibility.changed(), if !self.visibility_closed => {
                    if changed.is_err() {
                        self.visibility_closed = true;
                    }
                }
            }
        }

        // Requests queued while the run finished are satisfied by it.
        while self.refresh_rx.try_recv().is_ok() {}

        self.completed_tx.send_modify(|runs| *runs += 1);
        trace!(
            scheduler = self.name,
            duration = fmt_duration(start.elapsed()),
            "poll run completed"
        );
        RunOutcome::Completed
    }

    /// Decide what follows a completed run based on current visibility.
    fn after_run(&mut self) -> Option<Instant> {
        let visibility = *self.visibility.borrow_and_update();
        match visibility {
            Visibility::Hidden => {
                self.state_tx.send_replace(SchedulerState::Paused);
                None
            }
            Visibility::Visible => {
                self.state_tx.send_replace(SchedulerState::Scheduled);
                Some(Instant::now() + self.interval)
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
