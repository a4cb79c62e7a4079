//! The set of live virtual users and their start/stop transitions.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::aggregator::Aggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VuId(pub u64);

impl fmt::Display for VuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VU {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Received by a worker; resolves when the pool wants it gone. A dropped
/// sender counts as a stop too.
pub type StopSignal = oneshot::Receiver<()>;

/// Builds the loop body of one virtual user. The pool spawns it.
pub trait WorkerFactory: Send + Sync {
    fn worker(&self, id: VuId, stop: StopSignal) -> impl Future<Output = ()> + Send + 'static;
}

impl<F: WorkerFactory> WorkerFactory for Arc<F> {
    fn worker(&self, id: VuId, stop: StopSignal) -> impl Future<Output = ()> + Send + 'static {
        (**self).worker(id, stop)
    }
}

#[derive(Debug)]
pub struct VirtualUser {
    id: VuId,
    state: VuState,
    stop_tx: Option<oneshot::Sender<()>>,
    stop_requested: Option<Instant>,
    /// Set by the task on its first poll.
    polled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl VirtualUser {
    pub fn id(&self) -> VuId {
        self.id
    }

    pub fn state(&self) -> VuState {
        self.state
    }

    /// With no graceful ramp-down the task is aborted outright, so whatever
    /// it was awaiting is dropped at once.
    fn request_stop(&mut self, grace: Duration) {
        self.state = VuState::Stopping;
        self.stop_requested = Some(Instant::now());
        if let Some(tx) = self.stop_tx.take() {
            // The worker may already be gone.
            let _ = tx.send(());
        }
        if grace.is_zero() {
            self.task.abort();
        }
    }
}

/// Outcome of one `scale_to` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScaleChange {
    pub started: Vec<VuId>,
    pub stopped: Vec<VuId>,
}

impl ScaleChange {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Owns every virtual user. Active users are kept in start order so the
/// oldest ones are stopped first when scaling down. Stopped users are kept
/// around so their final state stays queryable.
pub struct VuPool<F> {
    factory: F,
    aggregator: Arc<Aggregator>,
    graceful_ramp_down: Duration,
    active: VecDeque<VirtualUser>,
    stopping: Vec<VirtualUser>,
    stopped: Vec<VirtualUser>,
    next_id: u64,
}

impl<F: WorkerFactory> VuPool<F> {
    pub fn new(factory: F, aggregator: Arc<Aggregator>, graceful_ramp_down: Duration) -> Self {
        Self {
            factory,
            aggregator,
            graceful_ramp_down,
            active: VecDeque::new(),
            stopping: Vec::new(),
            stopped: Vec::new(),
            next_id: 0,
        }
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn stopping(&self) -> usize {
        self.stopping.len()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.len()
    }

    pub fn active_ids(&self) -> Vec<VuId> {
        self.active.iter().map(VirtualUser::id).collect()
    }

    pub fn state_of(&self, id: VuId) -> Option<VuState> {
        self.active
            .iter()
            .chain(&self.stopping)
            .chain(&self.stopped)
            .find(|vu| vu.id == id)
            .map(VirtualUser::state)
    }

    /// Starts or stops virtual users until `desired` are active.
    pub fn scale_to(&mut self, desired: usize) -> ScaleChange {
        let mut change = ScaleChange::default();

        while self.active.len() < desired {
            change.started.push(self.start_one());
        }

        while self.active.len() > desired {
            let Some(mut vu) = self.active.pop_front() else {
                break;
            };
            vu.request_stop(self.graceful_ramp_down);
            debug!("{} stopping", vu.id);
            change.stopped.push(vu.id);
            self.stopping.push(vu);
        }

        self.aggregator.set_active_vus(self.active.len());
        change
    }

    fn start_one(&mut self) -> VuId {
        let id = VuId(self.next_id);
        self.next_id += 1;

        let (stop_tx, stop_rx) = oneshot::channel();
        let polled = Arc::new(AtomicBool::new(false));
        let worker = self.factory.worker(id, stop_rx);
        let task = tokio::spawn({
            let polled = Arc::clone(&polled);
            async move {
                polled.store(true, Ordering::Release);
                worker.await;
            }
        });
        debug!("{} starting", id);

        self.aggregator.record_vu_started();
        self.active.push_back(VirtualUser {
            id,
            state: VuState::Starting,
            stop_tx: Some(stop_tx),
            stop_requested: None,
            polled,
            task,
        });
        id
    }

    /// Promotes started workers to `Running`, marks exited ones as stopped
    /// and aborts the ones that outlived the graceful ramp-down window.
    /// Returns how many reached `Stopped`.
    pub fn reap(&mut self) -> usize {
        for vu in self.active.iter_mut() {
            if vu.state == VuState::Starting && vu.polled.load(Ordering::Acquire) {
                vu.state = VuState::Running;
                debug!("{} running", vu.id);
            }
        }

        let grace = self.graceful_ramp_down;
        let mut still_stopping = Vec::with_capacity(self.stopping.len());
        let mut reaped = 0;

        for mut vu in std::mem::take(&mut self.stopping) {
            if vu.task.is_finished() {
                self.retire(&mut vu);
                self.stopped.push(vu);
                reaped += 1;
                continue;
            }

            let overdue = vu
                .stop_requested
                .is_some_and(|requested| requested.elapsed() >= grace);
            if overdue && !grace.is_zero() {
                warn!("{} did not stop within {:?}, aborting", vu.id, grace);
                vu.task.abort();
            }
            still_stopping.push(vu);
        }

        self.stopping = still_stopping;
        reaped
    }

    fn retire(&self, vu: &mut VirtualUser) {
        vu.state = VuState::Stopped;
        self.aggregator.record_vu_stopped();
        debug!("{} stopped", vu.id);
    }

    /// Waits until every stopping worker has exited, aborting any still
    /// running once the graceful ramp-down window has passed.
    pub async fn drain_stopping(&mut self) {
        let grace = self.graceful_ramp_down;
        let stopping = std::mem::take(&mut self.stopping);

        let waits = stopping.into_iter().map(|mut vu| async move {
            let remaining = vu
                .stop_requested
                .map(|requested| grace.saturating_sub(requested.elapsed()))
                .unwrap_or(grace);

            if tokio::time::timeout(remaining, &mut vu.task).await.is_err() {
                if !grace.is_zero() {
                    warn!("{} did not stop within {:?}, aborting", vu.id, grace);
                }
                vu.task.abort();
                let _ = (&mut vu.task).await;
            }

            vu
        });

        for mut vu in join_all(waits).await {
            self.retire(&mut vu);
            self.stopped.push(vu);
        }
    }

    /// Stops every virtual user and waits until all of them are `Stopped`.
    pub async fn shutdown(&mut self) {
        self.scale_to(0);
        self.drain_stopping().await;
    }
}
