//! Background task that owns sync pass lifetime

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{PassKey, PassReport, PassRunner};
use crate::models::{OwnerId, RecordKind};

const EVENT_CAPACITY: usize = 64;

enum Command {
    Pass(PassKey),
    Drain(oneshot::Sender<()>),
}

enum PassEnd {
    Finished(PassReport),
    Cancelled,
    Panicked,
}

/// Cloneable handle for requesting passes and observing their reports
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PassReport>,
    cancel: CancellationToken,
    stopped: watch::Receiver<bool>,
}

impl SyncHandle {
    /// Enqueue a pass for one (owner, kind) pair
    pub fn request(&self, owner: &OwnerId, kind: RecordKind) {
        let key = PassKey::new(owner.clone(), kind);
        if self.commands.send(Command::Pass(key)).is_err() {
            debug!(%owner, %kind, "scheduler stopped, pass request dropped");
        }
    }

    /// Reconnect/resume signal: enqueue a pass for every kind
    pub fn request_all(&self, owner: &OwnerId) {
        for kind in RecordKind::ALL {
            self.request(owner, kind);
        }
    }

    /// Reports of passes completed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PassReport> {
        self.events.subscribe()
    }

    /// Wait until every pass requested so far has completed
    pub async fn drain(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Drain(done)).is_err() {
            return;
        }
        wait.await.ok();
    }

    /// Whether the worker still accepts requests
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.commands.is_closed()
    }

    /// Cancel running passes and wait for the worker to stop
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut stopped = self.stopped.clone();
        // An Err means the worker is already gone
        stopped.wait_for(|stopped| *stopped).await.ok();
    }
}

/// Spawns the worker that runs passes requested through a [`SyncHandle`]
pub struct SyncScheduler;

impl SyncScheduler {
    /// Start the worker on the current tokio runtime.
    ///
    /// Cancelling `cancel` (or calling [`SyncHandle::shutdown`]) aborts running
    /// passes and stops the worker.
    pub fn spawn(
        runners: Vec<Arc<dyn PassRunner>>,
        cancel: CancellationToken,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stopped_tx, stopped) = watch::channel(false);

        let worker = Worker {
            runners: runners
                .into_iter()
                .map(|runner| (runner.kind(), runner))
                .collect(),
            events: events.clone(),
            cancel: cancel.clone(),
            running: HashSet::new(),
            rerun: HashSet::new(),
            drains: Vec::new(),
            tasks: JoinSet::new(),
        };
        let join = tokio::spawn(async move {
            worker.run(receiver).await;
            stopped_tx.send(true).ok();
        });

        (
            SyncHandle {
                commands,
                events,
                cancel,
                stopped,
            },
            join,
        )
    }
}

struct Worker {
    runners: HashMap<RecordKind, Arc<dyn PassRunner>>,
    events: broadcast::Sender<PassReport>,
    cancel: CancellationToken,
    running: HashSet<PassKey>,
    /// Pairs requested again while running; each re-runs once
    rerun: HashSet<PassKey>,
    drains: Vec<oneshot::Sender<()>>,
    tasks: JoinSet<(PassKey, PassEnd)>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut closed = false;
        loop {
            if closed && self.tasks.is_empty() {
                break;
            }
            tokio::select! {
                () = self.cancel.cancelled() => break,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok((key, end)) => self.finish(key, end),
                    Err(join_error) => error!(%join_error, "sync pass task failed"),
                },
                command = commands.recv(), if !closed => match command {
                    Some(Command::Pass(key)) => self.request(key),
                    Some(Command::Drain(done)) => self.drain(done),
                    None => closed = true,
                },
            }
        }

        self.tasks.shutdown().await;
        debug!("sync scheduler stopped");
    }

    fn request(&mut self, key: PassKey) {
        if self.running.contains(&key) {
            self.rerun.insert(key);
        } else {
            self.start(key);
        }
    }

    fn drain(&mut self, done: oneshot::Sender<()>) {
        if self.running.is_empty() {
            done.send(()).ok();
        } else {
            self.drains.push(done);
        }
    }

    fn start(&mut self, key: PassKey) {
        let Some(runner) = self.runners.get(&key.kind).cloned() else {
            warn!(%key, "no pass runner registered for kind");
            return;
        };
        let cancel = self.cancel.clone();
        self.running.insert(key.clone());
        self.tasks.spawn(async move {
            let end = {
                let pass = AssertUnwindSafe(runner.run_pass(&key.owner)).catch_unwind();
                tokio::select! {
                    () = cancel.cancelled() => PassEnd::Cancelled,
                    result = pass => result.map_or(PassEnd::Panicked, PassEnd::Finished),
                }
            };
            (key, end)
        });
    }

    fn finish(&mut self, key: PassKey, end: PassEnd) {
        self.running.remove(&key);
        match end {
            PassEnd::Finished(report) => {
                // No subscribers is fine
                self.events.send(report).ok();
            }
            PassEnd::Cancelled => debug!(%key, "sync pass cancelled"),
            PassEnd::Panicked => error!(%key, "sync pass panicked"),
        }

        if self.rerun.remove(&key) {
            self.start(key);
        }
        if self.running.is_empty() {
            for done in self.drains.drain(..) {
                done.send(()).ok();
            }
        }
    }
}
