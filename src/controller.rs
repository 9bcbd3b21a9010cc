//! Rotation handling: turns directory events into session lifecycle changes.
//!
//! The controller owns the single active [`TailSession`]. Deletes give the
//! active session a grace period to drain, creates start a new generation
//! from offset zero, and an overflowed event queue forces a clean restart
//! because intervening creates or deletes may have been lost.

use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::session::TailSession;
use crate::sink::SharedSink;
use crate::watcher::{FileWatcher, WatchEvent, WatchEventKind};
use futures::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

#[derive(Default)]
struct ShutdownSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Stops a running controller from any task, e.g. a Ctrl-C handler.
#[derive(Clone)]
pub struct ControllerHandle {
    signal: Arc<ShutdownSignal>,
}

impl ControllerHandle {
    /// Requests shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.signal.request();
    }

    pub fn is_shutdown(&self) -> bool {
        self.signal.is_requested()
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The active generation plus older ones still draining after a rotation.
struct Generations {
    active: TailSession,
    draining: Vec<TailSession>,
}

impl Generations {
    /// Stops every session and waits for all of them, returning the first failure.
    async fn shutdown_all(&mut self) -> Result<()> {
        self.active.shutdown();
        for session in &self.draining {
            session.shutdown();
        }

        let sessions = std::iter::once(&mut self.active).chain(self.draining.iter_mut());
        let results = futures::future::join_all(sessions.map(|session| session.join())).await;
        results.into_iter().collect()
    }
}

/// Follows one file across rotations.
pub struct RotationController {
    config: TailConfig,
    sink: SharedSink,
    shutdown: Arc<ShutdownSignal>,
}

impl RotationController {
    pub fn new(config: TailConfig, sink: SharedSink) -> Self {
        Self {
            config,
            sink,
            shutdown: Arc::new(ShutdownSignal::default()),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            signal: self.shutdown.clone(),
        }
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// Watches the target's directory and follows the file until shutdown.
    ///
    /// # Errors
    ///
    /// Returns startup failures (missing target, locked position record),
    /// watcher failures, and the first unrecoverable session failure.
    pub async fn run(self) -> Result<()> {
        let mut watcher = FileWatcher::new(self.config.target().parent())?;
        watcher.start_watching()?;
        info!(directory = %watcher.directory().display(), "watching directory");
        self.drive(watcher).await
    }

    /// Like [`run`](Self::run), but driven by any stream of classified events.
    pub async fn drive<S>(self, mut events: S) -> Result<()>
    where
        S: Stream<Item = Result<WatchEvent>> + Unpin,
    {
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
        let first = self.start_session(self.config.is_reset(), &failures_tx).await?;
        let mut generations = Generations {
            active: first,
            draining: Vec::new(),
        };

        let outcome = self
            .watch(&mut events, &mut generations, &failures_tx, &mut failures_rx)
            .await;
        let stopped = generations.shutdown_all().await;
        debug!("all sessions stopped");

        outcome?;
        stopped?;
        // A session may have failed during its final drain.
        match failures_rx.try_recv() {
            Ok(failure) => Err(failure),
            Err(_) => Ok(()),
        }
    }

    async fn watch<S>(
        &self,
        events: &mut S,
        generations: &mut Generations,
        failures_tx: &mpsc::UnboundedSender<Error>,
        failures_rx: &mut mpsc::UnboundedReceiver<Error>,
    ) -> Result<()>
    where
        S: Stream<Item = Result<WatchEvent>> + Unpin,
    {
        loop {
            if self.shutdown.is_requested() {
                info!("shutdown requested");
                return Ok(());
            }

            tokio::select! {
                _ = self.shutdown.notify.notified() => {}
                Some(failure) = failures_rx.recv() => return Err(failure),
                event = events.next() => match event {
                    None => {
                        info!("event stream closed");
                        return Ok(());
                    }
                    Some(Err(error)) => return Err(error),
                    Some(Ok(event)) => {
                        if let Flow::Stop = self.dispatch(event, generations, failures_tx).await? {
                            return Ok(());
                        }
                    }
                },
            }
        }
    }

    async fn dispatch(
        &self,
        event: WatchEvent,
        generations: &mut Generations,
        failures: &mpsc::UnboundedSender<Error>,
    ) -> Result<Flow> {
        generations.draining.retain(|session| !session.is_finished());
        let target = self.config.target();
        let grace = self.config.grace_period();

        match event.kind {
            WatchEventKind::Modify => generations.active.handle_modify_event(event.name()),
            WatchEventKind::Delete if target.is_target_event(event.name()) => {
                info!(session = generations.active.id(), ?grace, "target deleted, draining");
                release_position(&generations.active);
                generations.active.shutdown_later(grace);
            }
            WatchEventKind::Create if target.is_target_event(event.name()) => {
                // The old generation's record must be unlocked before the new one takes it.
                release_position(&generations.active);
                let next = self.start_session(true, failures).await?;
                let previous = std::mem::replace(&mut generations.active, next);
                info!(
                    previous = previous.id(),
                    session = generations.active.id(),
                    "target recreated, following new generation"
                );
                previous.shutdown_later(grace);
                generations.draining.push(previous);
            }
            WatchEventKind::Overflow => {
                warn!(session = generations.active.id(), "event queue overflowed, restarting session");
                generations.active.handle_modify_event(None);
                generations.active.shutdown();
                generations.active.join().await?;
                generations.active = self.start_session(true, failures).await?;
            }
            WatchEventKind::Invalidated => {
                warn!(directory = %target.parent().display(), "watched directory is no longer accessible");
                return Ok(Flow::Stop);
            }
            WatchEventKind::Create | WatchEventKind::Delete => {
                trace!(?event, "ignoring event for another file");
            }
        }

        Ok(Flow::Continue)
    }

    async fn start_session(
        &self,
        reset: bool,
        failures: &mpsc::UnboundedSender<Error>,
    ) -> Result<TailSession> {
        let config = self.config.clone().reset(reset);
        TailSession::start_supervised(&config, self.sink.clone(), failures.clone()).await
    }
}

/// Unlocks a session's position record. The descriptor still releases the
/// lock when the session ends, so a failure here is not fatal.
fn release_position(session: &TailSession) {
    if let Err(error) = session.handle_delete_event() {
        warn!(session = session.id(), %error, "failed to release position record");
    }
}
