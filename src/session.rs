//! One generation of the followed file.
//!
//! A [`TailSession`] owns a task that holds one open handle to the target and
//! runs the wait-read-decode-write-persist loop. The task is woken through a
//! [`SessionControl`], which is cheap to clone and safe to use from any task.

use crate::config::{TailConfig, TargetFile};
use crate::error::{Error, Result};
use crate::position::PositionStore;
use crate::reader::{StreamDecoder, detect_file_truncation};
use crate::sink::{SharedSink, is_sink_closed};
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct SessionShared {
    id: u64,
    target: TargetFile,
    /// Holds at most one permit, so bursts of modify events coalesce into one pass.
    signal: Notify,
    stopped: AtomicBool,
    position: Mutex<PositionStore>,
}

/// Control surface of a running session.
#[derive(Clone)]
pub struct SessionControl {
    shared: Arc<SessionShared>,
}

impl SessionControl {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Wakes the session if the event names the target (or names nothing).
    pub fn handle_modify_event(&self, name: Option<&Path>) {
        if self.shared.target.is_target_event(name) {
            trace!(session = self.shared.id, "modify signalled");
            self.shared.signal.notify_one();
        }
    }

    /// Releases the position record so a successor can lock it.
    ///
    /// Reading continues through the already-open handle until shutdown.
    pub fn handle_delete_event(&self) -> std::io::Result<()> {
        debug!(session = self.shared.id, "target deleted, releasing position record");
        self.position().close()
    }

    /// Asks the loop to stop after its next wake-up. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            debug!(session = self.shared.id, "shutdown requested");
        }
        self.shared.signal.notify_one();
    }

    /// Calls [`shutdown`](Self::shutdown) after `delay`, unless already shut down.
    pub fn shutdown_later(&self, delay: Duration) {
        if self.is_shutdown() {
            return;
        }
        debug!(session = self.shared.id, ?delay, "shutdown scheduled");
        let control = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            control.shutdown();
        });
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    fn read_position(&self, current: u64) -> std::io::Result<u64> {
        self.position().read(current)
    }

    fn write_position(&self, offset: u64) -> std::io::Result<()> {
        self.position().write(offset)
    }

    fn close_position(&self) {
        if let Err(error) = self.position().close() {
            warn!(session = self.shared.id, %error, "failed to release position record");
        }
    }

    fn position(&self) -> std::sync::MutexGuard<'_, PositionStore> {
        self.shared
            .position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running generation: the control handle plus the task reading the file.
pub struct TailSession {
    control: SessionControl,
    task: Option<JoinHandle<Result<()>>>,
}

impl TailSession {
    /// Opens the target and its position record, then starts the read loop.
    ///
    /// # Errors
    ///
    /// Fails fast with [`Error::TargetMissing`] if the file does not exist and
    /// with [`Error::LockUnavailable`] if another reader holds the position record.
    pub async fn start(config: &TailConfig, sink: SharedSink) -> Result<Self> {
        Self::launch(config, sink, None).await
    }

    /// Like [`start`](Self::start), but a loop failure is handed to `failures`
    /// instead of being returned from [`join`](Self::join).
    pub(crate) async fn start_supervised(
        config: &TailConfig,
        sink: SharedSink,
        failures: mpsc::UnboundedSender<Error>,
    ) -> Result<Self> {
        Self::launch(config, sink, Some(failures)).await
    }

    async fn launch(
        config: &TailConfig,
        sink: SharedSink,
        failures: Option<mpsc::UnboundedSender<Error>>,
    ) -> Result<Self> {
        let target = config.target().clone();
        let missing = || Error::TargetMissing {
            path: target.path().display().to_string(),
        };

        if !target.path().exists() {
            return Err(missing());
        }
        let mut file = File::open(target.path()).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                missing()
            } else {
                Error::Io(e)
            }
        })?;

        let mut position = config.position_store();
        position.open(config.is_reset())?;
        let offset = match initial_offset(&mut file, &position, config.is_reset()).await {
            Ok(offset) => offset,
            Err(error) => {
                let _ = position.close();
                return Err(error);
            }
        };

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            session = id,
            path = %target.path().display(),
            offset,
            persistent = position.is_persistent(),
            "session started"
        );

        let shared = Arc::new(SessionShared {
            id,
            target,
            signal: Notify::new(),
            stopped: AtomicBool::new(false),
            position: Mutex::new(position),
        });
        // The first pass drains whatever is already past the offset.
        shared.signal.notify_one();

        let control = SessionControl { shared };
        let reader = SessionReader {
            file,
            offset,
            decoder: StreamDecoder::new(
                config.source_encoding(),
                config.dest_encoding(),
                config.read_capacity(),
                config.decode_capacity(),
            ),
            sink,
        };

        let task_control = control.clone();
        let task = tokio::spawn(async move {
            let result = reader.follow(&task_control).await;
            task_control.close_position();
            match (result, failures) {
                (Err(error), Some(failures)) => {
                    error!(session = task_control.id(), %error, "session failed");
                    let _ = failures.send(error);
                    Ok(())
                }
                (result, _) => result,
            }
        });

        Ok(Self {
            control,
            task: Some(task),
        })
    }

    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    pub fn id(&self) -> u64 {
        self.control.id()
    }

    pub fn handle_modify_event(&self, name: Option<&Path>) {
        self.control.handle_modify_event(name);
    }

    pub fn handle_delete_event(&self) -> std::io::Result<()> {
        self.control.handle_delete_event()
    }

    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    pub fn shutdown_later(&self, delay: Duration) {
        self.control.shutdown_later(delay);
    }

    pub fn is_shutdown(&self) -> bool {
        self.control.is_shutdown()
    }

    /// Whether the read loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the read loop to exit. Joining again returns `Ok(())`.
    pub async fn join(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

async fn initial_offset(file: &mut File, position: &PositionStore, reset: bool) -> Result<u64> {
    if !reset && !position.is_persistent() {
        // Without a record, a plain follow begins at the current end of the file.
        file.seek(SeekFrom::End(0)).await?;
    }
    let current = file.stream_position().await?;
    let offset = position.read(current)?;
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(offset)
}

/// The task-owned half of a session.
struct SessionReader {
    file: File,
    /// Next byte to read; only advanced after a pass has been written out.
    offset: u64,
    decoder: StreamDecoder,
    sink: SharedSink,
}

impl SessionReader {
    async fn follow(mut self, control: &SessionControl) -> Result<()> {
        while !control.is_shutdown() {
            control.shared.signal.notified().await;
            self.reset_if_truncated(control).await;
            self.tail(control).await?;
        }
        debug!(session = control.id(), offset = self.offset, "session stopped");
        Ok(())
    }

    async fn reset_if_truncated(&mut self, control: &SessionControl) {
        let size = match self.file.metadata().await {
            Ok(metadata) => metadata.len(),
            Err(error) => {
                warn!(session = control.id(), %error, "failed to stat target");
                return;
            }
        };
        let stored = match control.read_position(self.offset) {
            Ok(stored) => stored,
            Err(error) => {
                warn!(session = control.id(), %error, "failed to read position record");
                return;
            }
        };
        if !detect_file_truncation(size, stored) {
            return;
        }

        info!(session = control.id(), size, offset = stored, "target truncated, resuming from end");
        if let Err(error) = self.file.seek(SeekFrom::Start(size)).await {
            warn!(session = control.id(), %error, "failed to seek after truncation");
            return;
        }
        self.offset = size;
        if let Err(error) = control.write_position(size) {
            warn!(session = control.id(), %error, "failed to persist read position");
        }
    }

    async fn tail(&mut self, control: &SessionControl) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match self.decoder.pass(&mut self.file, &mut **sink).await {
            Ok(consumed) => {
                self.offset += consumed;
                if consumed > 0 {
                    trace!(session = control.id(), consumed, offset = self.offset, "pass complete");
                }
                // Not retried: the next pass persists a newer offset anyway.
                if let Err(error) = control.write_position(self.offset) {
                    warn!(session = control.id(), %error, "failed to persist read position");
                }
                Ok(())
            }
            Err(error) if is_sink_closed(&error) => Err(Error::SinkClosed),
            Err(error) => {
                warn!(
                    session = control.id(),
                    offset = self.offset,
                    %error,
                    "pass aborted, retrying from last confirmed offset on next signal"
                );
                if let Err(error) = self.file.seek(SeekFrom::Start(self.offset)).await {
                    warn!(session = control.id(), %error, "failed to rewind after aborted pass");
                }
                Ok(())
            }
        }
    }
}
