//! Directory watching using the notify crate.
//!
//! The target's parent directory is watched rather than the file itself, so
//! the watch survives the file being deleted and recreated. Raw notify events
//! are classified into the four kinds the controller acts on.

use crate::error::{Error, Result};
use futures::Stream;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

/// What happened in the watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    Delete,
    Modify,
    /// The backend dropped events; anything may have happened.
    Overflow,
    /// The watched directory itself went away.
    Invalidated,
}

/// A classified directory event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// File name relative to the watched directory, if the backend reported one.
    pub name: Option<PathBuf>,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, name: Option<PathBuf>) -> Self {
        Self { kind, name }
    }

    pub fn created<P: Into<PathBuf>>(name: P) -> Self {
        Self::new(WatchEventKind::Create, Some(name.into()))
    }

    pub fn deleted<P: Into<PathBuf>>(name: P) -> Self {
        Self::new(WatchEventKind::Delete, Some(name.into()))
    }

    pub fn modified<P: Into<PathBuf>>(name: P) -> Self {
        Self::new(WatchEventKind::Modify, Some(name.into()))
    }

    pub fn overflow() -> Self {
        Self::new(WatchEventKind::Overflow, None)
    }

    pub fn invalidated() -> Self {
        Self::new(WatchEventKind::Invalidated, None)
    }

    pub fn name(&self) -> Option<&Path> {
        self.name.as_deref()
    }
}

/// Watches one directory and yields classified events as a stream.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<Result<WatchEvent>>,
    directory: PathBuf,
}

impl FileWatcher {
    /// Creates a watcher for `directory`. Nothing is watched until [`start_watching`](Self::start_watching).
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel();

        let watched = directory.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for classified in classify_event(&event, &watched) {
                        let _ = tx.send(Ok(classified));
                    }
                }
                Err(error) => {
                    let _ = tx.send(Err(Error::Watcher(error)));
                }
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher,
            receiver: rx,
            directory,
        })
    }

    /// Starts watching the directory, non-recursively.
    pub fn start_watching(&mut self) -> Result<()> {
        self.watcher
            .watch(&self.directory, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    /// Returns the next classified event.
    pub async fn next_event(&mut self) -> Option<Result<WatchEvent>> {
        self.receiver.recv().await
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl Stream for FileWatcher {
    type Item = Result<WatchEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Maps one notify event onto zero or more directory events.
///
/// Renames are reported the way a rotating logger experiences them: the old
/// name disappears (delete) and the new name appears (create). Each rename
/// yields exactly one event per side.
pub(crate) fn classify_event(event: &Event, directory: &Path) -> Vec<WatchEvent> {
    if event.need_rescan() {
        return vec![WatchEvent::overflow()];
    }

    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Create,
        EventKind::Remove(_) => WatchEventKind::Delete,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => WatchEventKind::Delete,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Backends that pair renames report the From and To halves as
            // well, so the pair would classify the same rename twice.
            trace!(?event, "ignoring paired rename");
            return Vec::new();
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // The backend could not tell which side of the rename this is.
            return event
                .paths
                .iter()
                .map(|path| {
                    let kind = if path.exists() {
                        WatchEventKind::Create
                    } else {
                        WatchEventKind::Delete
                    };
                    WatchEvent::new(kind, file_name(path))
                })
                .collect();
        }
        EventKind::Modify(_) => WatchEventKind::Modify,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            trace!(?event, "ignoring event");
            return Vec::new();
        }
    };

    if event.paths.is_empty() {
        return vec![WatchEvent::new(kind, None)];
    }

    event
        .paths
        .iter()
        .map(|path| {
            if kind == WatchEventKind::Delete && path == directory {
                WatchEvent::invalidated()
            } else {
                WatchEvent::new(kind, file_name(path))
            }
        })
        .collect()
}

fn file_name(path: &Path) -> Option<PathBuf> {
    path.file_name().map(PathBuf::from)
}
