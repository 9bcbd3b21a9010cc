//! A rotation-aware `tail -f` library.
//!
//! Follows a single file as it grows, keeps following it when a log rotator
//! deletes or renames it and a new file appears under the same name, and can
//! remember how far it got across restarts. Bytes read from the file are
//! transcoded from a source charset to a destination charset before they are
//! written to the output sink.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_follower::{TailConfig, follow, shared_sink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TailConfig::new("/var/log/app.log")?.persist(true);
//!     follow(config, shared_sink(tokio::io::stdout())).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod controller;
mod error;
mod position;
mod reader;
mod session;
mod sink;
mod watcher;

#[cfg(test)]
mod test_helpers;

pub use config::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_ROTATE_WAIT, TailConfig, TargetFile, charset_for_label,
    default_position_file,
};
pub use controller::{ControllerHandle, RotationController};
pub use error::{Error, Result};
pub use position::{PositionFile, PositionStore};
pub use reader::Transcoder;
pub use session::{SessionControl, TailSession};
pub use sink::{SharedSink, shared_sink};
pub use watcher::{FileWatcher, WatchEvent, WatchEventKind};

/// Follows the configured file into `sink` until the watched directory goes
/// away or an unrecoverable error occurs.
///
/// Use [`RotationController`] directly to get a [`ControllerHandle`] for
/// stopping the follow from elsewhere.
///
/// # Example
///
/// ```rust,no_run
/// use log_follower::{TailConfig, charset_for_label, follow, shared_sink};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = TailConfig::new("app.log")?
///         .source_charset(charset_for_label("Shift_JIS")?)
///         .reset(true);
///     follow(config, shared_sink(tokio::io::stdout())).await?;
///     Ok(())
/// }
/// ```
pub async fn follow(config: TailConfig, sink: SharedSink) -> Result<()> {
    RotationController::new(config, sink).run().await
}
