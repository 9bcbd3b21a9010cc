//! The output side of a follow.

use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

/// A byte sink shared by every generation of a follow.
///
/// A session holds the lock for a whole pass, so a draining generation and
/// its successor never interleave their output mid-pass.
pub type SharedSink = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Wraps any async writer (stdout, a file, a socket) as a [`SharedSink`].
pub fn shared_sink<W>(writer: W) -> SharedSink
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Whether a write error means the sink is gone for good.
pub(crate) fn is_sink_closed(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::WriteZero
    )
}
