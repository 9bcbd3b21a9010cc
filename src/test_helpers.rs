//! Test utilities for creating temporary log files and capturing sink output.

use crate::sink::{SharedSink, shared_sink};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

const WAIT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TempLogFile {
    pub path: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TempLogFile {
    /// Create a new, empty temporary log file named `test.log`
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("test.log");

        File::create(&path)?;

        Ok(Self {
            path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a temporary log file with an initial line
    pub fn with_content(content: &str) -> std::io::Result<Self> {
        let temp_file = Self::new()?;
        temp_file.append_content(content)?;
        Ok(temp_file)
    }

    /// Append a line to the temporary log file
    pub fn append_content(&self, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;

        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(())
    }

    /// Append raw bytes, no newline
    pub fn append_bytes(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    /// Truncate the file in place
    pub fn truncate(&self) -> std::io::Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    pub fn remove(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }

    /// A path next to the log file, inside the same temporary directory
    pub fn sibling(&self, name: &str) -> PathBuf {
        self._temp_dir.path().join(name)
    }

    /// Get the path to the temporary file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An in-memory sink whose contents can be inspected while a session writes to it.
#[derive(Clone, Default)]
pub struct CaptureSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> SharedSink {
        shared_sink(self.clone())
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    /// Polls until the contents equal `expected` or the timeout passes,
    /// then returns whatever was captured.
    pub async fn wait_for(&self, expected: &[u8]) -> Vec<u8> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let contents = self.contents();
            if contents == expected || tokio::time::Instant::now() >= deadline {
                return contents;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl AsyncWrite for CaptureSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A sink whose reader has gone away.
pub struct BrokenSink;

impl BrokenSink {
    pub fn shared() -> SharedSink {
        shared_sink(BrokenSink)
    }
}

impl AsyncWrite for BrokenSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A capturing sink that fails a number of writes with a transient error.
#[derive(Clone)]
pub struct FlakySink {
    inner: CaptureSink,
    succeed_first: usize,
    failures_left: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl FlakySink {
    /// Lets `succeed_first` writes through, then fails the next `failures` writes.
    pub fn failing_after(succeed_first: usize, failures: usize) -> Self {
        Self {
            inner: CaptureSink::new(),
            succeed_first,
            failures_left: Arc::new(AtomicUsize::new(failures)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn shared(&self) -> SharedSink {
        shared_sink(self.clone())
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.contents()
    }

    pub async fn wait_for(&self, expected: &[u8]) -> Vec<u8> {
        self.inner.wait_for(expected).await
    }
}

impl AsyncWrite for FlakySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let seen = self.writes.fetch_add(1, Ordering::SeqCst);
        if seen >= self.succeed_first
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        {
            return Poll::Ready(Err(std::io::Error::other("disk full")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_temp_log_file_creation() {
        let temp_file = TempLogFile::new().unwrap();
        assert!(temp_file.path().exists());
    }

    #[tokio::test]
    async fn test_temp_log_file_with_content() {
        let content = "test line";
        let temp_file = TempLogFile::with_content(content).unwrap();

        let file_content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(file_content.contains(content));
    }

    #[tokio::test]
    async fn test_append_bytes() {
        let temp_file = TempLogFile::new().unwrap();
        temp_file.append_bytes(b"line 1").unwrap();
        temp_file.append_bytes(b"line 2").unwrap();

        let content = std::fs::read(temp_file.path()).unwrap();
        assert_eq!(content, b"line 1line 2");
    }

    #[tokio::test]
    async fn test_truncate() {
        let temp_file = TempLogFile::with_content("initial content").unwrap();
        temp_file.truncate().unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_capture_sink_collects_writes() {
        let sink = CaptureSink::new();
        let shared = sink.shared();

        shared.lock().await.write_all(b"abc").await.unwrap();
        shared.lock().await.write_all(b"def").await.unwrap();

        assert_eq!(sink.contents(), b"abcdef");
    }

    #[tokio::test]
    async fn test_flaky_sink_fails_then_recovers() {
        let sink = FlakySink::failing_after(1, 1);
        let shared = sink.shared();

        assert!(shared.lock().await.write_all(b"ok").await.is_ok());
        assert!(shared.lock().await.write_all(b"lost").await.is_err());
        assert!(shared.lock().await.write_all(b"back").await.is_ok());

        assert_eq!(sink.contents(), b"okback");
    }
}
