//! Follow configuration: the target file, charsets and position persistence.

use crate::error::{Error, Result};
use crate::position::PositionStore;
use encoding_rs::Encoding;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Grace period between a delete event and the shutdown of the session reading it.
pub const DEFAULT_ROTATE_WAIT: Duration = Duration::from_secs(5);

/// Default capacity of both the byte read buffer and the decode buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

const POSITION_FILE_PREFIX: &str = "log-follower.";

/// The absolute, normalized path of the file being followed.
///
/// Directory events carry only a file name relative to the watched directory,
/// so the parent is kept alongside the path to resolve them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFile {
    path: PathBuf,
    parent: PathBuf,
}

impl TargetFile {
    /// Creates a target from any path, absolutizing and normalizing it.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = normalize_path(path.as_ref())?;
        if path.file_name().is_none() {
            return Err(Error::InvalidPath {
                message: format!("{} has no file name", path.display()),
            });
        }
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidPath {
                message: format!("{} has no parent directory", path.display()),
            })?;

        Ok(Self { path, parent })
    }

    /// Whether a directory event concerns this file.
    ///
    /// An event without a file name is treated as relevant to every target.
    pub fn is_target_event(&self, name: Option<&Path>) -> bool {
        name.is_none_or(|name| self.parent.join(name) == self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory that has to be watched to see this file rotate.
    pub fn parent(&self) -> &Path {
        &self.parent
    }
}

/// Everything a follow needs to know, assembled before the first session starts.
///
/// Setters consume and return the config so it can be built in one expression:
///
/// ```rust,no_run
/// use log_follower::TailConfig;
///
/// # fn main() -> log_follower::Result<()> {
/// let config = TailConfig::new("/var/log/app.log")?
///     .source_charset(log_follower::charset_for_label("euc-jp")?)
///     .persist(true);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TailConfig {
    target: TargetFile,
    source_charset: &'static Encoding,
    dest_charset: &'static Encoding,
    reset: bool,
    persist: bool,
    position_file: Option<PathBuf>,
    rotate_wait: Duration,
    read_buffer_capacity: usize,
    decode_buffer_capacity: usize,
}

impl TailConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            target: TargetFile::new(path)?,
            source_charset: encoding_rs::UTF_8,
            dest_charset: encoding_rs::UTF_8,
            reset: false,
            persist: false,
            position_file: None,
            rotate_wait: DEFAULT_ROTATE_WAIT,
            read_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            decode_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        })
    }

    pub fn source_charset(mut self, charset: &'static Encoding) -> Self {
        self.source_charset = charset;
        self
    }

    pub fn dest_charset(mut self, charset: &'static Encoding) -> Self {
        self.dest_charset = charset;
        self
    }

    /// Discard any stored read position when the position record is opened.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Persist the read position to the default position file.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Persist the read position to an explicit file. Implies `persist(true)`.
    pub fn position_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.position_file = Some(normalize_path(path.as_ref())?);
        self.persist = true;
        Ok(self)
    }

    pub fn rotate_wait(mut self, wait: Duration) -> Self {
        self.rotate_wait = wait;
        self
    }

    pub fn read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity.max(1);
        self
    }

    pub fn decode_buffer_capacity(mut self, capacity: usize) -> Self {
        self.decode_buffer_capacity = capacity;
        self
    }

    pub fn target(&self) -> &TargetFile {
        &self.target
    }

    pub fn source_encoding(&self) -> &'static Encoding {
        self.source_charset
    }

    pub fn dest_encoding(&self) -> &'static Encoding {
        self.dest_charset
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    pub fn is_persistent(&self) -> bool {
        self.persist
    }

    pub fn grace_period(&self) -> Duration {
        self.rotate_wait
    }

    pub fn read_capacity(&self) -> usize {
        self.read_buffer_capacity
    }

    pub fn decode_capacity(&self) -> usize {
        self.decode_buffer_capacity
    }

    /// The file the read position is persisted to, if persistence is on.
    pub fn position_path(&self) -> Option<PathBuf> {
        if !self.persist {
            return None;
        }
        Some(
            self.position_file
                .clone()
                .unwrap_or_else(|| default_position_file(self.target.path())),
        )
    }

    /// Builds a fresh, unopened position store for one session.
    pub fn position_store(&self) -> PositionStore {
        match self.position_path() {
            Some(path) => PositionStore::persistent(path),
            None => PositionStore::transient(),
        }
    }
}

/// Looks up a charset by its label (`utf-8`, `euc-jp`, `iso-2022-jp`, `windows-31j`, ...).
pub fn charset_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label_no_replacement(label.trim().as_bytes()).ok_or_else(|| {
        Error::UnsupportedCharset {
            label: label.to_string(),
        }
    })
}

/// The position file used when persistence is on but no file was given:
/// a temp-directory file named after the target with separators flattened.
pub fn default_position_file(target: &Path) -> PathBuf {
    let flattened: String = target
        .to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ';' => '_',
            other => other,
        })
        .collect();
    std::env::temp_dir().join(format!("{POSITION_FILE_PREFIX}{flattened}"))
}

/// Absolutize against the working directory and drop `.`/`..` lexically.
/// Symlinks are left alone.
fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_file_normalizes_path() {
        let target = TargetFile::new("/var/log/./nginx/../app.log").unwrap();
        assert_eq!(target.path(), Path::new("/var/log/app.log"));
        assert_eq!(target.parent(), Path::new("/var/log"));
    }

    #[test]
    fn test_target_file_relative_path_is_absolutized() {
        let target = TargetFile::new("app.log").unwrap();
        assert!(target.path().is_absolute());
        assert_eq!(target.path().file_name().unwrap(), "app.log");
        assert_eq!(target.parent(), std::env::current_dir().unwrap());
    }

    #[test]
    fn test_target_file_rejects_root() {
        let result = TargetFile::new("/");
        assert!(matches!(result, Err(Error::InvalidPath { .. })));
    }

    #[test]
    fn test_is_target_event_exact_match() {
        let target = TargetFile::new("/tmp/test.log").unwrap();

        assert!(target.is_target_event(Some(Path::new("test.log"))));
        assert!(!target.is_target_event(Some(Path::new("other.log"))));
    }

    #[test]
    fn test_is_target_event_without_name() {
        let target = TargetFile::new("/tmp/test.log").unwrap();
        assert!(target.is_target_event(None));
    }

    #[test]
    fn test_is_target_event_case_sensitivity() {
        let target = TargetFile::new("/tmp/Test.Log").unwrap();

        assert!(!target.is_target_event(Some(Path::new("test.log"))));
        assert!(target.is_target_event(Some(Path::new("Test.Log"))));
    }

    #[test]
    fn test_is_target_event_special_characters() {
        let target = TargetFile::new("/tmp/app-test_file.log").unwrap();

        assert!(target.is_target_event(Some(Path::new("app-test_file.log"))));
        assert!(!target.is_target_event(Some(Path::new("app-test-file.log"))));
    }

    #[test]
    fn test_config_defaults() {
        let config = TailConfig::new("/tmp/test.log").unwrap();

        assert_eq!(config.source_encoding(), encoding_rs::UTF_8);
        assert_eq!(config.dest_encoding(), encoding_rs::UTF_8);
        assert!(!config.is_reset());
        assert!(!config.is_persistent());
        assert_eq!(config.grace_period(), DEFAULT_ROTATE_WAIT);
        assert_eq!(config.read_capacity(), DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.position_path(), None);
        assert!(!config.position_store().is_persistent());
    }

    #[test]
    fn test_position_file_implies_persist() {
        let config = TailConfig::new("/tmp/test.log")
            .unwrap()
            .position_file("/tmp/positions/../test.pos")
            .unwrap();

        assert!(config.is_persistent());
        assert_eq!(config.position_path(), Some(PathBuf::from("/tmp/test.pos")));
        assert!(config.position_store().is_persistent());
    }

    #[test]
    fn test_persist_uses_default_position_file() {
        let config = TailConfig::new("/var/log/app.log").unwrap().persist(true);

        assert_eq!(
            config.position_path(),
            Some(default_position_file(Path::new("/var/log/app.log")))
        );
    }

    #[test]
    fn test_default_position_file_flattens_separators() {
        let path = default_position_file(Path::new("/var/log/app:1.log"));

        assert_eq!(path.parent().unwrap(), std::env::temp_dir());
        assert_eq!(
            path.file_name().unwrap(),
            "log-follower._var_log_app_1.log"
        );
    }

    #[test]
    fn test_charset_for_label() {
        assert_eq!(charset_for_label("UTF-8").unwrap(), encoding_rs::UTF_8);
        assert_eq!(charset_for_label("euc-jp").unwrap(), encoding_rs::EUC_JP);
        assert_eq!(
            charset_for_label("ISO-2022-JP").unwrap(),
            encoding_rs::ISO_2022_JP
        );
        assert_eq!(
            charset_for_label("Windows-31J").unwrap(),
            encoding_rs::SHIFT_JIS
        );
        assert_eq!(charset_for_label(" utf8 ").unwrap(), encoding_rs::UTF_8);
    }

    #[test]
    fn test_charset_for_unknown_label() {
        let result = charset_for_label("klingon");
        assert!(matches!(
            result,
            Err(Error::UnsupportedCharset { label }) if label == "klingon"
        ));
    }

    #[test]
    fn test_read_buffer_capacity_is_at_least_one() {
        let config = TailConfig::new("/tmp/test.log")
            .unwrap()
            .read_buffer_capacity(0);
        assert_eq!(config.read_capacity(), 1);
    }
}
