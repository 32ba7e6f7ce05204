//! Append-only file logging under the node's root directory.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Root directory of the local node install.
///
/// Uses `$CHIK_ROOT` when set, otherwise `~/.chik/mainnet`.
pub fn default_root_path() -> PathBuf {
    if let Some(root) = std::env::var_os("CHIK_ROOT") {
        return PathBuf::from(root);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chik")
        .join("mainnet")
}

/// Appends lines to files in `<root>/log/`.
#[derive(Clone, Debug)]
pub struct FileLogger {
    log_dir: PathBuf,
}

impl FileLogger {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            log_dir: root.as_ref().join("log"),
        }
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.log_dir.join(filename)
    }

    /// Appends `message` plus a newline to `filename`, creating the file if
    /// needed. Errors are returned to the caller, never retried.
    pub fn append(&self, filename: &str, message: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path(filename))?;
        file.write_all(format!("{message}\n").as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_and_extends_file() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(root.path().join("log")).expect("log dir");
        let logger = FileLogger::new(root.path());

        logger.append("proofs.log", "first").expect("first append");
        logger.append("proofs.log", "second").expect("second append");

        let contents = std::fs::read_to_string(logger.path("proofs.log")).expect("read back");
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn missing_log_dir_is_reported() {
        let root = tempfile::tempdir().expect("tempdir");
        let logger = FileLogger::new(root.path().join("does-not-exist"));

        let err = logger.append("proofs.log", "x").expect_err("should fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
