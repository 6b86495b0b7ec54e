//! Persisted resume state
//!
//! A partially transferred file leaves behind enough state for a later
//! caller-initiated attempt to continue where it stopped:
//!
//! - **Sender side**: a `<source>.resume` sidecar next to the source
//!   file holding the confirmed byte offset as a decimal string. Read
//!   at send start, removed on success.
//! - **Receiver side**: the incomplete destination itself, preserved
//!   under a `<final>.part` name. Its length is the resumable offset a
//!   future header must assert.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Sidecar file extension for sender-side resume markers
const RESUME_SUFFIX: &str = "resume";

/// Suffix under which the receiver preserves incomplete files
const PARTIAL_SUFFIX: &str = "part";

/// Path of the resume sidecar for a source file
pub fn marker_path(source: &Path) -> PathBuf {
    let mut os = source.as_os_str().to_owned();
    os.push(".");
    os.push(RESUME_SUFFIX);
    PathBuf::from(os)
}

/// Path under which the receiver keeps an in-flight or interrupted file
pub fn partial_path(save_dir: &Path, filename: &str) -> PathBuf {
    save_dir.join(format!("{filename}.{PARTIAL_SUFFIX}"))
}

/// Read the confirmed-sent offset for a source file, if one is tracked.
///
/// A missing sidecar means a fresh transfer. An unreadable or garbled
/// sidecar is treated the same way, with a warning; resuming from a
/// bogus offset would corrupt the destination.
pub async fn load_offset(source: &Path) -> Option<u64> {
    let marker = marker_path(source);
    let contents = fs::read_to_string(&marker).await.ok()?;

    match contents.trim().parse::<u64>() {
        Ok(offset) => {
            debug!("resume marker for {:?}: {} bytes", source, offset);
            Some(offset)
        }
        Err(_) => {
            warn!("ignoring unparsable resume marker {:?}", marker);
            None
        }
    }
}

/// Persist the confirmed-sent offset for a source file.
///
/// Failures are logged, not propagated: losing a marker only costs a
/// full resend on the next attempt.
pub async fn store_offset(source: &Path, offset: u64) {
    let marker = marker_path(source);
    if let Err(e) = fs::write(&marker, offset.to_string()).await {
        warn!("failed to write resume marker {:?}: {e}", marker);
    }
}

/// Remove the resume marker for a source file, if present.
pub async fn clear(source: &Path) {
    let marker = marker_path(source);
    match fs::remove_file(&marker).await {
        Ok(()) => debug!("cleared resume marker {:?}", marker),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove resume marker {:?}: {e}", marker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_marker_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("data.bin");

        assert_eq!(load_offset(&source).await, None);

        store_offset(&source, 8192).await;
        assert_eq!(load_offset(&source).await, Some(8192));

        clear(&source).await;
        assert_eq!(load_offset(&source).await, None);
    }

    #[tokio::test]
    async fn test_garbled_marker_ignored() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("data.bin");

        fs::write(marker_path(&source), "not a number")
            .await
            .unwrap();
        assert_eq!(load_offset(&source).await, None);
    }

    #[tokio::test]
    async fn test_clear_missing_marker_is_noop() {
        let dir = TempDir::new().unwrap();
        clear(&dir.path().join("never-existed.bin")).await;
    }

    #[test]
    fn test_partial_path_shape() {
        let p = partial_path(Path::new("/save"), "movie.mkv");
        assert_eq!(p, PathBuf::from("/save/movie.mkv.part"));
    }
}
