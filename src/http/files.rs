//! File resolution for disk-backed responses
//!
//! Maps request pathnames onto files under a configured root, falling
//! back to an index file for directories and refusing paths that
//! escape the root.

use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::fs;

use crate::http::mime;

/// Where and how pathnames resolve to files.
#[derive(Debug, Clone)]
pub struct SendFileOptions {
    /// Directory pathnames are resolved under.
    pub from: PathBuf,
    /// File served when a pathname names a directory.
    pub index: String,
}

impl Default for SendFileOptions {
    fn default() -> Self {
        Self {
            from: PathBuf::from("."),
            index: "index.html".to_string(),
        }
    }
}

/// What a pathname resolved to on disk.
#[derive(Debug, Clone)]
pub struct FileStats {
    /// Canonical path of the file that will be read.
    pub path: PathBuf,
    /// File size in bytes.
    pub len: u64,
    /// Last modification time, when the filesystem reports one.
    pub modified: Option<SystemTime>,
    /// Content-Type implied by the file extension.
    pub content_type: &'static str,
}

/// Resolve a request pathname to a file under `options.from`.
///
/// Directories resolve through `options.index`. Anything that is not a
/// regular file, or that escapes the root after symlink resolution,
/// comes back as `NotFound`.
pub async fn resolve_path_stats(path: &str, options: &SendFileOptions) -> io::Result<FileStats> {
    let relative = path.trim_start_matches('/');
    let mut file_path = options.from.join(relative);

    let mut metadata = fs::metadata(&file_path).await?;
    if metadata.is_dir() {
        file_path = file_path.join(&options.index);
        metadata = fs::metadata(&file_path).await?;
    }
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "not a regular file",
        ));
    }

    // Security: ensure the resolved file stays within the root
    let root = fs::canonicalize(&options.from).await?;
    let canonical = fs::canonicalize(&file_path).await?;
    if !canonical.starts_with(&root) {
        tracing::warn!(path, resolved = %canonical.display(), "path traversal attempt blocked");
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "path escapes the serving root",
        ));
    }

    let content_type = mime::get_content_type(canonical.extension().and_then(|e| e.to_str()));
    Ok(FileStats {
        path: canonical,
        len: metadata.len(),
        modified: metadata.modified().ok(),
        content_type,
    })
}

/// Format a timestamp the way HTTP date headers expect.
#[must_use]
pub fn http_date(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
