//! Size and path checks for moving files between the chat and the host.

use std::path::{Path, PathBuf};

use copilot_relay_error::RelayError;

const FALLBACK_FILE_NAME: &str = "upload.bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub path: PathBuf,
    pub size: u64,
}

impl DownloadTarget {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Reduce a user-supplied file name to a single path component so an upload
/// cannot escape the workspace.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match last {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        other => other.to_string(),
    }
}

/// Reject uploads over `limit` bytes. Unknown sizes are let through; the
/// surface enforces its own ceiling while transferring.
pub fn check_upload_size(size: Option<u64>, limit: u64) -> Result<(), RelayError> {
    match size {
        Some(size) if size > limit => Err(RelayError::FileTooLarge { size, limit }),
        _ => Ok(()),
    }
}

/// Validate a host path for download: it must exist, be a regular file and
/// fit under `limit` bytes.
pub async fn inspect_download(path: &Path, limit: u64) -> Result<DownloadTarget, RelayError> {
    let display = path.display().to_string();
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(RelayError::PathNotFound { path: display });
        }
        Err(err) => return Err(RelayError::workspace(display, err)),
    };
    if metadata.is_dir() {
        return Err(RelayError::PathIsDirectory { path: display });
    }
    if metadata.len() > limit {
        return Err(RelayError::FileTooLarge {
            size: metadata.len(),
            limit,
        });
    }
    Ok(DownloadTarget {
        path: path.to_path_buf(),
        size: metadata.len(),
    })
}

pub fn human_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KIB * KIB {
        format!("{:.1} MB", value / KIB / KIB)
    } else if value >= KIB {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_flattened() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\notes.txt"), "notes.txt");
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("dir/"), FALLBACK_FILE_NAME);
    }

    #[test]
    fn upload_limit() {
        let limit = 20 * 1024 * 1024;
        check_upload_size(Some(limit), limit).expect("at limit");
        check_upload_size(None, limit).expect("unknown size");
        let err = check_upload_size(Some(limit + 1), limit).expect_err("too large");
        assert!(matches!(err, RelayError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn download_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "0123456789").expect("write");

        let target = inspect_download(&file, 100).await.expect("ok");
        assert_eq!(target.size, 10);
        assert_eq!(target.file_name(), "data.txt");

        assert!(matches!(
            inspect_download(&file, 5).await,
            Err(RelayError::FileTooLarge { size: 10, limit: 5 })
        ));
        assert!(matches!(
            inspect_download(dir.path(), 100).await,
            Err(RelayError::PathIsDirectory { .. })
        ));
        assert!(matches!(
            inspect_download(&dir.path().join("missing"), 100).await,
            Err(RelayError::PathNotFound { .. })
        ));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(20 * 1024 * 1024), "20.0 MB");
    }
}
