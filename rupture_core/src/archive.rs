use crate::input::Input;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to create crash directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write crash record {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Content-addressed store for crashing inputs.
///
/// Each record is a file named by the lowercase hex MD5 of its bytes, so the
/// same crash found twice (or by two workers at once) lands on the same file
/// with the same content.
#[derive(Debug, Clone)]
pub struct CrashArchive {
    crash_dir: PathBuf,
}

impl CrashArchive {
    /// The directory is created lazily on the first [`CrashArchive::record`].
    pub fn new(crash_dir: PathBuf) -> Self {
        Self { crash_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.crash_dir
    }

    /// Path the given input is (or would be) stored under.
    pub fn record_path<I: Input>(&self, input: &I) -> PathBuf {
        self.crash_dir.join(input.content_digest())
    }

    /// Persists `input` and returns the path of its record.
    pub fn record<I: Input>(&self, input: &I) -> Result<PathBuf, ArchiveError> {
        fs::create_dir_all(&self.crash_dir).map_err(|e| ArchiveError::CreateDir {
            path: self.crash_dir.clone(),
            source: e,
        })?;
        let path = self.record_path(input);
        fs::write(&path, input.as_bytes()).map_err(|e| ArchiveError::Write {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Number of records currently stored. A missing directory counts as empty.
    pub fn len(&self) -> usize {
        match fs::read_dir(&self.crash_dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().is_file())
                .count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_names_file_by_md5_hex() {
        let dir = tempdir().unwrap();
        let archive = CrashArchive::new(dir.path().to_path_buf());
        let input: Vec<u8> = b"abc".to_vec();

        let path = archive.record(&input).unwrap();
        assert_eq!(path, dir.path().join("900150983cd24fb0d6963f7d28e17f72"));
        assert_eq!(fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn recording_same_content_twice_keeps_one_entry() {
        let dir = tempdir().unwrap();
        let archive = CrashArchive::new(dir.path().to_path_buf());
        let input: Vec<u8> = vec![0xFF, 0x00, 0x41, 0x42];

        let first = archive.record(&input).unwrap();
        let second = archive.record(&input.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(archive.len(), 1);
        assert_eq!(fs::read(&first).unwrap(), input);
    }

    #[test]
    fn distinct_content_gets_distinct_entries() {
        let dir = tempdir().unwrap();
        let archive = CrashArchive::new(dir.path().to_path_buf());

        archive.record(&b"first".to_vec()).unwrap();
        archive.record(&b"second".to_vec()).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn record_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let crash_dir = dir.path().join("nested").join("crashes");
        let archive = CrashArchive::new(crash_dir.clone());
        assert!(archive.is_empty());

        let path = archive.record(&b"data".to_vec()).unwrap();
        assert!(crash_dir.is_dir());
        assert!(path.starts_with(&crash_dir));
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn record_reports_unusable_directory() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"file in the way").unwrap();
        let archive = CrashArchive::new(blocker);

        assert!(matches!(
            archive.record(&b"data".to_vec()),
            Err(ArchiveError::CreateDir { .. })
        ));
    }
}
