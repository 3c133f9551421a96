use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use super::{ArtifactError, ArtifactPath, ArtifactStore};

/// Filesystem artifact store rooted at a directory (`public/` by default).
///
/// `put` writes a temp file next to the target, fsyncs it and hard-links it
/// into place. The link fails if the target exists, so a path is never
/// overwritten and readers never see a partially written file.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &ArtifactPath) -> PathBuf {
        self.root.join(path.as_str())
    }
}

fn io_error(path: &Path, source: io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, path: &ArtifactPath, bytes: &[u8]) -> Result<(), ArtifactError> {
        let target = self.full_path(path);
        let dir = target
            .parent()
            .ok_or_else(|| ArtifactError::InvalidPath(path.to_string()))?;
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        let tmp = dir.join(format!(".{}.{}.tmp", path.file_name(), Uuid::now_v7()));
        if let Err(e) = write_synced(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(&tmp, e));
        }

        let linked = fs::hard_link(&tmp, &target);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArtifactError::AlreadyExists(path.to_string()));
            }
            Err(e) => return Err(io_error(&target, e)),
        }

        // Persist the directory entry as well
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }

        debug!(artifact_path = %path, bytes = bytes.len(), "artifact written");
        Ok(())
    }

    fn get(&self, path: &ArtifactPath) -> Result<Vec<u8>, ArtifactError> {
        let target = self.full_path(path);
        fs::read(&target).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArtifactError::NotFound(path.to_string()),
            _ => io_error(&target, e),
        })
    }

    fn exists(&self, path: &ArtifactPath) -> Result<bool, ArtifactError> {
        let target = self.full_path(path);
        target.try_exists().map_err(|e| io_error(&target, e))
    }

    fn discard(&self, path: &ArtifactPath) -> Result<(), ArtifactError> {
        let target = self.full_path(path);
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&target, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> ArtifactPath {
        ArtifactPath::parse(raw).unwrap()
    }

    #[test]
    fn put_creates_directories_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let p = path("offers/offer-a-b-1.pdf");

        store.put(&p, b"%PDF-1.5 test").unwrap();

        assert!(store.exists(&p).unwrap());
        assert_eq!(store.get(&p).unwrap(), b"%PDF-1.5 test");
        assert!(dir.path().join("offers/offer-a-b-1.pdf").is_file());
    }

    #[test]
    fn put_does_not_overwrite_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let p = path("offers/x.pdf");

        store.put(&p, b"one").unwrap();
        assert!(matches!(
            store.put(&p, b"two"),
            Err(ArtifactError::AlreadyExists(_))
        ));
        assert_eq!(store.get(&p).unwrap(), b"one");

        let entries: Vec<_> = fs::read_dir(dir.path().join("offers"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("x.pdf")]);
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let p = path("offers/missing.pdf");

        assert!(!store.exists(&p).unwrap());
        assert!(matches!(store.get(&p), Err(ArtifactError::NotFound(_))));
        store.discard(&p).unwrap();
    }
}
