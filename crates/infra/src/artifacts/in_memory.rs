use std::collections::HashMap;
use std::sync::RwLock;

use super::{ArtifactError, ArtifactPath, ArtifactStore};

/// In-memory artifact store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    files: RwLock<HashMap<ArtifactPath, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> ArtifactError {
    ArtifactError::Storage("artifact store lock poisoned".to_string())
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, path: &ArtifactPath, bytes: &[u8]) -> Result<(), ArtifactError> {
        let mut files = self.files.write().map_err(|_| poisoned())?;
        if files.contains_key(path) {
            return Err(ArtifactError::AlreadyExists(path.to_string()));
        }
        files.insert(path.clone(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, path: &ArtifactPath) -> Result<Vec<u8>, ArtifactError> {
        self.files
            .read()
            .map_err(|_| poisoned())?
            .get(path)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &ArtifactPath) -> Result<bool, ArtifactError> {
        Ok(self.files.read().map_err(|_| poisoned())?.contains_key(path))
    }

    fn discard(&self, path: &ArtifactPath) -> Result<(), ArtifactError> {
        self.files.write().map_err(|_| poisoned())?.remove(path);
        Ok(())
    }
}
