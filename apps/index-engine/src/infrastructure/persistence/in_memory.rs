//! In-memory index repository for testing.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{IndexRepository, PersistedIndex, RepositoryError};

/// In-memory implementation of `IndexRepository`.
///
/// Suitable for testing and development. State is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryIndexRepository {
    document: RwLock<PersistedIndex>,
    saves: RwLock<usize>,
}

impl InMemoryIndexRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-loaded with a document (for test setup).
    #[must_use]
    pub fn with_document(document: PersistedIndex) -> Self {
        Self {
            document: RwLock::new(document),
            saves: RwLock::new(0),
        }
    }

    /// Copy of the stored document.
    #[must_use]
    pub fn document(&self) -> PersistedIndex {
        self.document.read().clone()
    }

    /// Number of saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.read()
    }
}

#[async_trait]
impl IndexRepository for InMemoryIndexRepository {
    async fn load(&self) -> Result<PersistedIndex, RepositoryError> {
        Ok(self.document.read().clone())
    }

    async fn save(&self, index: &PersistedIndex) -> Result<(), RepositoryError> {
        *self.document.write() = index.clone();
        *self.saves.write() += 1;
        Ok(())
    }
}
