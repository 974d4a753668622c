//! JSON-file index repository.
//!
//! The whole document is rewritten on every save: serialized to a sibling
//! temp file, then renamed over the target, so a crash never leaves a
//! half-written file behind. History is capped to the newest points.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::{IndexRepository, PersistedIndex, RepositoryError};

/// Default number of history points kept on disk (about ten years).
pub const DEFAULT_HISTORY_CAP: usize = 3650;

/// JSON-file implementation of `IndexRepository`.
#[derive(Debug, Clone)]
pub struct JsonFileIndexRepository {
    path: PathBuf,
    history_cap: usize,
}

impl JsonFileIndexRepository {
    /// Repository backed by `path` with the default history cap.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_history_cap(path, DEFAULT_HISTORY_CAP)
    }

    /// Repository backed by `path`, keeping at most `history_cap` points.
    #[must_use]
    pub fn with_history_cap(path: impl Into<PathBuf>, history_cap: usize) -> Self {
        Self {
            path: path.into(),
            history_cap,
        }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl IndexRepository for JsonFileIndexRepository {
    async fn load(&self) -> Result<PersistedIndex, RepositoryError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let mut document: PersistedIndex = serde_json::from_slice(&bytes)?;
                document.history.sort_by_key(|p| p.date);
                tracing::debug!(
                    path = %self.path.display(),
                    points = document.history.len(),
                    "Loaded index document"
                );
                Ok(document)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No index document yet, starting fresh");
                Ok(PersistedIndex::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, index: &PersistedIndex) -> Result<(), RepositoryError> {
        let mut document = index.clone();
        let excess = document.history.len().saturating_sub(self.history_cap);
        if excess > 0 {
            document.history.drain(..excess);
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(&document)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            points = document.history.len(),
            bytes = bytes.len(),
            "Saved index document"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::application::ports::EngineStateRecord;
    use crate::domain::divisor::DivisorState;
    use crate::domain::history::{HistoryPoint, HistorySource};

    fn point(day: u32) -> HistoryPoint {
        HistoryPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            value: 1000.0 + f64::from(day),
            change: 1.0,
            change_percent: 0.1,
            open: None,
            high: None,
            low: None,
            previous_close: None,
            total_free_float_market_cap: None,
            divisor: Some(14_500_000.0),
            constituent_count: Some(3),
            source: HistorySource::Backfill,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileIndexRepository::new(dir.path().join("index.json"));
        let document = repo.load().await.unwrap();
        assert!(document.engine_state.is_none());
        assert!(document.history.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_state_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileIndexRepository::new(dir.path().join("data").join("index.json"));
        let document = PersistedIndex {
            engine_state: Some(EngineStateRecord {
                divisor: DivisorState {
                    value: 14_500_000.0,
                    last_calibrated_total_ff_mcap: 14.5e9,
                    base_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    base_value: 1000.0,
                },
                constituents: None,
                last_history_date: Some(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()),
            }),
            history: vec![point(2), point(3)],
        };

        repo.save(&document).await.unwrap();
        assert!(!repo.temp_path().exists());
        assert_eq!(repo.load().await.unwrap(), document);
    }

    #[tokio::test]
    async fn save_keeps_only_newest_points() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileIndexRepository::with_history_cap(dir.path().join("index.json"), 2);
        let document = PersistedIndex {
            engine_state: None,
            history: vec![point(2), point(3), point(4)],
        };

        repo.save(&document).await.unwrap();
        let loaded = repo.load().await.unwrap();
        let days: Vec<_> = loaded.history.iter().map(|p| p.date).collect();
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"{not json").unwrap();
        let repo = JsonFileIndexRepository::new(path);
        assert!(matches!(
            repo.load().await,
            Err(RepositoryError::Serialization(_))
        ));
    }
}
