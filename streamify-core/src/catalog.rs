//! Catalog lookups resolving content ids to download sources.
//!
//! The real catalog (movie records, database) lives outside this crate;
//! streaming only needs `lookup(content_id) -> [SourceDescriptor]`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::engine::InfoHash;

/// Download source for one piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Content hash the handle manager keys on
    pub hash: InfoHash,
    /// Engine locator (magnet URI, file URL, path)
    pub locator: String,
}

impl SourceDescriptor {
    pub fn new(hash: InfoHash, locator: impl Into<String>) -> Self {
        Self {
            hash,
            locator: locator.into(),
        }
    }
}

/// Errors from catalog lookups.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Content {content_id} not found")]
    ContentNotFound { content_id: String },

    #[error("Catalog unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source lookup consumed by the streaming service.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns every known source for `content_id`.
    ///
    /// # Errors
    /// - `CatalogError::ContentNotFound` - Unknown content id
    /// - `CatalogError::Unavailable` - Backing store could not be queried
    async fn lookup(&self, content_id: &str) -> Result<Vec<SourceDescriptor>, CatalogError>;
}

/// Catalog held in memory, keyed by content id.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<String, Vec<SourceDescriptor>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from pre-resolved entries.
    pub fn from_entries(entries: HashMap<String, Vec<SourceDescriptor>>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Loads a JSON file of the form `{"content-id": [{"hash": .., "locator": ..}]}`.
    ///
    /// # Errors
    /// - `CatalogError::Io` - File could not be read
    /// - `CatalogError::Parse` - File is not a valid catalog document
    pub async fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = tokio::fs::read(path).await?;
        let entries: HashMap<String, Vec<SourceDescriptor>> = serde_json::from_slice(&raw)?;
        tracing::info!(
            path = %path.display(),
            content = entries.len(),
            "Catalog loaded"
        );
        Ok(Self::from_entries(entries))
    }

    /// Adds a source for `content_id`.
    pub fn insert(&self, content_id: impl Into<String>, source: SourceDescriptor) {
        self.entries
            .write()
            .entry(content_id.into())
            .or_default()
            .push(source);
    }

    /// Number of content ids with at least one source.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn lookup(&self, content_id: &str) -> Result<Vec<SourceDescriptor>, CatalogError> {
        self.entries
            .read()
            .get(content_id)
            .filter(|sources| !sources.is_empty())
            .cloned()
            .ok_or_else(|| CatalogError::ContentNotFound {
                content_id: content_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_known_and_unknown_content() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.is_empty());
        let hash = InfoHash::new([7; 20]);
        catalog.insert("movie-1", SourceDescriptor::new(hash, "magnet:?xt=urn:btih:x"));
        catalog.insert("movie-1", SourceDescriptor::new(hash, "/srv/movies/a"));
        assert_eq!(catalog.len(), 1);

        let sources = catalog.lookup("movie-1").await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].hash, hash);

        assert!(matches!(
            catalog.lookup("movie-2").await,
            Err(CatalogError::ContentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let hash = "ab".repeat(20);
        tokio::fs::write(
            &path,
            format!(r#"{{"tt0001": [{{"hash": "{hash}", "locator": "/srv/movies/a"}}]}}"#),
        )
        .await
        .unwrap();

        let catalog = InMemoryCatalog::from_json_file(&path).await.unwrap();
        let sources = catalog.lookup("tt0001").await.unwrap();
        assert_eq!(sources[0].hash.to_string(), hash);
        assert_eq!(sources[0].locator, "/srv/movies/a");
    }

    #[tokio::test]
    async fn test_from_json_file_rejects_bad_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        tokio::fs::write(&path, r#"{"tt0001": [{"hash": "nope", "locator": "x"}]}"#)
            .await
            .unwrap();

        assert!(matches!(
            InMemoryCatalog::from_json_file(&path).await,
            Err(CatalogError::Parse(_))
        ));
    }
}
