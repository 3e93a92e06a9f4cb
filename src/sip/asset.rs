//! Audio Assets
//!
//! Pre-encoded audio clips, loaded by identifier right before they are played.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::PlaybackError;

/// Raw encoded samples of one clip
#[derive(Debug, Clone)]
pub struct AudioAsset {
    /// Identifier the asset was loaded under
    pub id: String,
    /// Encoded audio, already in the session's codec
    pub data: Bytes,
}

impl AudioAsset {
    pub fn new(id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Source of audio assets
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Load the asset named `id`, failing with `AssetUnavailable`
    async fn load(&self, id: &str) -> Result<AudioAsset, PlaybackError>;
}

/// Assets stored as files under a root directory
#[derive(Debug, Clone)]
pub struct FileAssets {
    root: PathBuf,
}

impl FileAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[async_trait]
impl AssetStore for FileAssets {
    async fn load(&self, id: &str) -> Result<AudioAsset, PlaybackError> {
        let path = self.path_of(id);

        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| PlaybackError::AssetUnavailable {
                asset: path.display().to_string(),
                source,
            })?;

        tracing::debug!("Loaded asset {} ({} bytes)", path.display(), data.len());

        Ok(AudioAsset::new(id, data))
    }
}
