//! Asset store collaborators.
//!
//! An [`AssetStore`] holds the binary objects a book refers to: it turns a
//! staged local file into a durable URL plus an opaque identifier, and can
//! destroy an object by that identifier. Destroying an identifier the store
//! no longer knows is a success.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use libris_kernel::settings::{StorageBackend, StorageSettings};
use serde::Deserialize;

pub mod cloudinary;
pub mod memory;

pub use cloudinary::{CloudinaryConfig, CloudinaryStore};
pub use memory::{MemoryAssetStore, StoreCall};

/// Failures reported by an asset store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read staged upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("asset store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("asset store rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected asset store response: {0}")]
    Malformed(String),

    #[error("asset store unavailable: {0}")]
    Unavailable(String),
}

/// How the store should treat the uploaded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Image,
    Raw,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Raw => "raw",
        }
    }
}

/// Destination of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub resource_type: ResourceType,
    pub folder: String,
}

/// What the store hands back for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadResult {
    pub secure_url: String,
    pub public_id: String,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store the contents of `source` and return where it now lives.
    async fn upload(
        &self,
        source: &Path,
        content_type: Option<&str>,
        options: &UploadOptions,
    ) -> Result<UploadResult, StoreError>;

    /// Remove an object. Must succeed when `public_id` is already gone.
    async fn destroy(&self, public_id: &str, resource_type: ResourceType)
        -> Result<(), StoreError>;
}

/// Build the process-wide asset store client from settings.
pub fn connect(settings: &StorageSettings) -> anyhow::Result<Arc<dyn AssetStore>> {
    match settings.backend {
        StorageBackend::Memory => {
            tracing::info!(target: "libris-storage", "using in-memory asset store");
            Ok(Arc::new(MemoryAssetStore::new()))
        }
        StorageBackend::Cloudinary => {
            let config = CloudinaryConfig::from_settings(settings)?;
            tracing::info!(
                target: "libris-storage",
                cloud_name = %config.cloud_name,
                "using cloudinary asset store"
            );
            let store = CloudinaryStore::new(config, Duration::from_millis(settings.timeout_ms))?;
            Ok(Arc::new(store))
        }
    }
}
