//! Asset lifecycle for the two slots of a book.
//!
//! Uploads fall back per slot: the primary file to the shared placeholder,
//! the cover to "no cover". Replacement uploads first, switches the record
//! second and destroys the previous object last, so a book never refers to
//! an object that is not in the store. A failed destroy leaves the old object
//! orphaned in the store; it is logged and never retried.
//!
//! Every store call is bounded by the configured storage timeout. A call that
//! runs out of time is an ordinary failure and takes the same fallback path.

use std::{future::Future, io::Write, path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use libris_db::{Asset, AssetKind, Book, DbError, RecordStore};
use libris_kernel::settings::StorageSettings;
use libris_storage::{AssetStore, ResourceType, StoreError, UploadOptions};
use serde::Serialize;
use tempfile::NamedTempFile;

/// Raw bytes for one slot, as received from the caller.
#[derive(Debug, Clone)]
pub struct AssetPayload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl AssetPayload {
    pub fn new(bytes: Bytes, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
        }
    }
}

/// Where each kind of asset goes, and what stands in for a missing file.
#[derive(Debug, Clone)]
pub struct AssetLayout {
    pub book_folder: String,
    pub cover_folder: String,
    pub placeholder: Asset,
    pub staging_dir: Option<PathBuf>,
    /// Upper bound for a single upload or destroy call.
    pub store_timeout: Duration,
}

impl AssetLayout {
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self {
            book_folder: settings.book_folder.clone(),
            cover_folder: settings.cover_folder.clone(),
            placeholder: Asset::new(&settings.placeholder_url, &settings.placeholder_id),
            staging_dir: settings.staging_dir.clone(),
            store_timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    fn upload_options(&self, kind: AssetKind) -> UploadOptions {
        let folder = match kind {
            AssetKind::File => &self.book_folder,
            AssetKind::Cover => &self.cover_folder,
        };
        UploadOptions {
            resource_type: resource_type(kind),
            folder: folder.clone(),
        }
    }
}

fn resource_type(kind: AssetKind) -> ResourceType {
    match kind {
        AssetKind::File => ResourceType::Raw,
        AssetKind::Cover => ResourceType::Image,
    }
}

/// What happened to a previous asset value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Cleanup {
    /// Nothing to destroy: the slot was empty or held the placeholder.
    NotNeeded,
    #[serde(rename_all = "camelCase")]
    Destroyed { store_id: String },
    /// The destroy call failed; the object stays allocated but unreferenced.
    #[serde(rename_all = "camelCase")]
    Orphaned { store_id: String },
}

/// Result of replacing one slot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Replacement {
    pub kind: AssetKind,
    /// False when the upload failed and the slot kept its current value.
    pub replaced: bool,
    pub cleanup: Cleanup,
    #[serde(skip)]
    pub book: Book,
}

/// Destroy outcomes for both slots of a deleted book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCleanup {
    pub file: Cleanup,
    pub cover: Cleanup,
}

pub struct AssetLifecycle {
    store: Arc<dyn AssetStore>,
    records: Arc<dyn RecordStore>,
    layout: AssetLayout,
}

impl AssetLifecycle {
    pub fn new(
        store: Arc<dyn AssetStore>,
        records: Arc<dyn RecordStore>,
        layout: AssetLayout,
    ) -> Self {
        Self {
            store,
            records,
            layout,
        }
    }

    pub fn placeholder(&self) -> &Asset {
        &self.layout.placeholder
    }

    pub fn is_placeholder(&self, asset: &Asset) -> bool {
        asset.store_id == self.layout.placeholder.store_id
    }

    /// Upload a primary file, falling back to the placeholder on any failure.
    pub async fn upload_file(&self, payload: &AssetPayload) -> Asset {
        match self.upload(AssetKind::File, payload).await {
            Ok(asset) => asset,
            Err(err) => {
                tracing::warn!(
                    kind = %AssetKind::File,
                    error = %err,
                    "upload failed; using placeholder file"
                );
                self.layout.placeholder.clone()
            }
        }
    }

    /// Upload a cover image; a failure degrades to no cover.
    pub async fn upload_cover(&self, payload: &AssetPayload) -> Option<Asset> {
        match self.upload(AssetKind::Cover, payload).await {
            Ok(asset) => Some(asset),
            Err(err) => {
                tracing::warn!(
                    kind = %AssetKind::Cover,
                    error = %err,
                    "upload failed; continuing without cover"
                );
                None
            }
        }
    }

    /// Stage `payload` on disk and hand it to the store.
    ///
    /// The staged file is removed before this returns, whatever the outcome,
    /// and also if the returned future is dropped mid-upload.
    async fn upload(&self, kind: AssetKind, payload: &AssetPayload) -> Result<Asset, StoreError> {
        let staged = self.stage(payload.bytes.clone()).await?;
        let options = self.layout.upload_options(kind);

        let result = self
            .bounded(
                "upload",
                self.store
                    .upload(staged.path(), payload.content_type.as_deref(), &options),
            )
            .await;

        if let Err(err) = staged.close() {
            tracing::warn!(error = %err, "failed to remove staged upload");
        }

        let uploaded = result?;
        tracing::info!(
            %kind,
            store_id = %uploaded.public_id,
            size = payload.bytes.len(),
            "asset uploaded"
        );
        Ok(Asset::new(uploaded.secure_url, uploaded.public_id))
    }

    async fn bounded<T>(
        &self,
        call: &str,
        work: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit = self.layout.store_timeout;
        tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
            Err(StoreError::Unavailable(format!(
                "{} timed out after {} ms",
                call,
                limit.as_millis()
            )))
        })
    }

    async fn stage(&self, bytes: Bytes) -> std::io::Result<NamedTempFile> {
        let staging_dir = self.layout.staging_dir.clone();

        tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("libris-upload-");
            let mut file = match staging_dir {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)?
    }

    /// Replace one slot of `book` with `payload`.
    ///
    /// Order: upload, then point the record at the new asset, then destroy
    /// the previous one. If the upload fails the slot keeps its current value
    /// and nothing is destroyed. If the record write fails, the new upload is
    /// destroyed again and the error is returned.
    pub async fn replace(
        &self,
        book: &Book,
        kind: AssetKind,
        payload: &AssetPayload,
    ) -> Result<Replacement, DbError> {
        let previous = book.asset(kind).cloned();

        let asset = match self.upload(kind, payload).await {
            Ok(asset) => asset,
            Err(err) => {
                tracing::warn!(
                    book_id = %book.id,
                    %kind,
                    error = %err,
                    "replacement upload failed; keeping current asset"
                );
                return Ok(Replacement {
                    kind,
                    replaced: false,
                    cleanup: Cleanup::NotNeeded,
                    book: book.clone(),
                });
            }
        };

        let updated = match self
            .records
            .set_book_asset(book.id, kind, Some(asset.clone()))
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                tracing::error!(
                    book_id = %book.id,
                    %kind,
                    error = %err,
                    "failed to switch asset; discarding new upload"
                );
                self.destroy(kind, Some(&asset)).await;
                return Err(err);
            }
        };

        let cleanup = self.destroy(kind, previous.as_ref()).await;
        tracing::info!(book_id = %book.id, %kind, ?cleanup, "asset replaced");

        Ok(Replacement {
            kind,
            replaced: true,
            cleanup,
            book: updated,
        })
    }

    /// Destroy both slots of `book`. The two calls are independent of each other.
    pub async fn destroy_all(&self, book: &Book) -> AssetCleanup {
        let (file, cover) = tokio::join!(
            self.destroy(AssetKind::File, Some(&book.file_asset)),
            self.destroy(AssetKind::Cover, book.cover_asset.as_ref()),
        );
        AssetCleanup { file, cover }
    }

    async fn destroy(&self, kind: AssetKind, asset: Option<&Asset>) -> Cleanup {
        let asset = match asset {
            Some(asset) if !self.is_placeholder(asset) => asset,
            _ => return Cleanup::NotNeeded,
        };
        let store_id = asset.store_id.clone();

        match self
            .bounded("destroy", self.store.destroy(&store_id, resource_type(kind)))
            .await
        {
            Ok(()) => Cleanup::Destroyed { store_id },
            Err(err) => {
                tracing::warn!(
                    %kind,
                    store_id = %store_id,
                    error = %err,
                    "failed to destroy asset; leaving it orphaned"
                );
                Cleanup::Orphaned { store_id }
            }
        }
    }
}
