//! Fixtures shared by the books module tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use libris_authz::OwnerOrAdmin;
use libris_db::{
    Asset, AssetKind, Book, BookChanges, BookDraft, BookId, DbError, DbResult, MemoryRecordStore,
    RatingSummary, RecordStore, Review, ReviewChanges, ReviewFilter, ReviewId,
};
use libris_kernel::settings::StorageSettings;
use libris_storage::MemoryAssetStore;
use uuid::Uuid;

use super::assets::{AssetLayout, AssetLifecycle, AssetPayload};
use super::{aggregator::RatingAggregator, coordinator::Coordinator};

pub const BASELINE: f64 = 1.0;

/// Memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyRecords {
    inner: MemoryRecordStore,
    fail_summary_writes: AtomicBool,
    fail_asset_writes: AtomicBool,
    fail_book_deletes: AtomicBool,
    delete_book_before_review_insert: AtomicBool,
}

impl FlakyRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_summary_writes(&self, fail: bool) {
        self.fail_summary_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_asset_writes(&self, fail: bool) {
        self.fail_asset_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_book_deletes(&self, fail: bool) {
        self.fail_book_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delete the referenced book right before the next review insert lands,
    /// as a concurrent book deletion would.
    pub fn delete_book_before_review_insert(&self, enabled: bool) {
        self.delete_book_before_review_insert
            .store(enabled, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> DbResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(DbError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for FlakyRecords {
    async fn insert_book(&self, book: Book) -> DbResult<Book> {
        self.inner.insert_book(book).await
    }

    async fn find_book(&self, id: BookId) -> DbResult<Option<Book>> {
        self.inner.find_book(id).await
    }

    async fn list_book_ids(&self) -> DbResult<Vec<BookId>> {
        self.inner.list_book_ids().await
    }

    async fn set_book_asset(
        &self,
        id: BookId,
        kind: AssetKind,
        asset: Option<Asset>,
    ) -> DbResult<Book> {
        Self::check(&self.fail_asset_writes)?;
        self.inner.set_book_asset(id, kind, asset).await
    }

    async fn set_book_metadata(&self, id: BookId, changes: &BookChanges) -> DbResult<Book> {
        self.inner.set_book_metadata(id, changes).await
    }

    async fn set_rating_summary(&self, id: BookId, summary: RatingSummary) -> DbResult<()> {
        Self::check(&self.fail_summary_writes)?;
        self.inner.set_rating_summary(id, summary).await
    }

    async fn delete_book(&self, id: BookId) -> DbResult<u64> {
        Self::check(&self.fail_book_deletes)?;
        self.inner.delete_book(id).await
    }

    async fn insert_review(&self, review: Review) -> DbResult<Review> {
        if self
            .delete_book_before_review_insert
            .swap(false, Ordering::SeqCst)
        {
            self.inner.delete_book(review.book_id).await?;
        }
        self.inner.insert_review(review).await
    }

    async fn find_review(&self, id: ReviewId) -> DbResult<Option<Review>> {
        self.inner.find_review(id).await
    }

    async fn find_reviews(&self, filter: ReviewFilter) -> DbResult<Vec<Review>> {
        self.inner.find_reviews(filter).await
    }

    async fn update_review(&self, id: ReviewId, changes: &ReviewChanges) -> DbResult<Review> {
        self.inner.update_review(id, changes).await
    }

    async fn delete_review(&self, id: ReviewId) -> DbResult<()> {
        self.inner.delete_review(id).await
    }

    async fn delete_reviews(&self, filter: ReviewFilter) -> DbResult<u64> {
        self.inner.delete_reviews(filter).await
    }
}

/// Insert a book with a live primary file and no cover.
pub async fn seed_book(records: &dyn RecordStore) -> Book {
    let draft = BookDraft::new("Dune", "Frank Herbert", "Spice", "Fiction", Uuid::new_v4())
        .expect("valid draft");
    let book = Book::new(
        draft,
        Asset::new("memory://raw/seed", "digital_library/books/seed"),
        None,
        BASELINE,
    );
    records.insert_book(book).await.expect("insert book")
}

pub fn payload(bytes: &'static [u8], content_type: &str) -> AssetPayload {
    AssetPayload::new(Bytes::from_static(bytes), Some(content_type.to_string()))
}

pub fn layout() -> AssetLayout {
    AssetLayout::from_settings(&StorageSettings::default())
}

/// A coordinator wired to in-memory collaborators, plus handles on them.
pub struct Harness {
    pub records: Arc<FlakyRecords>,
    pub store: Arc<MemoryAssetStore>,
    pub coordinator: Coordinator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_primary_file_required(false)
    }

    pub fn with_primary_file_required(require_primary_file: bool) -> Self {
        let records = Arc::new(FlakyRecords::new());
        let store = Arc::new(MemoryAssetStore::new());
        let lifecycle = AssetLifecycle::new(store.clone(), records.clone(), layout());
        let aggregator = RatingAggregator::new(records.clone(), BASELINE);
        let coordinator = Coordinator::new(
            records.clone(),
            lifecycle,
            aggregator,
            Arc::new(OwnerOrAdmin),
            require_primary_file,
        );

        Self {
            records,
            store,
            coordinator,
        }
    }
}
