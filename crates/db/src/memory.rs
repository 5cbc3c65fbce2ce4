//! In-process record store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{
    Asset, AssetKind, Book, BookChanges, BookId, RatingSummary, Review, ReviewChanges, ReviewId,
    UserId,
};
use crate::store::{DbError, DbResult, RecordStore, ReviewFilter};

const REVIEW_BOOK_USER_UNIQUE: &str = "review_book_user_unique";

#[derive(Default)]
struct Tables {
    books: HashMap<BookId, Book>,
    reviews: HashMap<ReviewId, Review>,
    /// Unique index over (book, user).
    review_owner: HashMap<(BookId, UserId), ReviewId>,
}

impl Tables {
    fn remove_review(&mut self, id: ReviewId) -> Option<Review> {
        let review = self.reviews.remove(&id)?;
        self.review_owner.remove(&(review.book_id, review.user_id));
        Some(review)
    }
}

/// Record store kept entirely in memory. Every operation takes the table
/// lock once, so index checks and writes are atomic with respect to each other.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn book_not_found(id: BookId) -> DbError {
    DbError::NotFound { entity: "book", id }
}

fn review_not_found(id: ReviewId) -> DbError {
    DbError::NotFound {
        entity: "review",
        id,
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_book(&self, book: Book) -> DbResult<Book> {
        let mut tables = self.tables.write().await;
        tables.books.insert(book.id, book.clone());
        Ok(book)
    }

    async fn find_book(&self, id: BookId) -> DbResult<Option<Book>> {
        Ok(self.tables.read().await.books.get(&id).cloned())
    }

    async fn list_book_ids(&self) -> DbResult<Vec<BookId>> {
        let mut ids: Vec<BookId> = self.tables.read().await.books.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_book_asset(
        &self,
        id: BookId,
        kind: AssetKind,
        asset: Option<Asset>,
    ) -> DbResult<Book> {
        let mut tables = self.tables.write().await;
        let book = tables.books.get_mut(&id).ok_or_else(|| book_not_found(id))?;

        match (kind, asset) {
            (AssetKind::File, Some(asset)) => book.file_asset = asset,
            (AssetKind::File, None) => {
                return Err(DbError::Rejected(
                    "the primary file slot cannot be cleared".to_string(),
                ))
            }
            (AssetKind::Cover, asset) => book.cover_asset = asset,
        }

        Ok(book.clone())
    }

    async fn set_book_metadata(&self, id: BookId, changes: &BookChanges) -> DbResult<Book> {
        let mut tables = self.tables.write().await;
        let book = tables.books.get_mut(&id).ok_or_else(|| book_not_found(id))?;
        changes.apply(book);
        Ok(book.clone())
    }

    async fn set_rating_summary(&self, id: BookId, summary: RatingSummary) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let book = tables.books.get_mut(&id).ok_or_else(|| book_not_found(id))?;
        book.average_rating = summary.average_rating;
        book.review_count = summary.review_count;
        Ok(())
    }

    async fn delete_book(&self, id: BookId) -> DbResult<u64> {
        let mut tables = self.tables.write().await;
        tables.books.remove(&id).ok_or_else(|| book_not_found(id))?;

        let orphans: Vec<ReviewId> = tables
            .reviews
            .values()
            .filter(|review| review.book_id == id)
            .map(|review| review.id)
            .collect();
        for review_id in &orphans {
            tables.remove_review(*review_id);
        }
        Ok(orphans.len() as u64)
    }

    async fn insert_review(&self, review: Review) -> DbResult<Review> {
        let mut tables = self.tables.write().await;
        if !tables.books.contains_key(&review.book_id) {
            return Err(book_not_found(review.book_id));
        }

        let key = (review.book_id, review.user_id);

        if tables.review_owner.contains_key(&key) {
            return Err(DbError::UniqueViolation {
                index: REVIEW_BOOK_USER_UNIQUE,
            });
        }

        tables.review_owner.insert(key, review.id);
        tables.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    async fn find_review(&self, id: ReviewId) -> DbResult<Option<Review>> {
        Ok(self.tables.read().await.reviews.get(&id).cloned())
    }

    async fn find_reviews(&self, filter: ReviewFilter) -> DbResult<Vec<Review>> {
        let tables = self.tables.read().await;
        let mut reviews: Vec<Review> = tables
            .reviews
            .values()
            .filter(|review| filter.matches(review))
            .cloned()
            .collect();
        reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(reviews)
    }

    async fn update_review(&self, id: ReviewId, changes: &ReviewChanges) -> DbResult<Review> {
        let mut tables = self.tables.write().await;
        let review = tables
            .reviews
            .get_mut(&id)
            .ok_or_else(|| review_not_found(id))?;
        changes.apply(review);
        Ok(review.clone())
    }

    async fn delete_review(&self, id: ReviewId) -> DbResult<()> {
        self.tables
            .write()
            .await
            .remove_review(id)
            .map(|_| ())
            .ok_or_else(|| review_not_found(id))
    }

    async fn delete_reviews(&self, filter: ReviewFilter) -> DbResult<u64> {
        let mut tables = self.tables.write().await;
        let doomed: Vec<ReviewId> = tables
            .reviews
            .values()
            .filter(|review| filter.matches(review))
            .map(|review| review.id)
            .collect();

        for id in &doomed {
            tables.remove_review(*id);
        }

        tracing::debug!(removed = doomed.len(), "reviews deleted");
        Ok(doomed.len() as u64)
    }
}
