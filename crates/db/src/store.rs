use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Asset, AssetKind, Book, BookChanges, BookId, RatingSummary, Review, ReviewChanges, ReviewId,
    UserId,
};

/// Failures reported by a record store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// A unique index rejected the write.
    #[error("unique constraint '{index}' violated")]
    UniqueViolation { index: &'static str },

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Review query; unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewFilter {
    pub book: Option<BookId>,
    pub user: Option<UserId>,
}

impl ReviewFilter {
    pub fn for_book(book: BookId) -> Self {
        Self {
            book: Some(book),
            user: None,
        }
    }

    pub fn for_book_and_user(book: BookId, user: UserId) -> Self {
        Self {
            book: Some(book),
            user: Some(user),
        }
    }

    pub fn matches(&self, review: &Review) -> bool {
        self.book.map_or(true, |book| review.book_id == book)
            && self.user.map_or(true, |user| review.user_id == user)
    }
}

/// Durable storage for books and reviews.
///
/// Implementations must enforce at most one review per (book, user) pair,
/// reporting a second one as [`DbError::UniqueViolation`]. A review may only
/// reference an existing book: `insert_review` checks this atomically with
/// the insert, and `delete_book` removes any review still referencing the
/// book, so no review outlives its book.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_book(&self, book: Book) -> DbResult<Book>;

    async fn find_book(&self, id: BookId) -> DbResult<Option<Book>>;

    async fn list_book_ids(&self) -> DbResult<Vec<BookId>>;

    /// Point one asset slot at a new value. `None` is only meaningful for covers.
    async fn set_book_asset(
        &self,
        id: BookId,
        kind: AssetKind,
        asset: Option<Asset>,
    ) -> DbResult<Book>;

    async fn set_book_metadata(&self, id: BookId, changes: &BookChanges) -> DbResult<Book>;

    async fn set_rating_summary(&self, id: BookId, summary: RatingSummary) -> DbResult<()>;

    /// Delete a book together with any review still referencing it,
    /// returning how many such reviews were removed.
    async fn delete_book(&self, id: BookId) -> DbResult<u64>;

    /// Fails with [`DbError::NotFound`] when the referenced book is gone.
    async fn insert_review(&self, review: Review) -> DbResult<Review>;

    async fn find_review(&self, id: ReviewId) -> DbResult<Option<Review>>;

    async fn find_reviews(&self, filter: ReviewFilter) -> DbResult<Vec<Review>>;

    async fn update_review(&self, id: ReviewId, changes: &ReviewChanges) -> DbResult<Review>;

    async fn delete_review(&self, id: ReviewId) -> DbResult<()>;

    /// Delete every matching review, returning how many were removed.
    async fn delete_reviews(&self, filter: ReviewFilter) -> DbResult<u64>;
}
