//! Cross-entity sequencing for the catalog.
//!
//! The coordinator is the only caller of the aggregator and the asset
//! lifecycle. Every review mutation is followed by exactly one recompute of
//! its book; every book deletion cascades to reviews, then assets, then the
//! record itself.

use std::sync::Arc;

use libris_authz::{Actor, Authorizer};
use libris_db::{
    AssetKind, Book, BookChanges, BookDraft, BookId, ModelError, Rating, RatingSummary, RecordStore, Review,
    ReviewChanges, ReviewFilter, ReviewId,
};
use serde::Serialize;

use super::aggregator::RatingAggregator;
use super::assets::{AssetCleanup, AssetLifecycle, AssetPayload, Replacement};
use super::error::{AggregateWriteError, CatalogError};

/// Caller-supplied book metadata, validated into a [`BookDraft`] on create.
#[derive(Debug, Clone, Default)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub description: String,
    pub category: String,
}

/// A committed review mutation and the outcome of the recompute it triggered.
#[derive(Debug)]
pub struct ReviewOutcome<T> {
    pub value: T,
    pub aggregate: Result<RatingSummary, AggregateWriteError>,
}

impl<T> ReviewOutcome<T> {
    /// Message for a failed recompute; the mutation itself stands.
    pub fn warning(&self) -> Option<String> {
        self.aggregate.as_ref().err().map(ToString::to_string)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetUpdate {
    pub book: Book,
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDeletion {
    pub book_id: BookId,
    pub reviews_removed: u64,
    pub assets: AssetCleanup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub books: usize,
    pub failed: usize,
}

pub struct Coordinator {
    records: Arc<dyn RecordStore>,
    assets: AssetLifecycle,
    aggregator: RatingAggregator,
    authorizer: Arc<dyn Authorizer>,
    require_primary_file: bool,
}

impl Coordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        assets: AssetLifecycle,
        aggregator: RatingAggregator,
        authorizer: Arc<dyn Authorizer>,
        require_primary_file: bool,
    ) -> Self {
        Self {
            records,
            assets,
            aggregator,
            authorizer,
            require_primary_file,
        }
    }

    /// Validate `metadata`, upload the supplied payloads and persist the book.
    ///
    /// A missing primary file yields the shared placeholder unless a primary
    /// file is required. If the insert fails the fresh uploads are destroyed.
    pub async fn create_book(
        &self,
        actor: &Actor,
        metadata: &BookMetadata,
        file: Option<AssetPayload>,
        cover: Option<AssetPayload>,
    ) -> Result<Book, CatalogError> {
        let draft = BookDraft::new(
            &metadata.title,
            &metadata.author,
            &metadata.description,
            &metadata.category,
            actor.user_id,
        )?;

        if file.is_none() && self.require_primary_file {
            return Err(ModelError::MissingField("file").into());
        }

        let (file_asset, cover_asset) = tokio::join!(
            async {
                match &file {
                    Some(payload) => self.assets.upload_file(payload).await,
                    None => {
                        tracing::info!(title = draft.title(), "no primary file supplied; using placeholder");
                        self.assets.placeholder().clone()
                    }
                }
            },
            async {
                match &cover {
                    Some(payload) => self.assets.upload_cover(payload).await,
                    None => None,
                }
            },
        );

        let book = Book::new(draft, file_asset, cover_asset, self.aggregator.baseline());
        match self.records.insert_book(book.clone()).await {
            Ok(book) => {
                tracing::info!(
                    book_id = %book.id,
                    owner = %book.owner,
                    category = %book.category,
                    placeholder = self.assets.is_placeholder(&book.file_asset),
                    "book created"
                );
                Ok(book)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to insert book; discarding uploads");
                self.assets.destroy_all(&book).await;
                Err(err.into())
            }
        }
    }

    pub async fn get_book(&self, book_id: BookId) -> Result<Book, CatalogError> {
        self.records
            .find_book(book_id)
            .await?
            .ok_or_else(|| CatalogError::book_not_found(book_id))
    }

    pub async fn list_reviews(&self, book_id: BookId) -> Result<Vec<Review>, CatalogError> {
        self.get_book(book_id).await?;
        Ok(self
            .records
            .find_reviews(ReviewFilter::for_book(book_id))
            .await?)
    }

    /// Apply metadata edits to a book; unsupplied fields are untouched.
    pub async fn update_book(
        &self,
        actor: &Actor,
        book_id: BookId,
        changes: &BookChanges,
    ) -> Result<Book, CatalogError> {
        let book = self.get_book(book_id).await?;
        self.authorize(actor, book.owner, "update this book")?;

        if changes.is_empty() {
            return Ok(book);
        }

        let book = self.records.set_book_metadata(book_id, changes).await?;
        tracing::info!(%book_id, "book metadata updated");
        Ok(book)
    }

    /// Replace the supplied slots of a book; unsupplied slots are untouched.
    pub async fn update_book_assets(
        &self,
        actor: &Actor,
        book_id: BookId,
        file: Option<AssetPayload>,
        cover: Option<AssetPayload>,
    ) -> Result<AssetUpdate, CatalogError> {
        let mut book = self.get_book(book_id).await?;
        self.authorize(actor, book.owner, "update the assets of this book")?;

        let mut replacements = Vec::new();
        for (kind, payload) in [(AssetKind::File, file), (AssetKind::Cover, cover)] {
            let Some(payload) = payload else {
                continue;
            };
            let replacement = self.assets.replace(&book, kind, &payload).await?;
            book = replacement.book.clone();
            replacements.push(replacement);
        }

        Ok(AssetUpdate { book, replacements })
    }

    /// Delete a book with its reviews and assets, in that order.
    ///
    /// If the final record delete fails the assets are already gone; calling
    /// this again is safe because asset destroy is idempotent.
    pub async fn delete_book(
        &self,
        actor: &Actor,
        book_id: BookId,
    ) -> Result<BookDeletion, CatalogError> {
        let book = self.get_book(book_id).await?;
        self.authorize(actor, book.owner, "delete this book")?;

        let reviews_removed = self
            .records
            .delete_reviews(ReviewFilter::for_book(book_id))
            .await?;
        let assets = self.assets.destroy_all(&book).await;

        // Reviews that landed after the bulk delete go with the record.
        let late_reviews = match self.records.delete_book(book_id).await {
            Ok(swept) => swept,
            Err(err) => {
                tracing::error!(
                    %book_id,
                    error = %err,
                    "book record survived deletion of its reviews and assets"
                );
                return Err(err.into());
            }
        };
        let reviews_removed = reviews_removed + late_reviews;

        tracing::info!(%book_id, reviews_removed, "book deleted");
        Ok(BookDeletion {
            book_id,
            reviews_removed,
            assets,
        })
    }

    pub async fn add_review(
        &self,
        actor: &Actor,
        book_id: BookId,
        rating: Rating,
        comment: &str,
    ) -> Result<ReviewOutcome<Review>, CatalogError> {
        let review = Review::new(book_id, actor.user_id, rating, comment)?;
        self.get_book(book_id).await?;

        let existing = self
            .records
            .find_reviews(ReviewFilter::for_book_and_user(book_id, actor.user_id))
            .await?;
        if !existing.is_empty() {
            return Err(CatalogError::ConstraintViolation(
                "this user has already reviewed this book".to_string(),
            ));
        }

        // The unique index still decides between concurrent duplicates.
        let review = self.records.insert_review(review).await?;
        tracing::info!(%book_id, review_id = %review.id, rating = rating.value(), "review added");

        let aggregate = self.aggregator.recompute(book_id).await;
        Ok(ReviewOutcome {
            value: review,
            aggregate,
        })
    }

    pub async fn update_review(
        &self,
        actor: &Actor,
        review_id: ReviewId,
        changes: ReviewChanges,
    ) -> Result<ReviewOutcome<Review>, CatalogError> {
        let review = self.find_review(review_id).await?;
        self.authorize(actor, review.user_id, "update this review")?;

        let review = self.records.update_review(review_id, &changes).await?;
        tracing::info!(book_id = %review.book_id, %review_id, "review updated");

        let aggregate = self.aggregator.recompute(review.book_id).await;
        Ok(ReviewOutcome {
            value: review,
            aggregate,
        })
    }

    pub async fn delete_review(
        &self,
        actor: &Actor,
        review_id: ReviewId,
    ) -> Result<ReviewOutcome<ReviewId>, CatalogError> {
        let review = self.find_review(review_id).await?;
        self.authorize(actor, review.user_id, "delete this review")?;

        self.records.delete_review(review_id).await?;
        tracing::info!(book_id = %review.book_id, %review_id, "review deleted");

        let aggregate = self.aggregator.recompute(review.book_id).await;
        Ok(ReviewOutcome {
            value: review_id,
            aggregate,
        })
    }

    /// Recompute the aggregate of every book.
    pub async fn reconcile_all(&self, actor: &Actor) -> Result<Reconciliation, CatalogError> {
        if !self.authorizer.may_administer(actor) {
            return Err(CatalogError::Forbidden(
                "only administrators may reconcile ratings".to_string(),
            ));
        }

        let mut report = Reconciliation::default();
        for book_id in self.records.list_book_ids().await? {
            report.books += 1;
            if self.aggregator.recompute(book_id).await.is_err() {
                report.failed += 1;
            }
        }

        tracing::info!(books = report.books, failed = report.failed, "reconciliation finished");
        Ok(report)
    }

    async fn find_review(&self, review_id: ReviewId) -> Result<Review, CatalogError> {
        self.records
            .find_review(review_id)
            .await?
            .ok_or(CatalogError::NotFound {
                entity: "review",
                id: review_id,
            })
    }

    fn authorize(&self, actor: &Actor, owner: uuid::Uuid, action: &str) -> Result<(), CatalogError> {
        if self.authorizer.may_modify(actor, owner) {
            Ok(())
        } else {
            Err(CatalogError::Forbidden(format!("not allowed to {}", action)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::assets::Cleanup;
    use crate::modules::books::testing::{payload, Harness, BASELINE};
    use libris_storage::StoreCall;
    use uuid::Uuid;

    fn metadata() -> BookMetadata {
        BookMetadata {
            title: "The Left Hand of Darkness".to_string(),
            author: "Ursula K. Le Guin".to_string(),
            description: "Winter".to_string(),
            category: "Fiction".to_string(),
        }
    }

    fn rating(value: i64) -> Rating {
        Rating::new(value).unwrap()
    }

    async fn create(harness: &Harness, owner: &Actor) -> Book {
        harness
            .coordinator
            .create_book(
                owner,
                &metadata(),
                Some(payload(b"%PDF-1.7", "application/pdf")),
                Some(payload(b"\x89PNG", "image/png")),
            )
            .await
            .unwrap()
    }

    async fn review_count(harness: &Harness, book_id: BookId) -> usize {
        harness
            .records
            .find_reviews(ReviewFilter::for_book(book_id))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn review_and_asset_scenario() {
        let harness = Harness::new();
        let coordinator = &harness.coordinator;
        let owner = Actor::user(Uuid::new_v4());
        let user_a = Actor::user(Uuid::new_v4());
        let user_b = Actor::user(Uuid::new_v4());

        let book = create(&harness, &owner).await;
        assert_eq!(book.review_count, 0);
        assert_eq!(book.average_rating, BASELINE);
        assert!(harness.store.contains(&book.file_asset.store_id));
        assert!(book.file_asset.url.starts_with("memory://raw/"));

        let review_a = coordinator
            .add_review(&user_a, book.id, rating(5), "superb")
            .await
            .unwrap();
        coordinator
            .add_review(&user_b, book.id, rating(3), "fine")
            .await
            .unwrap();
        let current = coordinator.get_book(book.id).await.unwrap();
        assert_eq!(current.review_count, 2);
        assert!((current.average_rating - 4.0).abs() < f64::EPSILON);

        coordinator
            .delete_review(&user_a, review_a.value.id)
            .await
            .unwrap();
        let current = coordinator.get_book(book.id).await.unwrap();
        assert_eq!(current.review_count, 1);
        assert!((current.average_rating - 3.0).abs() < f64::EPSILON);

        let err = coordinator
            .add_review(&user_b, book.id, rating(1), "again")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::ConstraintViolation(_)));
        assert_eq!(coordinator.get_book(book.id).await.unwrap(), current);

        let old_cover = current.cover_asset.clone().unwrap();
        harness.store.fail_destroy_of(old_cover.store_id.clone());
        let update = coordinator
            .update_book_assets(&owner, book.id, None, Some(payload(b"GIF89a", "image/gif")))
            .await
            .unwrap();
        let new_cover = update.book.cover_asset.clone().unwrap();
        assert_ne!(new_cover, old_cover);
        assert_eq!(
            update.replacements[0].cleanup,
            Cleanup::Orphaned {
                store_id: old_cover.store_id.clone()
            }
        );
        assert_eq!(
            coordinator.get_book(book.id).await.unwrap().cover_asset,
            Some(new_cover)
        );

        let destroys_before = harness.store.destroy_calls().len();
        let deletion = coordinator.delete_book(&owner, book.id).await.unwrap();
        assert_eq!(deletion.reviews_removed, 1);
        assert_eq!(review_count(&harness, book.id).await, 0);
        assert_eq!(harness.store.destroy_calls().len() - destroys_before, 2);
        assert!(matches!(
            coordinator.get_book(book.id).await,
            Err(CatalogError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn create_without_file_uses_placeholder() {
        let harness = Harness::new();
        let book = harness
            .coordinator
            .create_book(&Actor::user(Uuid::new_v4()), &metadata(), None, None)
            .await
            .unwrap();

        assert_eq!(book.file_asset.store_id, "digital_library/placeholder-book");
        assert!(book.cover_asset.is_none());
        assert!(harness.store.calls().is_empty());
    }

    #[tokio::test]
    async fn create_without_file_fails_when_required() {
        let harness = Harness::with_primary_file_required(true);
        let err = harness
            .coordinator
            .create_book(&Actor::user(Uuid::new_v4()), &metadata(), None, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CatalogError::Validation(ModelError::MissingField("file"))
        ));
    }

    #[tokio::test]
    async fn create_survives_store_outage() {
        let harness = Harness::new();
        harness.store.fail_uploads(true);

        let book = create(&harness, &Actor::user(Uuid::new_v4())).await;
        assert_eq!(book.file_asset.store_id, "digital_library/placeholder-book");
        assert!(book.cover_asset.is_none());
    }

    #[tokio::test]
    async fn invalid_metadata_uploads_nothing() {
        let harness = Harness::new();
        let mut bad = metadata();
        bad.category = "Poetry".to_string();

        let err = harness
            .coordinator
            .create_book(
                &Actor::user(Uuid::new_v4()),
                &bad,
                Some(payload(b"%PDF", "application/pdf")),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CatalogError::Validation(ModelError::UnknownCategory(_))
        ));
        assert!(harness.store.calls().is_empty());
    }

    #[tokio::test]
    async fn review_of_missing_book_is_not_found() {
        let harness = Harness::new();
        let err = harness
            .coordinator
            .add_review(&Actor::user(Uuid::new_v4()), Uuid::new_v4(), rating(4), "hm")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { entity: "book", .. }));
    }

    #[tokio::test]
    async fn counts_match_reviews_after_mixed_mutations() {
        let harness = Harness::new();
        let coordinator = &harness.coordinator;
        let book = create(&harness, &Actor::user(Uuid::new_v4())).await;

        let users: Vec<Actor> = (0..5).map(|_| Actor::user(Uuid::new_v4())).collect();
        let mut ids = Vec::new();
        for (user, value) in users.iter().zip([1, 2, 3, 4, 5]) {
            let outcome = coordinator
                .add_review(user, book.id, rating(value), "ok")
                .await
                .unwrap();
            ids.push(outcome.value.id);
        }

        let changes = ReviewChanges::new(Some(rating(5)), None).unwrap();
        coordinator
            .update_review(&users[0], ids[0], changes)
            .await
            .unwrap();
        coordinator.delete_review(&users[3], ids[3]).await.unwrap();

        let reviews = coordinator.list_reviews(book.id).await.unwrap();
        let current = coordinator.get_book(book.id).await.unwrap();
        let mean = reviews
            .iter()
            .map(|r| f64::from(r.rating.value()))
            .sum::<f64>()
            / reviews.len() as f64;

        assert_eq!(current.review_count as usize, reviews.len());
        assert_eq!(reviews.len(), 4);
        assert!((current.average_rating - mean).abs() < 1e-9);
    }

    #[tokio::test]
    async fn deleting_only_review_resets_to_baseline() {
        let harness = Harness::new();
        let user = Actor::user(Uuid::new_v4());
        let book = create(&harness, &Actor::user(Uuid::new_v4())).await;

        let outcome = harness
            .coordinator
            .add_review(&user, book.id, rating(4), "good")
            .await
            .unwrap();
        harness
            .coordinator
            .delete_review(&user, outcome.value.id)
            .await
            .unwrap();

        let current = harness.coordinator.get_book(book.id).await.unwrap();
        assert_eq!(current.review_count, 0);
        assert_eq!(current.average_rating, BASELINE);
    }

    #[tokio::test]
    async fn concurrent_duplicate_reviews_resolve_to_one() {
        let harness = Harness::new();
        let user = Actor::user(Uuid::new_v4());
        let book = create(&harness, &Actor::user(Uuid::new_v4())).await;

        let (first, second) = tokio::join!(
            harness.coordinator.add_review(&user, book.id, rating(2), "one"),
            harness.coordinator.add_review(&user, book.id, rating(4), "two"),
        );

        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );
        assert_eq!(review_count(&harness, book.id).await, 1);
        let current = harness.coordinator.get_book(book.id).await.unwrap();
        assert_eq!(current.review_count, 1);
    }

    #[tokio::test]
    async fn aggregate_write_failure_is_a_warning() {
        let harness = Harness::new();
        let user = Actor::user(Uuid::new_v4());
        let book = create(&harness, &Actor::user(Uuid::new_v4())).await;

        harness.records.fail_summary_writes(true);
        let outcome = harness
            .coordinator
            .add_review(&user, book.id, rating(5), "great")
            .await
            .unwrap();
        assert!(outcome.warning().is_some());
        assert_eq!(review_count(&harness, book.id).await, 1);
        assert_eq!(
            harness.coordinator.get_book(book.id).await.unwrap().review_count,
            0
        );

        harness.records.fail_summary_writes(false);
        let report = harness
            .coordinator
            .reconcile_all(&Actor::admin(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(report, Reconciliation { books: 1, failed: 0 });
        assert_eq!(
            harness.coordinator.get_book(book.id).await.unwrap().review_count,
            1
        );
    }

    #[tokio::test]
    async fn review_racing_book_deletion_is_rejected() {
        let harness = Harness::new();
        let owner = Actor::user(Uuid::new_v4());
        let book = create(&harness, &owner).await;

        harness.records.delete_book_before_review_insert(true);
        let err = harness
            .coordinator
            .add_review(&Actor::user(Uuid::new_v4()), book.id, rating(5), "late")
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::NotFound { entity: "book", .. }));
        assert_eq!(review_count(&harness, book.id).await, 0);
    }

    #[tokio::test]
    async fn metadata_update_is_validated_and_owner_only() {
        let harness = Harness::new();
        let owner = Actor::user(Uuid::new_v4());
        let book = create(&harness, &owner).await;
        let changes = BookChanges::new(Some("The Dispossessed"), None, None, Some("Science"))
            .unwrap();

        let err = harness
            .coordinator
            .update_book(&Actor::user(Uuid::new_v4()), book.id, &changes)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden(_)));

        let updated = harness
            .coordinator
            .update_book(&owner, book.id, &changes)
            .await
            .unwrap();
        assert_eq!(updated.title, "The Dispossessed");
        assert_eq!(updated.author, book.author);
        assert_eq!(updated.file_asset, book.file_asset);
        assert_eq!(harness.coordinator.get_book(book.id).await.unwrap(), updated);

        let unchanged = harness
            .coordinator
            .update_book(&owner, book.id, &BookChanges::default())
            .await
            .unwrap();
        assert_eq!(unchanged, updated);
    }

    #[tokio::test]
    async fn reconcile_requires_admin() {
        let harness = Harness::new();
        let err = harness
            .coordinator
            .reconcile_all(&Actor::user(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden(_)));
    }

    #[tokio::test]
    async fn strangers_cannot_touch_books_or_reviews() {
        let harness = Harness::new();
        let owner = Actor::user(Uuid::new_v4());
        let author = Actor::user(Uuid::new_v4());
        let stranger = Actor::user(Uuid::new_v4());
        let book = create(&harness, &owner).await;
        let review = harness
            .coordinator
            .add_review(&author, book.id, rating(4), "nice")
            .await
            .unwrap()
            .value;
        let uploads_before = harness.store.calls().len();

        let denied = [
            harness
                .coordinator
                .update_book_assets(&stranger, book.id, Some(payload(b"x", "application/pdf")), None)
                .await
                .err(),
            harness.coordinator.delete_book(&stranger, book.id).await.err(),
            harness
                .coordinator
                .delete_review(&stranger, review.id)
                .await
                .err(),
        ];
        for err in denied {
            assert!(matches!(err, Some(CatalogError::Forbidden(_))));
        }
        assert_eq!(harness.store.calls().len(), uploads_before);

        let admin = Actor::admin(Uuid::new_v4());
        harness
            .coordinator
            .delete_review(&admin, review.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn primary_replace_destroys_old_exactly_once() {
        let harness = Harness::new();
        let owner = Actor::user(Uuid::new_v4());
        let book = create(&harness, &owner).await;
        let old_id = book.file_asset.store_id.clone();

        let update = harness
            .coordinator
            .update_book_assets(&owner, book.id, Some(payload(b"v2", "application/pdf")), None)
            .await
            .unwrap();

        assert_eq!(update.replacements.len(), 1);
        assert_eq!(harness.store.destroy_calls(), vec![old_id.clone()]);
        assert_ne!(update.book.file_asset.store_id, old_id);
        assert_eq!(update.book.cover_asset, book.cover_asset);
    }

    #[tokio::test]
    async fn failed_book_delete_can_be_retried() {
        let harness = Harness::new();
        let owner = Actor::user(Uuid::new_v4());
        let book = create(&harness, &owner).await;

        harness.records.fail_book_deletes(true);
        assert!(harness.coordinator.delete_book(&owner, book.id).await.is_err());
        assert!(harness.coordinator.get_book(book.id).await.is_ok());

        harness.records.fail_book_deletes(false);
        harness.coordinator.delete_book(&owner, book.id).await.unwrap();

        let destroys = harness
            .store
            .calls()
            .into_iter()
            .filter(|call| matches!(call, StoreCall::Destroy { succeeded: true, .. }))
            .count();
        assert_eq!(destroys, 4);
    }
}
