//! Review aggregate maintenance.
//!
//! The aggregate is always rebuilt from the full review set of a book, never
//! adjusted by deltas, so a recompute is idempotent and any stale value left
//! by a failed or racing write is replaced by the next one.

use std::sync::Arc;

use libris_db::{BookId, Rating, RatingSummary, RecordStore, ReviewFilter};

use super::error::AggregateWriteError;

/// Count and arithmetic mean of `ratings`, or the baseline when there are none.
pub fn summarize(ratings: impl IntoIterator<Item = Rating>, baseline_rating: f64) -> RatingSummary {
    let (count, total) = ratings
        .into_iter()
        .fold((0u32, 0u64), |(count, total), rating| {
            (count + 1, total + u64::from(rating.value()))
        });

    RatingSummary {
        average_rating: if count == 0 {
            baseline_rating
        } else {
            total as f64 / f64::from(count)
        },
        review_count: count,
    }
}

pub struct RatingAggregator {
    records: Arc<dyn RecordStore>,
    baseline_rating: f64,
}

impl RatingAggregator {
    pub fn new(records: Arc<dyn RecordStore>, baseline_rating: f64) -> Self {
        Self {
            records,
            baseline_rating,
        }
    }

    /// Average rating of a book without reviews.
    pub fn baseline(&self) -> f64 {
        self.baseline_rating
    }

    /// Rebuild and persist the rating summary of `book_id`.
    ///
    /// Failures are logged here; callers treat them as warnings.
    pub async fn recompute(&self, book_id: BookId) -> Result<RatingSummary, AggregateWriteError> {
        let reviews = match self.records.find_reviews(ReviewFilter::for_book(book_id)).await {
            Ok(reviews) => reviews,
            Err(source) => {
                tracing::error!(%book_id, error = %source, "failed to read reviews for recompute");
                return Err(AggregateWriteError::Read { book_id, source });
            }
        };

        let summary = summarize(reviews.iter().map(|r| r.rating), self.baseline_rating);

        if let Err(source) = self.records.set_rating_summary(book_id, summary).await {
            tracing::error!(%book_id, error = %source, "failed to store rating summary");
            return Err(AggregateWriteError::Write { book_id, source });
        }

        tracing::debug!(
            %book_id,
            review_count = summary.review_count,
            average_rating = summary.average_rating,
            "rating summary recomputed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::testing::{seed_book, FlakyRecords};
    use libris_db::Review;
    use uuid::Uuid;

    fn ratings(values: &[i64]) -> Vec<Rating> {
        values.iter().map(|v| Rating::new(*v).unwrap()).collect()
    }

    #[test]
    fn empty_set_yields_baseline() {
        let summary = summarize(Vec::new(), 1.0);
        assert_eq!(summary.review_count, 0);
        assert_eq!(summary.average_rating, 1.0);
    }

    #[test]
    fn mean_of_ratings() {
        let summary = summarize(ratings(&[5, 3, 4, 4]), 1.0);
        assert_eq!(summary.review_count, 4);
        assert!((summary.average_rating - 4.0).abs() < f64::EPSILON);

        let summary = summarize(ratings(&[1, 2]), 1.0);
        assert!((summary.average_rating - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn recompute_persists_summary_and_is_idempotent() {
        let records = Arc::new(FlakyRecords::new());
        let book = seed_book(records.as_ref()).await;
        for rating in [5, 2] {
            let review =
                Review::new(book.id, Uuid::new_v4(), Rating::new(rating).unwrap(), "ok").unwrap();
            records.insert_review(review).await.unwrap();
        }

        let aggregator = RatingAggregator::new(records.clone(), 1.0);
        let first = aggregator.recompute(book.id).await.unwrap();
        let second = aggregator.recompute(book.id).await.unwrap();
        assert_eq!(first, second);

        let stored = records.find_book(book.id).await.unwrap().unwrap();
        assert_eq!(stored.review_count, 2);
        assert!((stored.average_rating - 3.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn write_failure_is_reported_and_heals_on_next_recompute() {
        let records = Arc::new(FlakyRecords::new());
        let book = seed_book(records.as_ref()).await;
        let review = Review::new(book.id, Uuid::new_v4(), Rating::new(4).unwrap(), "ok").unwrap();
        records.insert_review(review).await.unwrap();

        let aggregator = RatingAggregator::new(records.clone(), 1.0);
        records.fail_summary_writes(true);
        assert!(matches!(
            aggregator.recompute(book.id).await,
            Err(AggregateWriteError::Write { .. })
        ));
        assert_eq!(
            records.find_book(book.id).await.unwrap().unwrap().review_count,
            0
        );

        records.fail_summary_writes(false);
        aggregator.recompute(book.id).await.unwrap();
        assert_eq!(
            records.find_book(book.id).await.unwrap().unwrap().review_count,
            1
        );
    }
}
