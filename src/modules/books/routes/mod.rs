//! HTTP handlers for the books module. Each handler extracts the caller,
//! delegates to the coordinator and renders the result.

mod extract;

use std::{future::Future, sync::Arc};

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use libris_db::{Book, BookId, Rating, Review, ReviewChanges, ReviewId};
use libris_http::AppError;

use super::{
    coordinator::{AssetUpdate, BookDeletion, Coordinator, Reconciliation},
    error::CatalogError,
    models::{CreateReview, DeletedReview, Mutation, UpdateReview},
};
pub use extract::{CurrentActor, USER_ID_HEADER, USER_ROLE_HEADER};
use extract::BookForm;

type Catalog = State<Arc<Coordinator>>;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/", post(create_book))
        .route("/health", get(health_check))
        .route("/reconcile", post(reconcile))
        .route("/reviews/{review_id}", put(update_review).delete(delete_review))
        .route("/{book_id}", get(get_book).put(update_book).delete(delete_book))
        .route("/{book_id}/assets", put(update_assets))
        .route("/{book_id}/reviews", get(list_reviews).post(add_review))
        .with_state(coordinator)
}

/// Run a mutation on its own task. A request that times out or disconnects
/// drops only the wait; the sequence of store calls still runs to the end.
async fn detached<T, F>(work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, CatalogError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|err| AppError::Internal(anyhow::Error::new(err)))?
        .map_err(AppError::from)
}

async fn health_check() -> &'static str {
    "books module is healthy"
}

async fn create_book(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Book>), AppError> {
    let form = BookForm::read(multipart).await?;
    let metadata = form.metadata();
    let book = detached(async move {
        catalog
            .create_book(&actor, &metadata, form.file, form.cover)
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(
    State(catalog): Catalog,
    Path(book_id): Path<BookId>,
) -> Result<Json<Book>, AppError> {
    Ok(Json(catalog.get_book(book_id).await?))
}

/// Edit metadata fields and/or replace assets from one multipart form.
async fn update_book(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
    Path(book_id): Path<BookId>,
    multipart: Multipart,
) -> Result<Json<AssetUpdate>, AppError> {
    let form = BookForm::read(multipart).await?;
    let changes = form.changes().map_err(CatalogError::from)?;
    if changes.is_empty() && !form.has_assets() {
        return Err(AppError::bad_request("nothing to update"));
    }

    let update = detached(async move {
        let book = catalog.update_book(&actor, book_id, &changes).await?;
        if !form.has_assets() {
            return Ok(AssetUpdate {
                book,
                replacements: Vec::new(),
            });
        }
        catalog
            .update_book_assets(&actor, book_id, form.file, form.cover)
            .await
    })
    .await?;
    Ok(Json(update))
}

async fn update_assets(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
    Path(book_id): Path<BookId>,
    multipart: Multipart,
) -> Result<Json<AssetUpdate>, AppError> {
    let form = BookForm::read(multipart).await?;
    if !form.has_assets() {
        return Err(AppError::bad_request(
            "expected a 'file' or 'coverImage' part",
        ));
    }

    let update = detached(async move {
        catalog
            .update_book_assets(&actor, book_id, form.file, form.cover)
            .await
    })
    .await?;
    Ok(Json(update))
}

async fn delete_book(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
    Path(book_id): Path<BookId>,
) -> Result<Json<BookDeletion>, AppError> {
    let deletion = detached(async move { catalog.delete_book(&actor, book_id).await }).await?;
    Ok(Json(deletion))
}

async fn list_reviews(
    State(catalog): Catalog,
    Path(book_id): Path<BookId>,
) -> Result<Json<Vec<Review>>, AppError> {
    Ok(Json(catalog.list_reviews(book_id).await?))
}

async fn add_review(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
    Path(book_id): Path<BookId>,
    Json(body): Json<CreateReview>,
) -> Result<(StatusCode, Json<Mutation<Review>>), AppError> {
    let rating = Rating::new(body.rating).map_err(CatalogError::from)?;
    let outcome = detached(async move {
        catalog
            .add_review(&actor, book_id, rating, &body.comment)
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

async fn update_review(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
    Path(review_id): Path<ReviewId>,
    Json(body): Json<UpdateReview>,
) -> Result<Json<Mutation<Review>>, AppError> {
    let rating = body
        .rating
        .map(Rating::new)
        .transpose()
        .map_err(CatalogError::from)?;
    let changes =
        ReviewChanges::new(rating, body.comment.as_deref()).map_err(CatalogError::from)?;
    if changes.is_empty() {
        return Err(AppError::bad_request("nothing to update"));
    }

    let outcome =
        detached(async move { catalog.update_review(&actor, review_id, changes).await }).await?;
    Ok(Json(outcome.into()))
}

async fn delete_review(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
    Path(review_id): Path<ReviewId>,
) -> Result<Json<Mutation<DeletedReview>>, AppError> {
    let outcome = detached(async move { catalog.delete_review(&actor, review_id).await }).await?;
    let warnings = outcome.warning().into_iter().collect();
    Ok(Json(Mutation {
        data: DeletedReview { id: outcome.value },
        warnings,
    }))
}

async fn reconcile(
    State(catalog): Catalog,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Reconciliation>, AppError> {
    let report = detached(async move { catalog.reconcile_all(&actor).await }).await?;
    Ok(Json(report))
}
