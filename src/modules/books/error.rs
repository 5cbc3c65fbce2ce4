use libris_db::{BookId, DbError, ModelError};
use libris_http::AppError;
use serde_json::json;
use uuid::Uuid;

/// Errors surfaced by catalog operations. None of them leave state mutated.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ModelError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{0}")]
    ConstraintViolation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("record store failure: {0}")]
    RecordStore(DbError),
}

impl CatalogError {
    pub fn book_not_found(id: BookId) -> Self {
        Self::NotFound { entity: "book", id }
    }
}

impl From<DbError> for CatalogError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => Self::NotFound { entity, id },
            DbError::UniqueViolation { index } => {
                tracing::debug!(index, "unique index rejected write");
                Self::ConstraintViolation("this user has already reviewed this book".to_string())
            }
            other => Self::RecordStore(other),
        }
    }
}

/// A recompute that could not be persisted. Non-fatal: the next recompute
/// of the same book repairs the stored aggregate.
#[derive(Debug, thiserror::Error)]
pub enum AggregateWriteError {
    #[error("could not read reviews of book {book_id}: {source}")]
    Read {
        book_id: BookId,
        #[source]
        source: DbError,
    },

    #[error("could not store rating summary of book {book_id}: {source}")]
    Write {
        book_id: BookId,
        #[source]
        source: DbError,
    },
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(err) => {
                let message = err.to_string();
                AppError::validation(vec![json!({ "error": message })], message)
            }
            CatalogError::NotFound { entity, id } => {
                AppError::not_found(format!("{} {} not found", entity, id))
            }
            CatalogError::ConstraintViolation(message) => AppError::conflict(vec![], message),
            CatalogError::Forbidden(message) => AppError::forbidden(message),
            CatalogError::RecordStore(err) => AppError::Internal(err.into()),
        }
    }
}
