//! Request extraction for the books routes.

use axum::{
    extract::{multipart::Field, FromRequestParts, Multipart},
    http::{request::Parts, HeaderMap},
};
use libris_authz::{Actor, Role};
use libris_db::{BookChanges, ModelError};
use libris_http::AppError;
use uuid::Uuid;

use crate::modules::books::{assets::AssetPayload, coordinator::BookMetadata};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Caller identity as asserted by the upstream authentication layer.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(CurrentActor)
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized(format!("missing {} header", USER_ID_HEADER)))?;
    let user_id = Uuid::parse_str(user_id.trim())
        .map_err(|_| AppError::unauthorized(format!("malformed {} header", USER_ID_HEADER)))?;

    let role = match headers.get(USER_ROLE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(role) => role
            .parse::<Role>()
            .map_err(|err| AppError::unauthorized(err.to_string()))?,
        None => Role::User,
    };

    Ok(Actor { user_id, role })
}

/// Fields of a multipart book form. Unknown fields are ignored and empty
/// file parts count as absent.
#[derive(Debug, Default)]
pub struct BookForm {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub file: Option<AssetPayload>,
    pub cover: Option<AssetPayload>,
}

impl BookForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = BookForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "title" => form.title = Some(text(field).await?),
                "author" => form.author = Some(text(field).await?),
                "description" => form.description = Some(text(field).await?),
                "category" => form.category = Some(text(field).await?),
                "file" => form.file = payload(field).await?,
                "coverImage" => form.cover = payload(field).await?,
                _ => {}
            }
        }

        Ok(form)
    }

    pub fn has_assets(&self) -> bool {
        self.file.is_some() || self.cover.is_some()
    }

    /// Metadata for a new book; missing fields are left blank for validation to reject.
    pub fn metadata(&self) -> BookMetadata {
        BookMetadata {
            title: self.title.clone().unwrap_or_default(),
            author: self.author.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            category: self.category.clone().unwrap_or_default(),
        }
    }

    /// Edits to an existing book; only the fields present in the form.
    pub fn changes(&self) -> Result<BookChanges, ModelError> {
        BookChanges::new(
            self.title.as_deref(),
            self.author.as_deref(),
            self.description.as_deref(),
            self.category.as_deref(),
        )
    }
}

async fn text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))
}

async fn payload(field: Field<'_>) -> Result<Option<AssetPayload>, AppError> {
    let content_type = field.content_type().map(str::to_string);
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?;

    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(AssetPayload::new(bytes, content_type)))
}
