use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub type BookId = Uuid;
pub type ReviewId = Uuid;
pub type UserId = Uuid;

const TITLE_MAX_CHARS: usize = 100;

/// Rejections raised while constructing an entity.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} cannot be more than {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("category '{0}' is not one of the catalog categories")]
    UnknownCategory(String),

    #[error("rating {0} is out of range (must be 1-5)")]
    RatingOutOfRange(i64),
}

/// Fixed set of catalog categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    Fiction,
    NonFiction,
    Science,
    Technology,
    History,
    Biography,
    SelfHelp,
    Business,
    Literature,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Fiction,
        Category::NonFiction,
        Category::Science,
        Category::Technology,
        Category::History,
        Category::Biography,
        Category::SelfHelp,
        Category::Business,
        Category::Literature,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Fiction => "Fiction",
            Category::NonFiction => "Non-fiction",
            Category::Science => "Science",
            Category::Technology => "Technology",
            Category::History => "History",
            Category::Biography => "Biography",
            Category::SelfHelp => "Self-help",
            Category::Business => "Business",
            Category::Literature => "Literature",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| ModelError::UnknownCategory(value.to_string()))
    }
}

impl TryFrom<String> for Category {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

/// A review score between 1 and 5 inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Result<Self, ModelError> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ModelError::RatingOutOfRange(value))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Rating {
    type Error = ModelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// The two asset slots a book carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// The primary file; never absent.
    File,
    /// The optional cover image.
    Cover,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::File => "file",
            AssetKind::Cover => "cover",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A binary object held by the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub url: String,
    pub store_id: String,
}

impl Asset {
    pub fn new(url: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            store_id: store_id.into(),
        }
    }
}

/// Derived review statistics stored on a book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average_rating: f64,
    pub review_count: u32,
}

/// Validated book metadata, ready to be combined with assets.
#[derive(Debug, Clone, PartialEq)]
pub struct BookDraft {
    title: String,
    author: String,
    description: String,
    category: Category,
    owner: UserId,
}

impl BookDraft {
    pub fn new(
        title: &str,
        author: &str,
        description: &str,
        category: &str,
        owner: UserId,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            title: valid_title(title)?,
            author: required("author", author)?,
            description: required("description", description)?,
            category: category.parse()?,
            owner,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Metadata edits to an existing book; unset fields are left untouched.
///
/// Supplied fields go through the same checks as [`BookDraft`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookChanges {
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    category: Option<Category>,
}

impl BookChanges {
    pub fn new(
        title: Option<&str>,
        author: Option<&str>,
        description: Option<&str>,
        category: Option<&str>,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            title: title.map(valid_title).transpose()?,
            author: author.map(|a| required("author", a)).transpose()?,
            description: description
                .map(|d| required("description", d))
                .transpose()?,
            category: category.map(str::parse).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.description.is_none()
            && self.category.is_none()
    }

    pub fn apply(&self, book: &mut Book) {
        if let Some(title) = &self.title {
            book.title = title.clone();
        }
        if let Some(author) = &self.author {
            book.author = author.clone();
        }
        if let Some(description) = &self.description {
            book.description = description.clone();
        }
        if let Some(category) = self.category {
            book.category = category;
        }
    }
}

fn valid_title(title: &str) -> Result<String, ModelError> {
    let title = required("title", title)?;
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(ModelError::TooLong {
            field: "title",
            max: TITLE_MAX_CHARS,
        });
    }
    Ok(title)
}

fn required(field: &'static str, value: &str) -> Result<String, ModelError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ModelError::MissingField(field))
    } else {
        Ok(value.to_string())
    }
}

/// A cataloged book.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub description: String,
    pub category: Category,
    pub owner: UserId,
    pub file_asset: Asset,
    pub cover_asset: Option<Asset>,
    pub average_rating: f64,
    pub review_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Book {
    /// Build a book with no reviews yet.
    pub fn new(
        draft: BookDraft,
        file_asset: Asset,
        cover_asset: Option<Asset>,
        baseline_rating: f64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            title: draft.title,
            author: draft.author,
            description: draft.description,
            category: draft.category,
            owner: draft.owner,
            file_asset,
            cover_asset,
            average_rating: baseline_rating,
            review_count: 0,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Current value of an asset slot.
    pub fn asset(&self, kind: AssetKind) -> Option<&Asset> {
        match kind {
            AssetKind::File => Some(&self.file_asset),
            AssetKind::Cover => self.cover_asset.as_ref(),
        }
    }
}

/// A user's rating and comment for a book.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: ReviewId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub rating: Rating,
    pub comment: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Review {
    pub fn new(
        book_id: BookId,
        user_id: UserId,
        rating: Rating,
        comment: &str,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            id: Uuid::now_v7(),
            book_id,
            user_id,
            rating,
            comment: required("comment", comment)?,
            created_at: OffsetDateTime::now_utc(),
        })
    }
}

/// Partial update of a review; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewChanges {
    rating: Option<Rating>,
    comment: Option<String>,
}

impl ReviewChanges {
    pub fn new(rating: Option<Rating>, comment: Option<&str>) -> Result<Self, ModelError> {
        Ok(Self {
            rating,
            comment: comment.map(|c| required("comment", c)).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rating.is_none() && self.comment.is_none()
    }

    pub fn apply(&self, review: &mut Review) {
        if let Some(rating) = self.rating {
            review.rating = rating;
        }
        if let Some(comment) = &self.comment {
            review.comment = comment.clone();
        }
    }
}
