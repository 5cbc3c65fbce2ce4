//! Record store for catalog entities.
//!
//! Entity types validate themselves on construction; the [`RecordStore`]
//! trait is the only way the catalog reads or writes them.

pub mod memory;
pub mod models;
pub mod store;

pub use memory::MemoryRecordStore;
pub use models::{
    Asset, AssetKind, Book, BookChanges, BookDraft, BookId, Category, ModelError, Rating,
    RatingSummary, Review, ReviewChanges, ReviewId, UserId,
};
pub use store::{DbError, DbResult, RecordStore, ReviewFilter};
