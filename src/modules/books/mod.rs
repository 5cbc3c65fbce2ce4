//! Books module: catalog entries, their reviews and their stored assets.

pub mod aggregator;
pub mod assets;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod routes;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use libris_authz::{Authorizer, OwnerOrAdmin};
use libris_db::RecordStore;
use libris_kernel::{settings::Settings, InitCtx, Module};
use libris_storage::AssetStore;

use aggregator::RatingAggregator;
use assets::{AssetLayout, AssetLifecycle};
use coordinator::Coordinator;

pub struct BooksModule {
    coordinator: Arc<Coordinator>,
}

impl BooksModule {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            baseline_rating = ctx.settings.catalog.baseline_rating,
            require_primary_file = ctx.settings.catalog.require_primary_file,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.coordinator.clone())
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

/// Wire the coordinator from explicitly injected collaborators.
pub fn build_coordinator(
    settings: &Settings,
    records: Arc<dyn RecordStore>,
    store: Arc<dyn AssetStore>,
) -> Coordinator {
    let layout = AssetLayout::from_settings(&settings.storage);
    let lifecycle = AssetLifecycle::new(store, records.clone(), layout);
    let aggregator = RatingAggregator::new(records.clone(), settings.catalog.baseline_rating);
    let authorizer: Arc<dyn Authorizer> = Arc::new(OwnerOrAdmin);

    Coordinator::new(
        records,
        lifecycle,
        aggregator,
        authorizer,
        settings.catalog.require_primary_file,
    )
}

/// Create the books module around the given collaborators.
pub fn create_module(
    settings: &Settings,
    records: Arc<dyn RecordStore>,
    store: Arc<dyn AssetStore>,
) -> Arc<dyn Module> {
    let coordinator = build_coordinator(settings, records, store);
    Arc::new(BooksModule::new(Arc::new(coordinator)))
}
