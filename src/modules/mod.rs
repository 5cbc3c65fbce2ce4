pub mod books;

use std::sync::Arc;

use anyhow::Context;
use libris_db::MemoryRecordStore;
use libris_kernel::{settings::Settings, ModuleRegistry};

/// Build the shared collaborators and register every module with the registry
pub fn register_all(registry: &mut ModuleRegistry, settings: &Settings) -> anyhow::Result<()> {
    let records = Arc::new(MemoryRecordStore::new());
    let store = libris_storage::connect(&settings.storage)
        .context("failed to construct asset store client")?;

    registry.register(books::create_module(settings, records, store))?;
    Ok(())
}
