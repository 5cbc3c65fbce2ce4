use anyhow::Context;
use libris_kernel::{settings::Settings, InitCtx, ModuleRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load Libris settings")?;
    libris_telemetry::init(&settings.telemetry).context("failed to initialize telemetry")?;

    tracing::info!(
        env = ?settings.environment,
        storage = ?settings.storage.backend,
        "libris-app bootstrap starting"
    );

    let mut registry = ModuleRegistry::new();
    libris_app::register_all(&mut registry, &settings)?;

    let ctx = InitCtx {
        settings: &settings,
    };
    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    let served = libris_http::start_server(&registry, &settings).await;

    registry.stop_all().await?;
    served
}
