use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::Deserialize;

const DEFAULT_ENV: &str = "local";
const ENV_VAR_NAME: &str = "LIBRIS_ENV";
const CONFIG_DIR_ENV: &str = "LIBRIS_CONFIG_DIR";

/// Deployment environment the application is running in.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

/// Top-level configuration structure loaded from layered sources.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
}

impl Settings {
    /// Load configuration by layering `.env`, base file, and environment overlay.
    ///
    /// Environment variables use the `LIBRIS_` prefix and `__` between
    /// sections, e.g. `LIBRIS_STORAGE__API_KEY`.
    pub fn load() -> anyhow::Result<Self> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        let environment = std::env::var(ENV_VAR_NAME).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir()
                .context("unable to resolve current directory")?
                .join("config"),
        };

        let base_path = config_dir.join("base.toml");
        let environment_path = config_dir.join(format!("{}.toml", environment));

        let builder = config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(environment_path).required(false))
            .add_source(
                config::Environment::with_prefix("LIBRIS")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let cfg = builder
            .build()
            .with_context(|| "failed to build configuration")?;

        let mut settings: Settings = cfg
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;

        settings.environment = parse_environment(&environment)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Reject combinations that would only fail later, at first use.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1.0..=5.0).contains(&self.catalog.baseline_rating) {
            return Err(anyhow!(
                "catalog.baseline_rating must lie within 1..=5, got {}",
                self.catalog.baseline_rating
            ));
        }

        // A store call must give up before the request that issued it does.
        if self.storage.timeout_ms >= self.server.request_timeout_ms {
            return Err(anyhow!(
                "storage.timeout_ms ({}) must be below server.request_timeout_ms ({})",
                self.storage.timeout_ms,
                self.server.request_timeout_ms
            ));
        }

        if self.storage.backend == StorageBackend::Cloudinary {
            let missing: Vec<&str> = [
                ("cloud_name", &self.storage.cloud_name),
                ("api_key", &self.storage.api_key),
                ("api_secret", &self.storage.api_secret),
            ]
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(name, _)| name)
            .collect();

            if !missing.is_empty() {
                return Err(anyhow!(
                    "cloudinary storage backend selected but credentials are missing: {}",
                    missing.join(", ")
                ));
            }
        }

        Ok(())
    }
}

fn parse_environment(value: &str) -> anyhow::Result<Environment> {
    match value {
        "local" => Ok(Environment::Local),
        "staging" => Ok(Environment::Staging),
        "production" => Ok(Environment::Production),
        other => Err(anyhow!(
            "unsupported environment '{}'; expected local/staging/production",
            other
        )),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    #[serde(default = "ServerSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "ServerSettings::default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_request_timeout_ms() -> u64 {
        60000
    }

    fn default_max_upload_bytes() -> usize {
        10_000_000
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            max_upload_bytes: Self::default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "TelemetrySettings::default_log_level")]
    pub log_level: String,
}

impl TelemetrySettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: Self::default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Which asset store implementation to construct at startup.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Cloudinary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub cloud_name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "StorageSettings::default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "StorageSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Directory for staged uploads; the system temp dir when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default = "StorageSettings::default_book_folder")]
    pub book_folder: String,
    #[serde(default = "StorageSettings::default_cover_folder")]
    pub cover_folder: String,
    #[serde(default = "StorageSettings::default_placeholder_url")]
    pub placeholder_url: String,
    #[serde(default = "StorageSettings::default_placeholder_id")]
    pub placeholder_id: String,
}

impl StorageSettings {
    fn default_api_base_url() -> String {
        "https://api.cloudinary.com".to_string()
    }

    fn default_timeout_ms() -> u64 {
        30000
    }

    fn default_book_folder() -> String {
        "digital_library/books".to_string()
    }

    fn default_cover_folder() -> String {
        "digital_library/covers".to_string()
    }

    fn default_placeholder_url() -> String {
        "https://res.cloudinary.com/demo/raw/upload/digital_library/placeholder-book.pdf"
            .to_string()
    }

    fn default_placeholder_id() -> String {
        "digital_library/placeholder-book".to_string()
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            cloud_name: None,
            api_key: None,
            api_secret: None,
            api_base_url: Self::default_api_base_url(),
            timeout_ms: Self::default_timeout_ms(),
            staging_dir: None,
            book_folder: Self::default_book_folder(),
            cover_folder: Self::default_cover_folder(),
            placeholder_url: Self::default_placeholder_url(),
            placeholder_id: Self::default_placeholder_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSettings {
    /// Average rating stored on a book that has no reviews.
    #[serde(default = "CatalogSettings::default_baseline_rating")]
    pub baseline_rating: f64,
    /// Reject book creation without a primary file instead of using the placeholder.
    #[serde(default)]
    pub require_primary_file: bool,
}

impl CatalogSettings {
    fn default_baseline_rating() -> f64 {
        1.0
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            baseline_rating: Self::default_baseline_rating(),
            require_primary_file: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_environment_is_local() {
        let settings = Settings::default();
        assert_eq!(settings.environment, Environment::Local);
    }

    #[test]
    fn default_catalog_uses_minimum_rating_as_baseline() {
        let settings = Settings::default();
        assert_eq!(settings.catalog.baseline_rating, 1.0);
        assert!(!settings.catalog.require_primary_file);
    }

    #[test]
    fn default_storage_is_memory_and_valid() {
        let settings = Settings::default();
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn cloudinary_without_credentials_is_rejected() {
        let mut settings = Settings::default();
        settings.storage.backend = StorageBackend::Cloudinary;
        settings.storage.cloud_name = Some("demo".to_string());
        settings.storage.api_key = Some(String::new());

        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("api_key"));
        assert!(err.contains("api_secret"));
        assert!(!err.contains("cloud_name"));
    }

    #[test]
    fn baseline_outside_rating_range_is_rejected() {
        let mut settings = Settings::default();
        settings.catalog.baseline_rating = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn storage_timeout_must_fit_inside_request_timeout() {
        let mut settings = Settings::default();
        assert!(settings.storage.timeout_ms < settings.server.request_timeout_ms);

        settings.storage.timeout_ms = settings.server.request_timeout_ms;
        assert!(settings.validate().is_err());

        settings.storage.timeout_ms = settings.server.request_timeout_ms - 1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn unknown_environment_is_rejected() {
        assert!(parse_environment("qa").is_err());
        assert_eq!(parse_environment("staging").unwrap(), Environment::Staging);
    }
}
