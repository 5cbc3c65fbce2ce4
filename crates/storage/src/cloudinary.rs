//! Cloudinary upload API client.

use std::{
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use async_trait::async_trait;
use libris_kernel::settings::StorageSettings;
use reqwest::multipart::{Form, Part};
use serde::{de::DeserializeOwned, Deserialize};
use sha2::{Digest, Sha256};

use crate::{AssetStore, ResourceType, StoreError, UploadOptions, UploadResult};

/// Credentials and endpoint for one Cloudinary account.
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base_url: String,
}

impl CloudinaryConfig {
    pub fn from_settings(settings: &StorageSettings) -> anyhow::Result<Self> {
        let field = |name: &str, value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| anyhow!("storage.{} is required for the cloudinary backend", name))
        };

        Ok(Self {
            cloud_name: field("cloud_name", &settings.cloud_name)?,
            api_key: field("api_key", &settings.api_key)?,
            api_secret: field("api_secret", &settings.api_secret)?,
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

/// Signed REST client for the Cloudinary upload API.
pub struct CloudinaryStore {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, resource_type: ResourceType, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{}/{}",
            self.config.api_base_url,
            self.config.cloud_name,
            resource_type.as_str(),
            action
        )
    }

    fn signed_params(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        let signature = sign(&params, &self.config.api_secret);
        params.push(("api_key", self.config.api_key.clone()));
        params.push(("signature", signature));
        params.push(("signature_algorithm", "sha256".to_string()));
        params
    }
}

/// SHA-256 request signature: parameters sorted by name, joined as
/// `k=v&k=v`, with the API secret appended.
fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let payload = sorted
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    hex::encode(Sha256::digest(format!("{}{}", payload, api_secret).as_bytes()))
}

fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .to_string()
}

/// `ok` and `not found` both mean the object is gone.
fn classify_destroy(result: &str) -> Result<(), StoreError> {
    match result {
        "ok" | "not found" => Ok(()),
        other => Err(StoreError::Rejected {
            status: 200,
            message: format!("destroy returned '{}'", other),
        }),
    }
}

async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        return Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|err| StoreError::Malformed(err.to_string()))
}

#[async_trait]
impl AssetStore for CloudinaryStore {
    async fn upload(
        &self,
        source: &Path,
        content_type: Option<&str>,
        options: &UploadOptions,
    ) -> Result<UploadResult, StoreError> {
        let bytes = tokio::fs::read(source).await?;
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let params = self.signed_params(vec![
            ("folder", options.folder.clone()),
            ("timestamp", unix_timestamp()),
        ]);

        let mut part = Part::bytes(bytes).file_name(file_name);
        if let Some(content_type) = content_type {
            part = part.mime_str(content_type)?;
        }

        let form = params
            .into_iter()
            .fold(Form::new(), |form, (key, value)| form.text(key, value))
            .part("file", part);

        tracing::debug!(
            folder = %options.folder,
            resource_type = options.resource_type.as_str(),
            "uploading asset"
        );

        let response = self
            .client
            .post(self.endpoint(options.resource_type, "upload"))
            .multipart(form)
            .send()
            .await?;

        read_response(response).await
    }

    async fn destroy(
        &self,
        public_id: &str,
        resource_type: ResourceType,
    ) -> Result<(), StoreError> {
        let params = self.signed_params(vec![
            ("public_id", public_id.to_string()),
            ("timestamp", unix_timestamp()),
        ]);

        let response = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&params)
            .send()
            .await?;

        let outcome: DestroyResponse = read_response(response).await?;
        classify_destroy(&outcome.result)
    }
}
