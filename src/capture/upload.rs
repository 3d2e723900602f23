use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::session::MediaBlob;
use crate::error::{SosError, SosResult};

pub const DEFAULT_VIDEO_BUCKET: &str = "sos-alerts-video";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `blob` under `name` and return the stored object path.
    async fn upload(&self, name: &str, blob: MediaBlob) -> SosResult<String>;

    /// Publicly resolvable URL of a stored object.
    fn public_url(&self, path: &str) -> String;
}

/// Uploads a recording and resolves its public URL.
pub async fn upload_recording(storage: &dyn ObjectStore, blob: MediaBlob) -> SosResult<String> {
    let name = recording_file_name(Utc::now());
    info!("Uploading SOS recording {} ({} bytes)", name, blob.bytes.len());

    let path = storage.upload(&name, blob).await?;
    let url = storage.public_url(&path);
    info!("SOS recording available at {}", url);
    Ok(url)
}

/// Timestamped, collision-resistant object name for a recording.
pub fn recording_file_name(at: DateTime<Utc>) -> String {
    format!(
        "sos_recording_{}_{}.webm",
        at.format("%Y%m%dT%H%M%S%.3fZ"),
        Uuid::new_v4().simple()
    )
}

pub fn public_object_url(base_url: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{}/{}",
        base_url.trim_end_matches('/'),
        bucket,
        path
    )
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub service_key: String,
    pub bucket: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: String,
}

/// Supabase storage REST API
pub struct SupabaseStorage {
    client: Client,
    config: StorageConfig,
}

impl SupabaseStorage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let client = Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.bucket,
            name
        )
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn upload(&self, name: &str, blob: MediaBlob) -> SosResult<String> {
        let response = self
            .client
            .post(self.object_url(name))
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .header(CONTENT_TYPE, blob.mime_type)
            .body(blob.bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SosError::UploadFailure(format!(
                "bucket {} rejected {}: {} {}",
                self.config.bucket, name, status, body
            )));
        }

        let uploaded: UploadResponse = response.json().await?;
        debug!("Stored object key {}", uploaded.key);

        // The key is prefixed with the bucket name; the object path is not.
        let prefix = format!("{}/", self.config.bucket);
        Ok(uploaded
            .key
            .strip_prefix(&prefix)
            .unwrap_or(uploaded.key.as_str())
            .to_string())
    }

    fn public_url(&self, path: &str) -> String {
        public_object_url(&self.config.base_url, &self.config.bucket, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_bytes, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage(server: &MockServer) -> SupabaseStorage {
        SupabaseStorage::new(StorageConfig {
            base_url: format!("{}/", server.uri()),
            service_key: "service-key".to_string(),
            bucket: DEFAULT_VIDEO_BUCKET.to_string(),
        })
        .unwrap()
    }

    fn blob() -> MediaBlob {
        MediaBlob {
            bytes: b"webm-bytes".to_vec(),
            mime_type: "video/webm".to_string(),
        }
    }

    #[test]
    fn test_recording_file_name_embeds_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 14, 3, 9).unwrap();
        let first = recording_file_name(at);
        let second = recording_file_name(at);

        assert!(first.starts_with("sos_recording_20240601T140309.000Z_"));
        assert!(first.ends_with(".webm"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_public_url_derivation() {
        assert_eq!(
            public_object_url(
                "https://project.supabase.co/",
                "sos-alerts-video",
                "sos_recording_1.webm"
            ),
            "https://project.supabase.co/storage/v1/object/public/sos-alerts-video/sos_recording_1.webm"
        );
    }

    #[tokio::test]
    async fn test_upload_returns_path_without_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sos-alerts-video/clip.webm"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("apikey", "service-key"))
            .and(header("content-type", "video/webm"))
            .and(body_bytes(b"webm-bytes".to_vec()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "Key": "sos-alerts-video/clip.webm" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let storage = storage(&server);
        let stored = storage.upload("clip.webm", blob()).await.unwrap();

        assert_eq!(stored, "clip.webm");
        assert_eq!(
            storage.public_url(&stored),
            format!(
                "{}/storage/v1/object/public/sos-alerts-video/clip.webm",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_upload_recording_resolves_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(
                r"^/storage/v1/object/sos-alerts-video/sos_recording_.+\.webm$",
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "Key": "sos-alerts-video/stored.webm" })),
            )
            .mount(&server)
            .await;

        let url = upload_recording(&storage(&server), blob()).await.unwrap();

        assert_eq!(
            url,
            format!(
                "{}/storage/v1/object/public/sos-alerts-video/stored.webm",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_rejected_upload_is_an_upload_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Bucket not found"))
            .mount(&server)
            .await;

        let result = upload_recording(&storage(&server), blob()).await;

        match result {
            Err(SosError::UploadFailure(message)) => assert!(message.contains("Bucket not found")),
            other => panic!("expected an upload failure, got {:?}", other),
        }
    }
}
