use std::{collections::HashMap, sync::Mutex};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    presigning::PresigningConfig,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use uuid::Uuid;

use crate::config::PhotoStoreConfig;

/// Evidence photo store: keeps the bytes, hands back a retrievable URL.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn store(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String>;
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// `donations/<id>/<stage>-<uuid>.<ext>`
pub fn photo_key(donation: Uuid, stage: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("donations/{}/{}-{}.{}", donation, stage, Uuid::new_v4(), ext)
}

/// S3-compatible bucket (MinIO in deployments). URLs are presigned GETs.
#[derive(Clone)]
pub struct S3PhotoStore {
    client: Client,
    bucket: String,
    url_ttl_secs: u64,
}

impl S3PhotoStore {
    pub async fn new(cfg: &PhotoStoreConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            url_ttl_secs: cfg.url_ttl_secs,
        })
    }
}

#[async_trait]
impl PhotoStore for S3PhotoStore {
    async fn store(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {key}"))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(std::time::Duration::from_secs(
                self.url_ttl_secs,
            ))?)
            .await
            .with_context(|| format!("s3 presign_get {key}"))?;
        Ok(presigned.uri().to_string())
    }
}

/// In-process photo store for local runs and tests.
#[derive(Default)]
pub struct MemoryPhotoStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PhotoStore for MemoryPhotoStore {
    async fn store(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        anyhow::ensure!(!body.is_empty(), "empty upload");
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), (body, content_type.to_string()));
        Ok(format!("memory://photos/{key}"))
    }
}
