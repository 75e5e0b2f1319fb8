use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use image::ImageFormat;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use url::Url;
use uuid::Uuid;

use crate::sigv4::{self, Credentials};

pub const DEFAULT_KEY_PREFIX: &str = "kudos";

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub bucket: String,
    /// SigV4 access keys. Takes precedence over `access_token`.
    pub credentials: Option<Credentials>,
    pub region: String,
    /// Bearer token for gateways that front the bucket with token auth.
    pub access_token: Option<String>,
    pub key_prefix: String,
    pub timeout: Duration,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            credentials: None,
            region: sigv4::DEFAULT_REGION.to_string(),
            access_token: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: Duration::from_secs(30),
            http_client: None,
        }
    }
}

/// Path-style S3-compatible bucket holding kudos images.
pub struct BucketStore {
    endpoint: String,
    bucket: String,
    credentials: Option<Credentials>,
    region: String,
    access_token: Option<String>,
    key_prefix: String,
    client: Client,
}

impl BucketStore {
    pub fn new(cfg: Config) -> Result<Self> {
        let endpoint = cfg.endpoint.trim().trim_end_matches('/').to_string();
        let bucket = cfg.bucket.trim().trim_matches('/').to_string();
        if endpoint.is_empty() {
            bail!("bucket: endpoint is required");
        }
        if bucket.is_empty() {
            bail!("bucket: bucket name is required");
        }
        let client = match cfg.http_client {
            Some(client) => client,
            None => Client::builder()
                .timeout(cfg.timeout)
                .build()
                .context("bucket: build http client")?,
        };
        let region = match cfg.region.trim() {
            "" => sigv4::DEFAULT_REGION.to_string(),
            region => region.to_string(),
        };
        Ok(Self {
            endpoint,
            bucket,
            credentials: cfg.credentials.filter(|creds| {
                !creds.access_key.trim().is_empty() && !creds.secret_key.is_empty()
            }),
            region,
            access_token: cfg.access_token.filter(|token| !token.trim().is_empty()),
            key_prefix: cfg.key_prefix.trim_matches('/').to_string(),
            client,
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key.trim_start_matches('/'))
    }

    /// Object key of a URL previously returned by [`BucketStore::upload`].
    pub fn key_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        let marker = format!("/{}/", self.bucket);
        url.split_once(&marker)
            .map(|(_, key)| key)
            .filter(|key| !key.is_empty())
    }

    pub fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        let key = if self.key_prefix.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}/{}", self.key_prefix, Uuid::new_v4())
        };
        let url = self.parse_object_url(&key)?;

        let headers = [("content-type", mime_type), ("x-amz-acl", "public-read")];
        let request = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, mime_type)
            .header("x-amz-acl", "public-read")
            .body(bytes.to_vec());
        let request = self.authorize(request, Method::PUT, &url, &headers, bytes)?;
        let response = request.send().context("bucket: upload")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("bucket: upload failed: {} - {}", status, body.trim()));
        }
        log::info!("bucket: uploaded {} bytes to {key}", bytes.len());
        Ok(url.to_string())
    }

    pub fn upload_file(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path)
            .with_context(|| format!("bucket: read {}", path.display()))?;
        let mime = detect_mime(&bytes);
        self.upload(&bytes, &mime)
    }

    /// Best-effort removal; failures are logged and never returned so cleanup
    /// cannot fail the operation that triggered it.
    pub fn delete(&self, url: &str) {
        let Some(key) = self.key_from_url(url) else {
            log::warn!("bucket: could not extract key from url {url}");
            return;
        };
        if let Err(err) = self.try_delete(key) {
            log::error!("bucket: error deleting {key}: {err:#}");
        }
    }

    fn try_delete(&self, key: &str) -> Result<()> {
        let url = self.parse_object_url(key)?;
        let request = self.client.delete(url.clone());
        let request = self.authorize(request, Method::DELETE, &url, &[], b"")?;
        let response = request.send().context("bucket: delete")?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            bail!("bucket: delete failed: {}", status);
        }
        Ok(())
    }

    fn parse_object_url(&self, key: &str) -> Result<Url> {
        let raw = self.object_url(key);
        Url::parse(&raw).with_context(|| format!("bucket: invalid object url {raw}"))
    }

    /// Signs with SigV4 when access keys are configured, otherwise falls back
    /// to the bearer token. Requests go out unsigned when neither is set.
    fn authorize(
        &self,
        request: RequestBuilder,
        method: Method,
        url: &Url,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<RequestBuilder> {
        if let Some(credentials) = &self.credentials {
            let signature = sigv4::sign(
                credentials,
                &self.region,
                method.as_str(),
                url,
                headers,
                &sigv4::payload_hash(body),
                Utc::now(),
            )
            .map_err(|err| anyhow!("bucket: sign request: {err}"))?;
            return Ok(request
                .header("x-amz-date", signature.amz_date)
                .header("x-amz-content-sha256", signature.content_sha256)
                .header(AUTHORIZATION, signature.authorization));
        }
        Ok(match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }
}

pub fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => tree_magic_mini::from_u8(&bytes[..bytes.len().min(512)]).to_string(),
    }
}
