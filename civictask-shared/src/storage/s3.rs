/// S3-compatible object storage
///
/// Each upload is a single `PUT` signed with AWS Signature Version 4. Without
/// an endpoint the bucket is addressed virtual-host style on AWS
/// (`https://{bucket}.s3.{region}.amazonaws.com/{key}`); with one, such as a
/// MinIO or LocalStack URL, it is addressed path style.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{public_url, validate_key, ObjectStorage, StorageError, StoredObject};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Bucket and credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,

    /// Path-style endpoint; None addresses AWS directly
    pub endpoint: Option<String>,

    /// Base for returned links; None links to the object URL
    pub public_base_url: Option<String>,
}

impl S3Config {
    /// Where `key` is uploaded to
    pub fn object_url(&self, key: &str) -> String {
        let key = encode_path(key);
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key),
        }
    }

    fn link(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => public_url(base, key),
            None => self.object_url(key),
        }
    }
}

/// Percent-encodes everything but unreserved characters and `/`
fn encode_path(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, StorageError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| StorageError::Signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SigV4 key for one day, region and service
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, StorageError> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date)?;
    let k_region = hmac(&k_date, region)?;
    let k_service = hmac(&k_region, service)?;
    hmac(&k_service, "aws4_request")
}

/// A signed request: the semicolon-joined header names and the hex signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signed_headers: String,
    pub signature: String,
}

/// Signs a request with no query string
///
/// `path` must already be percent-encoded. Every header passed in is signed.
pub fn sign(
    config: &S3Config,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    payload_hash: &str,
    at: DateTime<Utc>,
) -> Result<Signature, StorageError> {
    let mut headers: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, path, canonical_headers, signed_headers, payload_hash
    );

    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date, config.region, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&config.secret_access_key, &date, &config.region, SERVICE)?;
    Ok(Signature {
        signed_headers,
        signature: hex::encode(hmac(&key, &string_to_sign)?),
    })
}

fn authorization(config: &S3Config, signature: &Signature, at: DateTime<Utc>) -> String {
    format!(
        "{} Credential={}/{}/{}/{}/aws4_request,SignedHeaders={},Signature={}",
        ALGORITHM,
        config.access_key_id,
        at.format("%Y%m%d"),
        config.region,
        SERVICE,
        signature.signed_headers,
        signature.signature
    )
}

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: reqwest::Client,
    config: S3Config,
}

impl S3Storage {
    pub fn new(config: S3Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<StoredObject, StorageError> {
        validate_key(key)?;

        let object_url = self.config.object_url(key);
        let url = reqwest::Url::parse(&object_url)
            .map_err(|e| StorageError::InvalidEndpoint(format!("{}: {}", object_url, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(StorageError::InvalidEndpoint(object_url)),
        };

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = sha256_hex(&body);
        let signature = sign(
            &self.config,
            "PUT",
            url.path(),
            &[
                ("host", host.as_str()),
                ("x-amz-content-sha256", payload_hash.as_str()),
                ("x-amz-date", amz_date.as_str()),
            ],
            &payload_hash,
            now,
        )?;

        let size = body.len();
        debug!(key, bucket = %self.config.bucket, size, "Uploading object");

        let response = self
            .client
            .put(url)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .header(reqwest::header::AUTHORIZATION, authorization(&self.config, &signature, now))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        info!(key, bucket = %self.config.bucket, content_type, size, "Stored object in S3");
        Ok(StoredObject {
            key: key.to_string(),
            url: self.config.link(key),
            size,
        })
    }
}
