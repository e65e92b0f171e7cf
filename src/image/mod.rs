//! OCI image pull: registry access and bundle preparation
//!
//! Pulls an image over the OCI distribution protocol and writes a runtime
//! bundle (rootfs + config.json) to disk. The runtime core never touches
//! the network; this module is the bundle-producing collaborator.

mod config;
mod extract;

pub use config::default_spec;
pub use extract::extract_layer;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::bundle::BundleError;
use crate::{APP_NAME, DEFAULT_REGISTRY, ROOTFS_DIR};

/// Upper bound for a single downloaded blob
const MAX_BLOB_SIZE: u64 = 1_000_000_000;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

const INDEX_MEDIA_TYPES: [&str; 2] = [
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

const MANIFEST_MEDIA_TYPES: [&str; 2] = [
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
];

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("invalid image reference {0:?}")]
    BadReference(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("registry returned status {status} for {url}")]
    RegistryStatus { status: u16, url: String },

    #[error("the provided URI does not reference an image: {0}")]
    NotAnImage(String),

    #[error("no manifest for platform {0}")]
    NoMatchingPlatform(String),

    #[error("blob digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("unsupported digest algorithm in {0:?}")]
    BadDigest(String),

    #[error("archive entry escapes the rootfs: {0}")]
    PathTraversal(String),

    #[error("failed to parse registry response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

/// A parsed image reference: registry host, repository and tag or digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub reference: String,
}

impl ImageReference {
    /// Parse a docker-style reference. Bare names get the `library/`
    /// namespace and the default registry; the default tag is `latest`.
    pub fn parse(raw: &str) -> Result<Self, ImageError> {
        if raw.is_empty() || raw.contains(char::is_whitespace) {
            return Err(ImageError::BadReference(raw.to_string()));
        }

        let (name, reference) = match raw.split_once('@') {
            Some((name, digest)) => (name, digest.to_string()),
            None => {
                // a colon only marks a tag when it comes after the last slash
                match raw.rsplit_once(':') {
                    Some((name, tag)) if !tag.contains('/') => (name, tag.to_string()),
                    _ => (raw, "latest".to_string()),
                }
            }
        };
        if name.is_empty() || reference.is_empty() {
            return Err(ImageError::BadReference(raw.to_string()));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                let host = if host == "docker.io" {
                    DEFAULT_REGISTRY.to_string()
                } else {
                    host.to_string()
                };
                (host, rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{name}")),
        };
        if repository.is_empty() {
            return Err(ImageError::BadReference(raw.to_string()));
        }

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct IndexPlatform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    digest: String,
    platform: Option<IndexPlatform>,
}

#[derive(Debug, Deserialize)]
struct ManifestIndex {
    manifests: Vec<IndexEntry>,
}

/// Image metadata carried in the config blob
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "Env", default)]
    pub env: Vec<String>,
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Vec<String>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Vec<String>,
    #[serde(rename = "WorkingDir", default)]
    pub working_dir: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfigFile {
    #[serde(default)]
    config: ImageConfig,
}

/// OCI platform name for the host architecture
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Check a blob against its content-addressed digest
pub fn verify_digest(blob: &[u8], digest: &str) -> Result<(), ImageError> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        return Err(ImageError::BadDigest(digest.to_string()));
    };
    let actual = hex::encode(Sha256::digest(blob));
    if actual != expected {
        return Err(ImageError::DigestMismatch {
            expected: digest.to_string(),
            actual: format!("sha256:{actual}"),
        });
    }
    Ok(())
}

/// Pull one quoted field out of a Www-Authenticate challenge
fn challenge_field(challenge: &str, key: &str) -> Option<String> {
    challenge
        .split(&format!("{key}=\""))
        .nth(1)
        .and_then(|rest| rest.split('"').next().map(str::to_owned))
}

fn ok_or_status(
    resp: ureq::http::Response<ureq::Body>,
    url: &str,
) -> Result<ureq::http::Response<ureq::Body>, ImageError> {
    if !resp.status().is_success() {
        return Err(ImageError::RegistryStatus {
            status: resp.status().as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp)
}

fn read_body(resp: &mut ureq::http::Response<ureq::Body>) -> Result<Vec<u8>, ImageError> {
    let mut reader = resp.body_mut().with_config().limit(MAX_BLOB_SIZE).reader();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Minimal anonymous OCI distribution client
pub struct RegistryClient {
    registry: String,
    repository: String,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(reference: &ImageReference) -> Self {
        Self {
            registry: reference.registry.clone(),
            repository: reference.repository.clone(),
            token: None,
        }
    }

    fn send(&self, url: &str, accept: &str) -> Result<ureq::http::Response<ureq::Body>, ImageError> {
        let mut req = ureq::get(url)
            .config()
            .http_status_as_error(false)
            .build()
            .header("User-Agent", APP_NAME)
            .header("Accept", accept);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req.call().map_err(|e| ImageError::Http(e.to_string()))
    }

    fn get(
        &mut self,
        url: &str,
        accept: &str,
    ) -> Result<ureq::http::Response<ureq::Body>, ImageError> {
        let resp = self.send(url, accept)?;
        if resp.status().as_u16() == 401 && self.token.is_none() {
            // anonymous bearer-token negotiation, then one retry
            let challenge = resp
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.token = Some(self.fetch_token(&challenge)?);
            let resp = self.send(url, accept)?;
            return ok_or_status(resp, url);
        }
        ok_or_status(resp, url)
    }

    /// Resolve a `Www-Authenticate: Bearer realm=...,service=...` challenge
    fn fetch_token(&self, challenge: &str) -> Result<String, ImageError> {
        let realm = challenge_field(challenge, "realm")
            .ok_or_else(|| ImageError::Http(format!("unparseable auth challenge: {challenge}")))?;
        let service =
            challenge_field(challenge, "service").unwrap_or_else(|| self.registry.clone());

        let url = format!(
            "{realm}?service={service}&scope=repository:{}:pull",
            self.repository
        );
        debug!(%url, "requesting registry token");

        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            token: String,
            #[serde(default)]
            access_token: String,
        }

        let mut resp = ureq::get(&url)
            .header("User-Agent", APP_NAME)
            .call()
            .map_err(|e| ImageError::Http(e.to_string()))?;
        let body: TokenResponse = resp
            .body_mut()
            .read_json()
            .map_err(|e| ImageError::Http(e.to_string()))?;

        let token = if body.token.is_empty() {
            body.access_token
        } else {
            body.token
        };
        if token.is_empty() {
            return Err(ImageError::Http("registry token endpoint returned no token".into()));
        }
        Ok(token)
    }

    /// Fetch the manifest, resolving a multi-platform index to the host
    /// platform's entry.
    pub fn manifest(&mut self, reference: &str) -> Result<Manifest, ImageError> {
        let url = format!(
            "https://{}/v2/{}/manifests/{reference}",
            self.registry, self.repository
        );
        let mut resp = self.get(&url, MANIFEST_ACCEPT)?;
        let media_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = read_body(&mut resp)?;

        if INDEX_MEDIA_TYPES.contains(&media_type.as_str()) {
            let index: ManifestIndex = serde_json::from_slice(&body)?;
            let arch = host_arch();
            let entry = index
                .manifests
                .iter()
                .find(|m| {
                    m.platform
                        .as_ref()
                        .is_some_and(|p| p.os == "linux" && p.architecture == arch)
                })
                .ok_or_else(|| ImageError::NoMatchingPlatform(format!("linux/{arch}")))?;
            debug!(digest = %entry.digest, "resolved image index to platform manifest");
            return self.manifest(&entry.digest);
        }

        if !media_type.is_empty() && !MANIFEST_MEDIA_TYPES.contains(&media_type.as_str()) {
            return Err(ImageError::NotAnImage(media_type));
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch a blob and verify it against its content digest
    pub fn blob(&mut self, digest: &str) -> Result<Vec<u8>, ImageError> {
        let url = format!(
            "https://{}/v2/{}/blobs/{digest}",
            self.registry, self.repository
        );
        let mut resp = self.get(&url, "application/octet-stream")?;
        let body = read_body(&mut resp)?;
        verify_digest(&body, digest)?;
        Ok(body)
    }
}

/// Pull an image and write a runtime bundle to `bundle_dir`.
pub fn pull(image: &str, bundle_dir: &Path) -> Result<(), ImageError> {
    let reference = ImageReference::parse(image)?;
    info!(image, registry = %reference.registry, "pulling image");

    let mut client = RegistryClient::new(&reference);
    let manifest = client.manifest(&reference.reference)?;

    let config_blob = client.blob(&manifest.config.digest)?;
    let config_file: ImageConfigFile = serde_json::from_slice(&config_blob)?;

    let rootfs = bundle_dir.join(ROOTFS_DIR);
    fs::create_dir_all(&rootfs)?;

    info!(layers = manifest.layers.len(), "extracting rootfs");
    for layer in &manifest.layers {
        debug!(digest = %layer.digest, "extracting layer");
        let blob = client.blob(&layer.digest)?;
        extract_layer(&blob, &rootfs)?;
    }

    info!("writing runtime config");
    let spec = default_spec(&config_file.config);
    crate::bundle::write_config(bundle_dir, &spec)?;

    Ok(())
}
