//! Docker registry v2 client.
//!
//! Resolves an image reference to the manifest matching the host platform
//! and streams every layer blob into the local layer cache. Requests are
//! strictly sequential and never retried; a failure surfaces immediately
//! and leaves already-downloaded files in place.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use rocker_common::config::RegistryConfig;
use rocker_common::constants::{
    MEDIA_TYPE_MANIFEST, MEDIA_TYPE_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
};
use rocker_common::error::{Result, RockerError};
use rocker_common::types::{ImageRef, Platform};

use crate::hash::{self, DigestWriter};
use crate::manifest::{LayerDescriptor, Manifest, ManifestList, TokenResponse};
use crate::storage;

/// Source of image layers for the build pipeline.
pub trait ImagePuller {
    /// Downloads every layer of `image` into `dest`.
    ///
    /// Returns the written files in manifest order.
    ///
    /// # Errors
    ///
    /// Returns the error of the first stage that fails.
    fn pull(&self, image: &ImageRef, dest: &Path) -> Result<Vec<PathBuf>>;
}

/// Blocking HTTP client for one registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    config: RegistryConfig,
    platform: Platform,
}

impl RegistryClient {
    /// Creates a client for the configured endpoints, matching the host platform.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Config` if the HTTP client cannot be built.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("rocker/", env!("CARGO_PKG_VERSION")))
            .timeout(None)
            .build()
            .map_err(|e| RockerError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            config,
            platform: Platform::host(),
        })
    }

    /// Overrides the platform used for manifest selection.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Requests a pull-scoped bearer token for `repository`.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Auth` on network failure, a non-success status,
    /// or a response without a token.
    pub fn resolve_auth_token(&self, repository: &str) -> Result<String> {
        let auth_err = |reason: String| RockerError::Auth {
            image: repository.to_string(),
            reason,
        };
        let scope = format!("repository:{repository}:pull");
        let response = self
            .http
            .get(&self.config.auth_url)
            .query(&[
                ("service", self.config.auth_service.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .map_err(|e| auth_err(e.to_string()))?;
        let response = check_status(response).map_err(auth_err)?;

        let body: TokenResponse = serde_json::from_reader(response)
            .map_err(|e| auth_err(format!("malformed token response: {e}")))?;
        let token = body
            .into_token()
            .ok_or_else(|| auth_err("token response carries no token".into()))?;
        tracing::debug!(repository, "pull token acquired");
        Ok(token)
    }

    /// Fetches the manifest list for `tag` and returns the digest of the
    /// manifest whose `{os, architecture}` equals the client's platform.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Manifest` if the list cannot be fetched or
    /// decoded, and `RockerError::NoMatchingPlatform` if no entry matches.
    pub fn select_platform_manifest_digest(
        &self,
        repository: &str,
        tag: &str,
        token: &str,
    ) -> Result<String> {
        let manifest_err = |reason: String| RockerError::Manifest {
            image: repository.to_string(),
            reference: tag.to_string(),
            reason,
        };
        let accept = [MEDIA_TYPE_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX].join(", ");
        let response = self
            .get_manifest(repository, tag, token, &accept)
            .map_err(manifest_err)?;
        let list: ManifestList = serde_json::from_reader(response)
            .map_err(|e| manifest_err(format!("malformed manifest list: {e}")))?;

        let descriptor =
            list.select(&self.platform)
                .ok_or_else(|| RockerError::NoMatchingPlatform {
                    image: repository.to_string(),
                    tag: tag.to_string(),
                    os: self.platform.os.clone(),
                    architecture: self.platform.architecture.clone(),
                })?;
        tracing::info!(
            repository,
            tag,
            platform = %self.platform,
            digest = %descriptor.digest,
            "platform manifest selected"
        );
        Ok(descriptor.digest.clone())
    }

    /// Dereferences a manifest digest into its ordered layer list.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Manifest` if the manifest cannot be fetched or decoded.
    pub fn fetch_manifest(&self, repository: &str, digest: &str, token: &str) -> Result<Manifest> {
        let manifest_err = |reason: String| RockerError::Manifest {
            image: repository.to_string(),
            reference: digest.to_string(),
            reason,
        };
        let accept = [MEDIA_TYPE_MANIFEST, MEDIA_TYPE_OCI_MANIFEST].join(", ");
        let response = self
            .get_manifest(repository, digest, token, &accept)
            .map_err(manifest_err)?;
        let manifest: Manifest = serde_json::from_reader(response)
            .map_err(|e| manifest_err(format!("malformed manifest: {e}")))?;
        tracing::info!(repository, digest, layers = manifest.layers.len(), "manifest fetched");
        Ok(manifest)
    }

    /// Streams every layer of `manifest` into `dest`, in manifest order.
    ///
    /// Stops at the first failure. Files written before the failure, and
    /// the partial file of the failing layer, are left in place.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::LayerFetch` on network failure,
    /// `RockerError::HashMismatch` on a corrupt blob, or `RockerError::Io`
    /// if the destination cannot be written.
    pub fn download_layers(
        &self,
        manifest: &Manifest,
        repository: &str,
        token: &str,
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dest).map_err(|e| RockerError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;

        let total = manifest.layers.len();
        let mut paths = Vec::with_capacity(total);
        for (index, layer) in manifest.layers.iter().enumerate() {
            tracing::info!(
                layer = index + 1,
                total,
                digest = %layer.digest,
                size = layer.size,
                "downloading layer"
            );
            paths.push(self.download_layer(index, layer, repository, token, dest)?);
        }
        Ok(paths)
    }

    fn download_layer(
        &self,
        index: usize,
        layer: &LayerDescriptor,
        repository: &str,
        token: &str,
        dest: &Path,
    ) -> Result<PathBuf> {
        let fetch_err = |reason: String| RockerError::LayerFetch {
            digest: layer.digest.clone(),
            reason,
        };
        let url = format!("{}/v2/{repository}/blobs/{}", self.base_url(), layer.digest);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?;
        let mut response = check_status(response).map_err(fetch_err)?;

        let path = dest.join(storage::layer_file_name(index, &layer.digest));
        let file = File::create(&path).map_err(|e| RockerError::Io {
            path: path.clone(),
            source: e,
        })?;
        let mut writer = DigestWriter::new(BufWriter::new(file));
        let _ = std::io::copy(&mut response, &mut writer).map_err(|e| fetch_err(e.to_string()))?;
        let bytes = writer.written();
        let (mut file, actual) = writer.finalize();
        file.flush().map_err(|e| RockerError::Io {
            path: path.clone(),
            source: e,
        })?;

        hash::verify_digest(&layer.digest, &actual)?;
        tracing::info!(digest = %layer.digest, bytes, path = %path.display(), "layer downloaded");
        Ok(path)
    }

    fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
        token: &str,
        accept: &str,
    ) -> std::result::Result<Response, String> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.base_url());
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(ACCEPT, accept)
            .send()
            .map_err(|e| e.to_string())?;
        check_status(response)
    }

    fn base_url(&self) -> &str {
        self.config.registry_url.trim_end_matches('/')
    }
}

impl ImagePuller for RegistryClient {
    fn pull(&self, image: &ImageRef, dest: &Path) -> Result<Vec<PathBuf>> {
        let repository = image.repository();
        let token = self.resolve_auth_token(&repository)?;
        let digest = self.select_platform_manifest_digest(&repository, &image.tag, &token)?;
        let manifest = self.fetch_manifest(&repository, &digest, &token)?;
        let paths = self.download_layers(&manifest, &repository, &token, dest)?;
        tracing::info!(image = %image, layers = paths.len(), dest = %dest.display(), "image pulled");
        Ok(paths)
    }
}

/// Passes successful responses through and turns any other status into a reason.
fn check_status(response: Response) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(format!("HTTP {status} from {}", response.url()))
    }
}
