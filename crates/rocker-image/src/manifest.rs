//! Wire types for the registry's token, manifest list, and manifest responses.

use rocker_common::types::Platform;
use serde::Deserialize;

/// Body returned by the token endpoint.
///
/// Docker Hub sends both `token` and `access_token`; other registries send
/// only one of them.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// OAuth2-style alias of `token`.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl TokenResponse {
    /// Returns the first non-empty token field.
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        self.token
            .filter(|t| !t.is_empty())
            .or(self.access_token.filter(|t| !t.is_empty()))
    }
}

/// Multi-architecture index published for one tag.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestList {
    /// One descriptor per platform variant.
    #[serde(default)]
    pub manifests: Vec<PlatformDescriptor>,
}

impl ManifestList {
    /// Returns the first descriptor whose `{os, architecture}` equals `platform`.
    #[must_use]
    pub fn select(&self, platform: &Platform) -> Option<&PlatformDescriptor> {
        self.manifests
            .iter()
            .find(|m| m.platform.as_ref() == Some(platform))
    }
}

/// Entry of a manifest list.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformDescriptor {
    /// Digest of the single-platform manifest.
    pub digest: String,
    /// Platform the manifest targets.
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// Single-platform manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Layers, bottom to top.
    pub layers: Vec<LayerDescriptor>,
}

/// One layer of a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerDescriptor {
    /// Content digest of the compressed archive.
    pub digest: String,
    /// Compressed size in bytes, when the registry reports it.
    #[serde(default)]
    pub size: u64,
}
