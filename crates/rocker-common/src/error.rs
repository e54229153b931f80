//! Unified error types for the rocker workspace.
//!
//! Every pipeline stage reports failures through a dedicated variant so the
//! caller can tell which stage failed (see [`RockerError::stage`]) and still
//! see the underlying cause in the rendered message.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RockerError {
    /// A scoped pull token could not be obtained.
    #[error("authentication for {image} failed: {reason}")]
    Auth {
        /// Repository path the token was requested for.
        image: String,
        /// Underlying cause.
        reason: String,
    },

    /// The manifest list has no entry for the host OS/architecture.
    #[error("no manifest for platform {os}/{architecture} in {image}:{tag}")]
    NoMatchingPlatform {
        /// Repository path.
        image: String,
        /// Tag that was resolved.
        tag: String,
        /// Host operating system (OCI naming).
        os: String,
        /// Host architecture (OCI naming).
        architecture: String,
    },

    /// A manifest list or manifest could not be fetched or decoded.
    #[error("manifest {reference} for {image} could not be fetched: {reason}")]
    Manifest {
        /// Repository path.
        image: String,
        /// Tag or digest that was requested.
        reference: String,
        /// Underlying cause.
        reason: String,
    },

    /// A layer blob could not be downloaded.
    #[error("layer {digest} could not be fetched: {reason}")]
    LayerFetch {
        /// Digest of the failed layer.
        digest: String,
        /// Underlying cause.
        reason: String,
    },

    /// A downloaded blob does not match its content digest.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// A layer archive could not be extracted.
    #[error("failed to extract {path} from layer {layer}: {source}")]
    Extraction {
        /// Layer archive being extracted.
        layer: PathBuf,
        /// Destination or archive path the failure relates to.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A layer archive contains an entry kind with no defined handling.
    #[error("unsupported entry type {kind} for {entry} in layer {layer}")]
    UnsupportedEntry {
        /// Layer archive being extracted.
        layer: PathBuf,
        /// Path of the entry inside the archive.
        entry: String,
        /// Human-readable entry type.
        kind: String,
    },

    /// chroot, chdir, proc mount, or init handshake failed.
    #[error("isolation setup failed during {step}: {reason}")]
    IsolationSetup {
        /// Setup step that failed.
        step: &'static str,
        /// Underlying cause.
        reason: String,
    },

    /// The entrypoint executable is absent from the root filesystem.
    #[error("entrypoint {path} does not exist inside the root filesystem")]
    EntrypointNotFound {
        /// Entrypoint path as seen from inside the container.
        path: String,
    },

    /// The resource-control group could not be created or joined.
    #[error("resource attach failed: {message}")]
    ResourceAttach {
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A build instruction could not be parsed.
    #[error("line {line}: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Stage of the download, assemble, isolate, execute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Token retrieval.
    Auth,
    /// Manifest list scan for the host platform.
    PlatformSelection,
    /// Single-platform manifest retrieval.
    ManifestFetch,
    /// Layer blob download.
    LayerFetch,
    /// Root filesystem assembly.
    Extraction,
    /// chroot, chdir, proc mount.
    IsolationSetup,
    /// Entrypoint lookup inside the root filesystem.
    EntrypointResolution,
    /// Resource group creation and attachment.
    ResourceAttach,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auth => "auth",
            Self::PlatformSelection => "platform selection",
            Self::ManifestFetch => "manifest fetch",
            Self::LayerFetch => "layer fetch",
            Self::Extraction => "extraction",
            Self::IsolationSetup => "isolation setup",
            Self::EntrypointResolution => "entrypoint resolution",
            Self::ResourceAttach => "resource attach",
        };
        f.write_str(name)
    }
}

impl RockerError {
    /// Returns the pipeline stage this error belongs to, if any.
    ///
    /// Ambient failures (configuration, parsing, bare I/O) are not tied
    /// to a single stage and return `None`.
    #[must_use]
    pub const fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Auth { .. } => Some(PipelineStage::Auth),
            Self::NoMatchingPlatform { .. } => Some(PipelineStage::PlatformSelection),
            Self::Manifest { .. } => Some(PipelineStage::ManifestFetch),
            Self::LayerFetch { .. } | Self::HashMismatch { .. } => Some(PipelineStage::LayerFetch),
            Self::Extraction { .. } | Self::UnsupportedEntry { .. } => {
                Some(PipelineStage::Extraction)
            }
            Self::IsolationSetup { .. } => Some(PipelineStage::IsolationSetup),
            Self::EntrypointNotFound { .. } => Some(PipelineStage::EntrypointResolution),
            Self::ResourceAttach { .. } => Some(PipelineStage::ResourceAttach),
            Self::Io { .. } | Self::Config { .. } | Self::Parse { .. } | Self::Serialization { .. } => {
                None
            }
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RockerError>;
