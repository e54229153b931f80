//! Typed build instructions.

use std::fmt;
use std::path::PathBuf;

use rocker_common::types::ImageRef;

/// One build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Base image whose layers form the root filesystem.
    From(ImageRef),
    /// Copies a path from the build context into the root filesystem.
    Copy {
        /// Path relative to the build context.
        source: PathBuf,
        /// Path inside the root filesystem. A trailing `/` names a directory.
        destination: PathBuf,
    },
    /// Command vector of the container's main process.
    Entrypoint(Vec<String>),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From(image) => write!(f, "FROM {image}"),
            Self::Copy {
                source,
                destination,
            } => write!(f, "COPY {} {}", source.display(), destination.display()),
            Self::Entrypoint(argv) => write!(f, "ENTRYPOINT {argv:?}"),
        }
    }
}
