//! Launch mode selection for the two-branch binary.

use std::ffi::OsStr;

use rocker_common::constants::INIT_ENV;

/// Role of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Builds the root filesystem and supervises the container.
    Supervisor,
    /// Runs inside the container as its first process.
    Init,
}

impl LaunchMode {
    /// Reads the mode marker from the process environment.
    #[must_use]
    pub fn current() -> Self {
        Self::from_marker(std::env::var_os(INIT_ENV).as_deref())
    }

    /// Maps a raw marker value onto a mode. Only `1` selects [`LaunchMode::Init`].
    #[must_use]
    pub fn from_marker(value: Option<&OsStr>) -> Self {
        match value {
            Some(v) if v == "1" => Self::Init,
            _ => Self::Supervisor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_selects_init_only_when_set_to_one() {
        assert_eq!(LaunchMode::from_marker(None), LaunchMode::Supervisor);
        assert_eq!(
            LaunchMode::from_marker(Some(OsStr::new("1"))),
            LaunchMode::Init
        );
        assert_eq!(
            LaunchMode::from_marker(Some(OsStr::new("true"))),
            LaunchMode::Supervisor
        );
        assert_eq!(
            LaunchMode::from_marker(Some(OsStr::new(""))),
            LaunchMode::Supervisor
        );
    }
}
