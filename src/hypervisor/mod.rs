use std::fmt;
use std::path::PathBuf;

use crate::error::Result;

#[cfg(test)]
pub(crate) mod mock;
pub mod virsh;

pub use virsh::VirshClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainState {
    Running,
    Paused,
    ShutOff,
    Other(String),
}

impl DomainState {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => DomainState::Running,
            "paused" => DomainState::Paused,
            "shut off" => DomainState::ShutOff,
            other => DomainState::Other(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DomainState::Running)
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainState::Running => f.write_str("running"),
            DomainState::Paused => f.write_str("paused"),
            DomainState::ShutOff => f.write_str("shut off"),
            DomainState::Other(s) => f.write_str(s),
        }
    }
}

/// A file-backed disk attached to a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    /// Guest device name, e.g. `vda`.
    pub target: String,
    pub source: PathBuf,
    pub format: String,
}

/// The overlay created for one disk by an external snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDisk {
    pub disk: DiskInfo,
    pub overlay: PathBuf,
}

/// Guest power, snapshot and disk operations.
pub trait HypervisorClient {
    fn domain_state(&self, vm: &str) -> Result<DomainState>;
    fn shutdown(&self, vm: &str) -> Result<()>;
    fn start(&self, vm: &str) -> Result<()>;
    fn suspend(&self, vm: &str) -> Result<()>;
    fn resume(&self, vm: &str) -> Result<()>;
    /// The guest's XML descriptor.
    fn dump_descriptor(&self, vm: &str) -> Result<String>;
    fn list_disks(&self, vm: &str) -> Result<Vec<DiskInfo>>;
    /// One atomic disk-only external snapshot over all `disks`.
    fn create_external_snapshot(
        &self,
        vm: &str,
        tag: &str,
        disks: &[DiskInfo],
    ) -> Result<Vec<SnapshotDisk>>;
    /// The image `image` was created on top of, if any.
    fn backing_file(&self, image: &std::path::Path) -> Result<Option<PathBuf>>;
    /// Folds the active overlay of `target` into its backing image and
    /// switches the guest back to that image.
    fn commit_and_pivot(&self, vm: &str, target: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_state_parse() {
        assert_eq!(DomainState::parse("running\n"), DomainState::Running);
        assert_eq!(DomainState::parse("shut off"), DomainState::ShutOff);
        assert_eq!(DomainState::parse("paused"), DomainState::Paused);
        assert_eq!(
            DomainState::parse("in shutdown"),
            DomainState::Other("in shutdown".to_string())
        );
        assert!(!DomainState::parse("pmsuspended").is_running());
    }
}
