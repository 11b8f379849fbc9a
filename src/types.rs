use std::fmt;
use std::path::PathBuf;

/// How the guest is quiesced while its disks are snapshotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Suspend,
    Shutdown,
}

impl Method {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "suspend" => Ok(Method::Suspend),
            "shutdown" => Ok(Method::Shutdown),
            _ => Err(format!(
                "unknown method {}; expected suspend or shutdown",
                value
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Suspend => "suspend",
            Method::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which backend drives the snapshot sequence for the whole process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Delegate each client to an external backup program.
    Program { path: PathBuf },
    /// Drive virsh/qemu-img directly.
    Libvirt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Program,
    Libvirt,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "program" => Ok(BackendKind::Program),
            "libvirt" => Ok(BackendKind::Libvirt),
            _ => Err(format!("unknown api {}; expected program or libvirt", value)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Program => "program",
            BackendKind::Libvirt => "libvirt",
        }
    }
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Program { .. } => BackendKind::Program,
            Backend::Libvirt => BackendKind::Libvirt,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunMode {
    pub dry_run: bool,
    pub verbose: bool,
}
