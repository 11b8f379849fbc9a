use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VirtBackupError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Config(ConfigError),
    #[error("{0}")]
    Hypervisor(HypervisorError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse config: {0}")]
    Parse(String),
    #[error("missing required option {0}")]
    Missing(&'static str),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("{0}: {1}")]
    Spawn(String, String),
    #[error("{0} failed with exit code {1}: {2}")]
    Command(String, i32, String),
    #[error("unexpected output from {0}: {1}")]
    Output(String, String),
}

pub type Result<T> = std::result::Result<T, VirtBackupError>;

impl VirtBackupError {
    pub fn message(msg: impl Into<String>) -> Self {
        VirtBackupError::Message(msg.into())
    }
}

impl From<ConfigError> for VirtBackupError {
    fn from(err: ConfigError) -> Self {
        VirtBackupError::Config(err)
    }
}

impl From<HypervisorError> for VirtBackupError {
    fn from(err: HypervisorError) -> Self {
        VirtBackupError::Hypervisor(err)
    }
}
