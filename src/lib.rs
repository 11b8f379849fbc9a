pub mod backup;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hypervisor;
pub mod logging;
pub mod schedule;
pub mod signal_handler;
pub mod types;
pub mod util;

pub use error::{Result, VirtBackupError};
pub use types::{Backend, Method, RunMode};
