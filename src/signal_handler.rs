use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;

use crate::error::{Result, VirtBackupError};

/// Raises `stop` on SIGINT or SIGTERM.
pub fn install_stop_handler(stop: &Arc<AtomicBool>) -> Result<()> {
    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(stop)).map_err(|e| {
            VirtBackupError::message(format!("signal handler setup failed: {}", e))
        })?;
    }
    Ok(())
}
