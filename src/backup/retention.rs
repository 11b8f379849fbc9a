use std::path::Path;

use chrono::NaiveDateTime;
use glob::Pattern;
use tracing::info;

use crate::error::{Result, VirtBackupError};
use crate::util::fs::FileSystemOps;

/// Name of a retained backup directory. Must stay in step with
/// `UNIT_NAME_PATTERN`.
pub const UNIT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const UNIT_NAME_PATTERN: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]_[0-9][0-9]-[0-9][0-9]-[0-9][0-9]";

pub fn unit_name(at: NaiveDateTime) -> String {
    at.format(UNIT_NAME_FORMAT).to_string()
}

fn unit_pattern() -> Result<Pattern> {
    Pattern::new(UNIT_NAME_PATTERN)
        .map_err(|e| VirtBackupError::message(format!("retention pattern: {}", e)))
}

/// Retained backups of a client, oldest first.
pub fn retained_units(fs: &dyn FileSystemOps, client_dir: &Path) -> Result<Vec<String>> {
    fs.matching_dirs(client_dir, &unit_pattern()?)
}

/// Removes the oldest retained backups until fewer than `retention` remain,
/// making room for the backup about to be taken. Returns the removed names.
pub fn prune(fs: &dyn FileSystemOps, client_dir: &Path, retention: usize) -> Result<Vec<String>> {
    let mut units = retained_units(fs, client_dir)?;
    let mut removed = Vec::new();
    while !units.is_empty() && units.len() >= retention {
        let oldest = units.remove(0);
        let target = client_dir.join(&oldest);
        info!("Removing {} due to retention", target.display());
        fs.remove_dir_all(&target)?;
        removed.push(oldest);
    }
    Ok(removed)
}
