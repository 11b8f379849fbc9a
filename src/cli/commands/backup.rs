use std::path::Path;

use tracing::{info, warn};

use crate::backup::{print_client_details, print_client_header, BackupRunner};
use crate::config::load::{read_config, resolve};
use crate::daemon::Daemon;
use crate::error::{ConfigError, Result, VirtBackupError};
use crate::hypervisor::VirshClient;
use crate::logging::{init_tracing, validate_log_template};
use crate::schedule::ClientRegistry;
use crate::signal_handler::install_stop_handler;
use crate::types::RunMode;
use crate::util::fs::LocalFs;

/// Loads the config, then either schedules forever or backs up `selected`
/// once.
pub fn run_backup_command(
    config_path: &Path,
    selected: &[String],
    print_order: bool,
    run_mode: RunMode,
) -> Result<()> {
    let cfg = read_config(config_path)?;
    // An invalid template is reported by resolve; log to stderr until then.
    let logfile = cfg
        .global
        .logfile
        .clone()
        .filter(|template| validate_log_template(template).is_ok());
    init_tracing(logfile.as_deref(), run_mode.verbose);
    info!("virt-backup {} starting", env!("CARGO_PKG_VERSION"));

    let runtime = resolve(cfg)?;
    let registry = ClientRegistry::new(runtime.clients);

    if print_order {
        print_client_header();
        for state in registry.ordered() {
            print_client_details(&state.spec);
        }
        return Ok(());
    }

    let unknown: Vec<&String> = selected
        .iter()
        .filter(|name| !registry.contains(name))
        .collect();
    if !unknown.is_empty() {
        for name in &unknown {
            eprintln!("client not found: {}", name);
        }
        return Err(ConfigError::Invalid("no such client(s) configured; aborting".to_string()).into());
    }
    if registry.is_empty() {
        warn!("no valid clients configured");
    }

    let hypervisor = VirshClient::new();
    let fs_ops = LocalFs::new(run_mode);
    let runner = BackupRunner::new(&runtime.global, &hypervisor, &fs_ops, run_mode);
    let mut daemon = Daemon::new(registry, runner);
    install_stop_handler(&daemon.stop_flag())?;

    if selected.is_empty() {
        daemon.run_forever();
        return Ok(());
    }

    let reports = daemon.run_once(selected);
    let failed = reports.iter().filter(|r| r.outcome.is_failed()).count();
    if failed > 0 {
        return Err(VirtBackupError::message(format!(
            "{} of {} backup(s) failed",
            failed,
            reports.len()
        )));
    }
    Ok(())
}
