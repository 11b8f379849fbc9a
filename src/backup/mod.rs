use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{error, info};

use crate::config::model::{ClientSpec, GlobalConfig};
use crate::hypervisor::HypervisorClient;
use crate::types::RunMode;
use crate::util::fs::FileSystemOps;

pub mod program;
pub mod retention;
pub mod workflow;

pub use workflow::{BackupWorkflow, Outcome, WorkflowState};

pub fn print_client_details(client: &ClientSpec) {
    println!(
        "{:<20} {:<16} {:<6} {:<4} {:<4} {:<5} {:<10}",
        client.name,
        client.window.describe_weekdays(),
        client.window.describe_days_of_month(),
        client.priority,
        client.retention,
        client.window.time.format("%H%M"),
        client.method
    );
}

pub fn print_client_header() {
    println!(
        "{:<20} {:<16} {:<6} {:<4} {:<4} {:<5} {:<10}",
        "Client", "Weekday", "Dom", "Prio", "Ret", "Time", "Method"
    );
}

/// Runs retention and then the workflow for one client at a time.
pub struct BackupRunner<'a> {
    global: &'a GlobalConfig,
    hypervisor: &'a dyn HypervisorClient,
    fs: &'a dyn FileSystemOps,
    run_mode: RunMode,
    poll_interval: Option<Duration>,
}

impl<'a> BackupRunner<'a> {
    pub fn new(
        global: &'a GlobalConfig,
        hypervisor: &'a dyn HypervisorClient,
        fs: &'a dyn FileSystemOps,
        run_mode: RunMode,
    ) -> Self {
        Self {
            global,
            hypervisor,
            fs,
            run_mode,
            poll_interval: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn global(&self) -> &GlobalConfig {
        self.global
    }

    pub fn run_client(&self, client: &ClientSpec, started: NaiveDateTime) -> Outcome {
        let client_dir = self.global.client_dir(&client.name);
        if let Err(err) = retention::prune(self.fs, &client_dir, client.retention) {
            error!("retention for {} failed: {}", client.name, err);
            return Outcome::Failed {
                reason: format!("retention: {}", err),
            };
        }

        if self.run_mode.dry_run {
            info!(
                "dry-run: would back up {} ({}, {})",
                client.name,
                client.method,
                self.global.backend.kind().as_str()
            );
            return Outcome::Skipped {
                reason: "dry-run".to_string(),
            };
        }

        info!("Backing up {}", client.name);
        let mut workflow = BackupWorkflow::new(self.hypervisor, self.fs, self.global);
        if let Some(interval) = self.poll_interval {
            workflow = workflow.with_poll_interval(interval);
        }
        workflow.execute(client, started)
    }
}
