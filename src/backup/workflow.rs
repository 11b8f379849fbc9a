//! Per-client backup state machine.
//!
//! ```text
//! Idle -> Stopping | Pausing -> Snapshotting -> Restarting | Resuming
//!      -> Merging -> Finalizing -> Done | Failed | Skipped
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use crate::backup::program::run_backup_program;
use crate::backup::retention::unit_name;
use crate::config::model::{ClientSpec, GlobalConfig};
use crate::error::{Result, VirtBackupError};
use crate::hypervisor::{DiskInfo, DomainState, HypervisorClient, SnapshotDisk};
use crate::types::{Backend, Method};
use crate::util::fs::FileSystemOps;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Stopping,
    Pausing,
    Snapshotting,
    Restarting,
    Resuming,
    Merging,
    Finalizing,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new retained unit was filed at `unit`.
    Done { unit: PathBuf },
    Failed { reason: String },
    /// Nothing to do this cycle, e.g. the guest was not running.
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done { unit } => write!(f, "done ({})", unit.display()),
            Outcome::Failed { reason } => write!(f, "failed: {}", reason),
            Outcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Descriptor dump whose presence marks a usable backup in the scratch area.
pub fn descriptor_path(scratch: &Path, vm: &str) -> PathBuf {
    scratch.join(format!("{}.xml", vm))
}

const TAG_PREFIX: &str = "virt-backup-";

pub fn snapshot_tag(started: NaiveDateTime) -> String {
    format!("{}{}", TAG_PREFIX, started.format("%Y%m%d-%H%M%S"))
}

pub struct BackupWorkflow<'a> {
    hypervisor: &'a dyn HypervisorClient,
    fs: &'a dyn FileSystemOps,
    global: &'a GlobalConfig,
    poll_interval: Duration,
    trail: Vec<WorkflowState>,
}

impl<'a> BackupWorkflow<'a> {
    pub fn new(
        hypervisor: &'a dyn HypervisorClient,
        fs: &'a dyn FileSystemOps,
        global: &'a GlobalConfig,
    ) -> Self {
        Self {
            hypervisor,
            fs,
            global,
            poll_interval: SHUTDOWN_POLL_INTERVAL,
            trail: vec![WorkflowState::Idle],
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.trail.last().copied().unwrap_or(WorkflowState::Idle)
    }

    /// Every state visited by the last `execute`, starting at `Idle`.
    pub fn trail(&self) -> &[WorkflowState] {
        &self.trail
    }

    /// Backs up one client. Errors from the hypervisor or the filesystem end
    /// the cycle as `Failed` and never propagate.
    pub fn execute(&mut self, client: &ClientSpec, started: NaiveDateTime) -> Outcome {
        self.trail = vec![WorkflowState::Idle];
        let global = self.global;
        let result = match &global.backend {
            Backend::Program { path } => self.run_program(path, client, started),
            Backend::Libvirt => self.run_native(client, started),
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => self.fail(err.to_string()),
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!("workflow {:?} -> {:?}", self.state(), next);
        self.trail.push(next);
    }

    fn fail(&mut self, reason: impl Into<String>) -> Outcome {
        self.transition(WorkflowState::Failed);
        Outcome::Failed {
            reason: reason.into(),
        }
    }

    fn skip(&mut self, reason: impl Into<String>) -> Outcome {
        self.transition(WorkflowState::Skipped);
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    fn run_program(
        &mut self,
        program: &Path,
        client: &ClientSpec,
        started: NaiveDateTime,
    ) -> Result<Outcome> {
        let scratch = self.global.client_dir(&client.name);
        self.fs.create_dir_all(&scratch)?;
        let descriptor = descriptor_path(&scratch, &client.name);
        if descriptor.exists() {
            warn!(
                "removing descriptor {} left by an earlier attempt",
                descriptor.display()
            );
            self.fs.remove_file(&descriptor)?;
        }

        self.transition(match client.method {
            Method::Shutdown => WorkflowState::Stopping,
            Method::Suspend => WorkflowState::Pausing,
        });
        let rc = run_backup_program(program, self.global, client)?;
        if rc != 0 {
            warn!(
                "{} exited with code {} for {}",
                program.display(),
                rc,
                client.name
            );
        }
        let produced = self.client_files(&scratch, &client.name)?;
        self.finalize(client, &scratch, started, produced)
    }

    /// Files in the scratch area named after `vm`: its descriptor and its
    /// `<vm>_<disk>` images.
    fn client_files(&self, scratch: &Path, vm: &str) -> Result<Vec<PathBuf>> {
        let descriptor = format!("{}.xml", vm);
        let prefix = format!("{}_", vm);
        let files = self
            .fs
            .list_files(scratch)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .map(|name| {
                        let name = name.to_string_lossy();
                        name == descriptor.as_str() || name.starts_with(&prefix)
                    })
                    .unwrap_or(false)
            })
            .collect();
        Ok(files)
    }

    fn run_native(&mut self, client: &ClientSpec, started: NaiveDateTime) -> Result<Outcome> {
        let vm = client.name.as_str();
        let state = self.hypervisor.domain_state(vm)?;
        if !state.is_running() {
            info!("{} is {}; nothing to back up", vm, state);
            return Ok(self.skip(format!("{} is {}", vm, state)));
        }

        let scratch = self.global.client_dir(vm);
        self.fs.create_dir_all(&scratch)?;
        let descriptor = descriptor_path(&scratch, vm);
        self.fs
            .write_file(&descriptor, &self.hypervisor.dump_descriptor(vm)?)?;

        let disks = self.hypervisor.list_disks(vm)?;
        if disks.is_empty() {
            return Ok(self.fail(format!("{} has no file-backed disks", vm)));
        }
        if let Some(reason) = self.unmerged_disk(vm, &disks)? {
            return Ok(self.fail(reason));
        }
        let tag = snapshot_tag(started);

        let snapshot = match client.method {
            Method::Shutdown => {
                self.transition(WorkflowState::Stopping);
                self.hypervisor.shutdown(vm)?;
                if !self.wait_for_shutoff(vm)? {
                    return Ok(self.fail(format!(
                        "{} did not shut down within {}s",
                        vm,
                        self.global.shutdown_timeout.as_secs()
                    )));
                }
                self.transition(WorkflowState::Snapshotting);
                let snapshot = self.hypervisor.create_external_snapshot(vm, &tag, &disks);
                self.transition(WorkflowState::Restarting);
                self.hypervisor.start(vm)?;
                snapshot?
            }
            Method::Suspend => {
                self.transition(WorkflowState::Pausing);
                self.hypervisor.suspend(vm)?;
                self.transition(WorkflowState::Snapshotting);
                let snapshot = self.hypervisor.create_external_snapshot(vm, &tag, &disks);
                self.transition(WorkflowState::Resuming);
                self.hypervisor.resume(vm)?;
                snapshot?
            }
        };

        // Every overlay is committed even after an earlier disk failed.
        self.transition(WorkflowState::Merging);
        let mut produced = vec![descriptor];
        let mut errors = Vec::new();
        for disk in &snapshot {
            match self.merge_disk(vm, &scratch, disk) {
                Ok(image) => produced.push(image),
                Err(reason) => {
                    error!("merging {} of {} failed: {}", disk.disk.target, vm, reason);
                    errors.push(reason);
                }
            }
        }
        if !errors.is_empty() {
            return Ok(self.fail(format!("merge of {} failed: {}", vm, errors.join("; "))));
        }
        self.finalize(client, &scratch, started, produced)
    }

    /// A disk still running on an overlay would be backed up as a bare delta.
    fn unmerged_disk(&self, vm: &str, disks: &[DiskInfo]) -> Result<Option<String>> {
        let marker = format!(".{}", TAG_PREFIX);
        for disk in disks {
            let name = disk
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.contains(&marker) {
                return Ok(Some(format!(
                    "{} of {} is still on overlay {}",
                    disk.target,
                    vm,
                    disk.source.display()
                )));
            }
            if let Some(base) = self.hypervisor.backing_file(&disk.source)? {
                return Ok(Some(format!(
                    "{} of {} has backing file {}",
                    disk.target,
                    vm,
                    base.display()
                )));
            }
        }
        Ok(None)
    }

    /// Polls until the guest is shut off; `false` once the bound is exceeded.
    fn wait_for_shutoff(&self, vm: &str) -> Result<bool> {
        let deadline = Instant::now() + self.global.shutdown_timeout;
        loop {
            if self.hypervisor.domain_state(vm)? == DomainState::ShutOff {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(self.poll_interval);
        }
    }

    // The commit runs even when the copy failed so the guest is never left
    // writing into the overlay.
    fn merge_disk(
        &self,
        vm: &str,
        scratch: &Path,
        snap: &SnapshotDisk,
    ) -> std::result::Result<PathBuf, String> {
        let target = &snap.disk.target;
        let copied = self.copy_backing(vm, scratch, snap);
        self.hypervisor
            .commit_and_pivot(vm, target)
            .map_err(|e| format!("{}: {}", target, e))?;
        self.fs
            .remove_file(&snap.overlay)
            .map_err(|e| format!("{}: {}", target, e))?;
        copied.map_err(|e| format!("{}: {}", target, e))
    }

    // The backing file must be copied before the commit, which rewrites it.
    fn copy_backing(&self, vm: &str, scratch: &Path, snap: &SnapshotDisk) -> Result<PathBuf> {
        let backing = self.hypervisor.backing_file(&snap.overlay)?.ok_or_else(|| {
            VirtBackupError::message(format!("{} has no backing file", snap.overlay.display()))
        })?;
        let ext = if self.global.compress {
            "qcow2"
        } else {
            snap.disk.format.as_str()
        };
        let dest = scratch.join(format!("{}_{}.{}", vm, snap.disk.target, ext));
        info!("copying {} to {}", backing.display(), dest.display());
        self.fs.copy_image(&backing, &dest, self.global.compress)?;
        Ok(dest)
    }

    /// Files `produced` into a new unit directory once the descriptor exists.
    fn finalize(
        &mut self,
        client: &ClientSpec,
        scratch: &Path,
        started: NaiveDateTime,
        produced: Vec<PathBuf>,
    ) -> Result<Outcome> {
        self.transition(WorkflowState::Finalizing);
        let descriptor = descriptor_path(scratch, &client.name);
        if !descriptor.is_file() {
            return Ok(self.fail(format!(
                "backup of {} failed; {} not found, leaving {} for inspection",
                client.name,
                descriptor.display(),
                scratch.display()
            )));
        }
        let unit = scratch.join(unit_name(started));
        if unit.exists() {
            return Err(VirtBackupError::message(format!(
                "{} already exists",
                unit.display()
            )));
        }
        self.fs.create_dir_all(&unit)?;
        for file in produced {
            if let Some(name) = file.file_name() {
                self.fs.move_file(&file, &unit.join(name))?;
            }
        }
        self.transition(WorkflowState::Done);
        Ok(Outcome::Done { unit })
    }
}
