use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HypervisorError, Result};
use crate::hypervisor::virsh::overlay_path;
use crate::hypervisor::{DiskInfo, DomainState, HypervisorClient, SnapshotDisk};

/// In-memory guest that records every call. Snapshots create real overlay
/// files next to the disk sources so merge and cleanup can be observed.
pub struct MockHypervisor {
    state: RefCell<DomainState>,
    disks: Vec<DiskInfo>,
    /// Whether a shutdown request actually powers the guest off.
    pub honours_shutdown: bool,
    pub fail_snapshot: bool,
    /// Disk target whose blockcommit fails.
    pub fail_commit: Option<String>,
    calls: RefCell<Vec<String>>,
    backing: RefCell<HashMap<PathBuf, PathBuf>>,
}

impl MockHypervisor {
    pub fn new(state: DomainState, disks: Vec<DiskInfo>) -> Self {
        Self {
            state: RefCell::new(state),
            disks,
            honours_shutdown: true,
            fail_snapshot: false,
            fail_commit: None,
            calls: RefCell::new(Vec::new()),
            backing: RefCell::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, op: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.starts_with(op))
    }

    /// Marks `image` as an overlay on top of `base`.
    pub fn set_backing(&self, image: &Path, base: &Path) {
        self.backing
            .borrow_mut()
            .insert(image.to_path_buf(), base.to_path_buf());
    }

    pub fn state(&self) -> DomainState {
        self.state.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl HypervisorClient for MockHypervisor {
    fn domain_state(&self, vm: &str) -> Result<DomainState> {
        self.record(format!("domstate {}", vm));
        Ok(self.state())
    }

    fn shutdown(&self, vm: &str) -> Result<()> {
        self.record(format!("shutdown {}", vm));
        if self.honours_shutdown {
            *self.state.borrow_mut() = DomainState::ShutOff;
        }
        Ok(())
    }

    fn start(&self, vm: &str) -> Result<()> {
        self.record(format!("start {}", vm));
        *self.state.borrow_mut() = DomainState::Running;
        Ok(())
    }

    fn suspend(&self, vm: &str) -> Result<()> {
        self.record(format!("suspend {}", vm));
        *self.state.borrow_mut() = DomainState::Paused;
        Ok(())
    }

    fn resume(&self, vm: &str) -> Result<()> {
        self.record(format!("resume {}", vm));
        *self.state.borrow_mut() = DomainState::Running;
        Ok(())
    }

    fn dump_descriptor(&self, vm: &str) -> Result<String> {
        self.record(format!("dumpxml {}", vm));
        Ok(format!("<domain><name>{}</name></domain>\n", vm))
    }

    fn list_disks(&self, vm: &str) -> Result<Vec<DiskInfo>> {
        self.record(format!("domblklist {}", vm));
        Ok(self.disks.clone())
    }

    fn create_external_snapshot(
        &self,
        vm: &str,
        tag: &str,
        disks: &[DiskInfo],
    ) -> Result<Vec<SnapshotDisk>> {
        self.record(format!("snapshot {} {}", vm, tag));
        if self.fail_snapshot {
            return Err(HypervisorError::Command("snapshot-create-as".to_string(), 1, "boom".to_string()).into());
        }
        let mut snaps = Vec::new();
        for disk in disks {
            let overlay = overlay_path(&disk.source, tag);
            fs::write(&overlay, b"overlay")?;
            self.backing
                .borrow_mut()
                .insert(overlay.clone(), disk.source.clone());
            snaps.push(SnapshotDisk {
                disk: disk.clone(),
                overlay,
            });
        }
        Ok(snaps)
    }

    fn backing_file(&self, image: &Path) -> Result<Option<PathBuf>> {
        self.record(format!("backing {}", image.display()));
        Ok(self.backing.borrow().get(image).cloned())
    }

    fn commit_and_pivot(&self, vm: &str, target: &str) -> Result<()> {
        self.record(format!("blockcommit {} {}", vm, target));
        if self.fail_commit.as_deref() == Some(target) {
            return Err(HypervisorError::Command("blockcommit".to_string(), 1, "busy".to_string()).into());
        }
        Ok(())
    }
}
