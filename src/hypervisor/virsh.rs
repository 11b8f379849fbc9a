use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::error::{HypervisorError, Result};
use crate::hypervisor::{DiskInfo, DomainState, HypervisorClient, SnapshotDisk};
use crate::util::command::capture;

/// `HypervisorClient` backed by the `virsh` and `qemu-img` command line tools.
#[derive(Debug, Clone)]
pub struct VirshClient {
    virsh: String,
    qemu_img: String,
}

impl Default for VirshClient {
    fn default() -> Self {
        Self {
            virsh: "virsh".to_string(),
            qemu_img: "qemu-img".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    format: String,
    #[serde(default, rename = "backing-filename")]
    backing_filename: Option<String>,
    #[serde(default, rename = "full-backing-filename")]
    full_backing_filename: Option<String>,
}

impl VirshClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn virsh(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.virsh);
        cmd.arg("-q").args(args);
        capture(&mut cmd)
    }

    fn image_info(&self, image: &Path) -> Result<ImageInfo> {
        let mut cmd = Command::new(&self.qemu_img);
        cmd.arg("info")
            .arg("--force-share")
            .arg("--output=json")
            .arg(image);
        let out = capture(&mut cmd)?;
        parse_image_info(&out)
    }
}

fn parse_image_info(out: &str) -> Result<ImageInfo> {
    serde_json::from_str(out)
        .map_err(|e| HypervisorError::Output("qemu-img info".to_string(), e.to_string()).into())
}

/// Parses `virsh domblklist --details`, keeping file-backed disks only.
pub(crate) fn parse_domblklist(out: &str) -> Vec<(String, PathBuf)> {
    let mut disks = Vec::new();
    for line in out.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (kind, device, target) = (fields[0], fields[1], fields[2]);
        let source = fields[3..].join(" ");
        if kind != "file" || device != "disk" || source == "-" {
            continue;
        }
        disks.push((target.to_string(), PathBuf::from(source)));
    }
    disks
}

/// Overlay path for a disk: the tag appended to the source file name, so
/// `data.qcow2` and `data.raw` side by side get distinct overlays.
pub(crate) fn overlay_path(source: &Path, tag: &str) -> PathBuf {
    let mut name = source.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(tag);
    source.with_file_name(name)
}

pub(crate) fn snapshot_args(vm: &str, tag: &str, disks: &[SnapshotDisk]) -> Vec<String> {
    let mut args = vec![
        "snapshot-create-as".to_string(),
        "--domain".to_string(),
        vm.to_string(),
        "--name".to_string(),
        tag.to_string(),
        "--disk-only".to_string(),
        "--atomic".to_string(),
        "--no-metadata".to_string(),
    ];
    for snap in disks {
        args.push("--diskspec".to_string());
        args.push(format!(
            "{},snapshot=external,file={}",
            snap.disk.target,
            snap.overlay.display()
        ));
    }
    args
}

impl HypervisorClient for VirshClient {
    fn domain_state(&self, vm: &str) -> Result<DomainState> {
        Ok(DomainState::parse(&self.virsh(&["domstate", vm])?))
    }

    fn shutdown(&self, vm: &str) -> Result<()> {
        self.virsh(&["shutdown", vm]).map(|_| ())
    }

    fn start(&self, vm: &str) -> Result<()> {
        self.virsh(&["start", vm]).map(|_| ())
    }

    fn suspend(&self, vm: &str) -> Result<()> {
        self.virsh(&["suspend", vm]).map(|_| ())
    }

    fn resume(&self, vm: &str) -> Result<()> {
        self.virsh(&["resume", vm]).map(|_| ())
    }

    fn dump_descriptor(&self, vm: &str) -> Result<String> {
        self.virsh(&["dumpxml", vm])
    }

    fn list_disks(&self, vm: &str) -> Result<Vec<DiskInfo>> {
        let out = self.virsh(&["domblklist", vm, "--details"])?;
        let mut disks = Vec::new();
        for (target, source) in parse_domblklist(&out) {
            let info = self.image_info(&source)?;
            disks.push(DiskInfo {
                target,
                source,
                format: info.format,
            });
        }
        Ok(disks)
    }

    fn create_external_snapshot(
        &self,
        vm: &str,
        tag: &str,
        disks: &[DiskInfo],
    ) -> Result<Vec<SnapshotDisk>> {
        let snaps: Vec<SnapshotDisk> = disks
            .iter()
            .map(|disk| SnapshotDisk {
                disk: disk.clone(),
                overlay: overlay_path(&disk.source, tag),
            })
            .collect();
        let args = snapshot_args(vm, tag, &snaps);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.virsh(&args)?;
        Ok(snaps)
    }

    fn backing_file(&self, image: &Path) -> Result<Option<PathBuf>> {
        let info = self.image_info(image)?;
        Ok(resolve_backing(image, &info))
    }

    fn commit_and_pivot(&self, vm: &str, target: &str) -> Result<()> {
        self.virsh(&["blockcommit", vm, target, "--active", "--pivot", "--wait"])
            .map(|_| ())
    }
}

fn resolve_backing(image: &Path, info: &ImageInfo) -> Option<PathBuf> {
    if let Some(full) = &info.full_backing_filename {
        return Some(PathBuf::from(full));
    }
    let path = PathBuf::from(info.backing_filename.as_ref()?);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(image.parent().unwrap_or_else(|| Path::new("/")).join(path))
    }
}
