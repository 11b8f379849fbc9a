use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tempfile::NamedTempFile;
use tracing::info;
use walkdir::WalkDir;

use crate::error::{Result, VirtBackupError};
use crate::types::RunMode;
use crate::util::command::{nice_ionice, run_command};

/// Filesystem capabilities used by retention and finalize.
pub trait FileSystemOps {
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn move_file(&self, from: &Path, to: &Path) -> Result<()>;
    /// Replaces `path` atomically with `contents`.
    fn write_file(&self, path: &Path, contents: &str) -> Result<()>;
    /// Names of the subdirectories of `dir` matching `pattern`, sorted.
    /// A missing `dir` has no entries.
    fn matching_dirs(&self, dir: &Path, pattern: &Pattern) -> Result<Vec<String>>;
    /// Regular files directly inside `dir`, sorted.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    /// Copies a (possibly sparse) disk image; with `compress` the copy is
    /// written as compressed qcow2.
    fn copy_image(&self, from: &Path, to: &Path, compress: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs {
    run_mode: RunMode,
}

impl LocalFs {
    pub fn new(run_mode: RunMode) -> Self {
        Self { run_mode }
    }
}

fn io_err(action: &str, path: &Path, err: std::io::Error) -> VirtBackupError {
    VirtBackupError::message(format!("{} {}: {}", action, path.display(), err))
}

impl FileSystemOps for LocalFs {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.run_mode.dry_run {
            info!("dry-run: mkdir -p {}", path.display());
            return Ok(());
        }
        fs::create_dir_all(path).map_err(|e| io_err("create", path, e))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        if self.run_mode.dry_run {
            info!("dry-run: rm -rf {}", path.display());
            return Ok(());
        }
        let meta = fs::symlink_metadata(path).map_err(|e| io_err("stat", path, e))?;
        if !meta.is_dir() {
            return Err(VirtBackupError::message(format!(
                "refusing to delete {}: not a directory",
                path.display()
            )));
        }
        fs::remove_dir_all(path).map_err(|e| io_err("delete", path, e))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        if self.run_mode.dry_run {
            info!("dry-run: rm -f {}", path.display());
            return Ok(());
        }
        fs::remove_file(path).map_err(|e| io_err("delete", path, e))
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        if self.run_mode.dry_run {
            info!("dry-run: mv {} {}", from.display(), to.display());
            return Ok(());
        }
        fs::rename(from, to).map_err(|e| io_err("move", from, e))
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if self.run_mode.dry_run {
            info!("dry-run: write {}", path.display());
            return Ok(());
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_err("create temp in", dir, e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| io_err("write", tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| io_err("write", path, e.error))?;
        Ok(())
    }

    fn matching_dirs(&self, dir: &Path, pattern: &Pattern) -> Result<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| {
                VirtBackupError::message(format!("read {}: {}", dir.display(), e))
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if pattern.matches(&name) {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| {
                VirtBackupError::message(format!("read {}: {}", dir.display(), e))
            })?;
            if entry.file_type().is_file() {
                out.push(entry.into_path());
            }
        }
        out.sort();
        Ok(out)
    }

    fn copy_image(&self, from: &Path, to: &Path, compress: bool) -> Result<()> {
        let args: Vec<String> = if compress {
            vec![
                "qemu-img".to_string(),
                "convert".to_string(),
                "-c".to_string(),
                "-O".to_string(),
                "qcow2".to_string(),
                from.to_string_lossy().to_string(),
                to.to_string_lossy().to_string(),
            ]
        } else {
            vec![
                "cp".to_string(),
                "--sparse=always".to_string(),
                from.to_string_lossy().to_string(),
                to.to_string_lossy().to_string(),
            ]
        };
        let mut cmd = nice_ionice(&args);
        if self.run_mode.dry_run {
            info!("dry-run: {}", crate::util::command::command_line(&cmd));
            return Ok(());
        }
        let rc = run_command(&mut cmd)?;
        if rc != 0 {
            return Err(VirtBackupError::message(format!(
                "copy {} to {} failed with exit code {}",
                from.display(),
                to.display(),
                rc
            )));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn matching_dirs_filters_and_sorts() {
        let dir = TempDir::new().expect("tempdir");
        for name in ["b-2", "a-1", "c-3", "skip"] {
            fs::create_dir(dir.path().join(name)).expect("mkdir");
        }
        fs::write(dir.path().join("d-4"), b"file").expect("write");
        let fs_ops = LocalFs::default();
        let pattern = Pattern::new("?-[0-9]").unwrap();
        let found = fs_ops.matching_dirs(dir.path(), &pattern).expect("list");
        assert_eq!(found, vec!["a-1", "b-2", "c-3"]);
        let missing = fs_ops
            .matching_dirs(&dir.path().join("absent"), &pattern)
            .expect("missing dir");
        assert!(missing.is_empty());
    }

    #[test]
    fn write_then_move_and_list() {
        let dir = TempDir::new().expect("tempdir");
        let fs_ops = LocalFs::default();
        let file = dir.path().join("vm.xml");
        fs_ops.write_file(&file, "<domain/>").expect("write");
        fs_ops.write_file(&file, "<domain>2</domain>").expect("overwrite");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        assert_eq!(fs_ops.list_files(dir.path()).expect("list"), vec![file.clone()]);

        let moved = dir.path().join("sub").join("vm.xml");
        fs_ops.move_file(&file, &moved).expect("move");
        assert_eq!(fs::read_to_string(&moved).expect("read"), "<domain>2</domain>");
        assert!(fs_ops.list_files(dir.path()).expect("list").is_empty());
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("keep");
        fs::create_dir(&target).expect("mkdir");
        let fs_ops = LocalFs::new(RunMode { dry_run: true, verbose: false });
        fs_ops.remove_dir_all(&target).expect("dry-run delete");
        assert!(target.is_dir());
    }
}
