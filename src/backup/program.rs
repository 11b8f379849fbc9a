use std::path::Path;
use std::process::Command;

use crate::config::model::{ClientSpec, GlobalConfig};
use crate::error::Result;
use crate::types::Method;
use crate::util::command::run_command;

/// Arguments for one run of the external backup program.
pub fn program_args(global: &GlobalConfig, client: &ClientSpec) -> Vec<String> {
    let mut args = vec![
        "--action=convert".to_string(),
        format!("--snapsize={}", global.snapsize),
        "--debug".to_string(),
    ];
    if global.compress {
        args.push("--compress".to_string());
    }
    args.push(format!("--backupdir={}", global.backup_dir.display()));
    args.push(format!("--vm={}", client.name));
    if client.method == Method::Shutdown {
        args.push("--shutdown".to_string());
        args.push(format!(
            "--shutdown-timeout={}",
            global.shutdown_timeout.as_secs()
        ));
    }
    args
}

pub fn run_backup_program(program: &Path, global: &GlobalConfig, client: &ClientSpec) -> Result<i32> {
    let mut cmd = Command::new(program);
    cmd.args(program_args(global, client));
    run_command(&mut cmd)
}
