use std::process::Command;

use tracing::debug;

use crate::error::{HypervisorError, Result, VirtBackupError};

pub fn command_line(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect();
    format!("{} {}", program, args.join(" "))
}

/// Runs a command with inherited stdio and returns its exit code.
pub fn run_command(cmd: &mut Command) -> Result<i32> {
    debug!("{}", command_line(cmd));
    let status = cmd.status().map_err(|e| {
        VirtBackupError::message(format!("{}: {}", cmd.get_program().to_string_lossy(), e))
    })?;
    Ok(status.code().unwrap_or(1))
}

/// Runs a command, failing on a non-zero exit, and returns its stdout.
pub fn capture(cmd: &mut Command) -> Result<String> {
    let line = command_line(cmd);
    debug!("{}", line);
    let output = cmd
        .output()
        .map_err(|e| HypervisorError::Spawn(line.clone(), e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(
            HypervisorError::Command(line, output.status.code().unwrap_or(1), stderr).into(),
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Low-priority wrapper for bulk copies so they do not starve running guests.
pub fn nice_ionice(args: &[String]) -> Command {
    let mut cmd = Command::new("nice");
    cmd.arg("-n")
        .arg("19")
        .arg("ionice")
        .arg("-c")
        .arg("3")
        .arg("-n7");
    for arg in args {
        cmd.arg(arg);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_returns_stdout() {
        let mut cmd = Command::new("echo");
        cmd.arg("running");
        assert_eq!(capture(&mut cmd).unwrap().trim(), "running");
    }

    #[test]
    fn capture_reports_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo nope >&2; exit 3");
        match capture(&mut cmd) {
            Err(VirtBackupError::Hypervisor(HypervisorError::Command(_, code, stderr))) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nice_ionice_wraps_arguments() {
        let cmd = nice_ionice(&["cp".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(command_line(&cmd), "nice -n 19 ionice -c 3 -n7 cp a b");
    }
}
