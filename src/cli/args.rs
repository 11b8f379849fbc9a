use std::path::PathBuf;

use clap::Parser;

pub const CONFIG_FILE: &str = "virt-backup.conf";

#[derive(Parser, Debug)]
#[command(
    name = "virt-backup",
    version,
    about = "Scheduled backups of libvirt guests",
    long_about = "Runs as a scheduler when no VM is named. Naming VMs backs up exactly those, once, ignoring their schedule."
)]
pub struct Cli {
    /// Config file path
    #[arg(short = 'c', long = "config", default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Log what would be pruned and backed up without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Print the configured clients in processing order and exit
    #[arg(long)]
    pub print_order: bool,

    /// VMs to back up now
    #[arg(value_name = "VM")]
    pub vms: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_daemon_mode() {
        let cli = Cli::try_parse_from(["virt-backup"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
        assert!(cli.vms.is_empty());
        assert!(!cli.dry_run);
    }

    #[test]
    fn positional_vms_and_config() {
        let cli = Cli::try_parse_from(["virt-backup", "-c", "/etc/vb.conf", "web01", "db01"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/vb.conf"));
        assert_eq!(cli.vms, vec!["web01", "db01"]);
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(Cli::try_parse_from(["virt-backup", "--bogus"]).is_err());
    }
}
