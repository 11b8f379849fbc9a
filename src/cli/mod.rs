use std::env;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;

use crate::cli::args::Cli;
use crate::cli::commands::{backup, exit_for_error};
use crate::types::RunMode;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod args;
pub mod commands;

pub fn run() -> Result<()> {
    let cli = parse_cli();
    let run_mode = RunMode {
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    };

    if let Err(err) = backup::run_backup_command(&cli.config, &cli.vms, cli.print_order, run_mode) {
        exit_for_error(&err);
    }
    Ok(())
}

fn parse_cli() -> Cli {
    match Cli::try_parse_from(env::args()) {
        Ok(cli) => cli,
        Err(err) => {
            if err.kind() == ErrorKind::DisplayHelp {
                let _ = err.print();
                std::process::exit(0);
            }
            if err.kind() == ErrorKind::DisplayVersion {
                println!("virt-backup {}", VERSION);
                std::process::exit(0);
            }
            if err.kind() == ErrorKind::UnknownArgument {
                if let Some(arg) = err.context().find_map(|c| {
                    if let clap::error::ContextKind::InvalidArg = c.0 {
                        Some(c.1.to_string())
                    } else {
                        None
                    }
                }) {
                    eprintln!("unknown option {}", arg);
                    std::process::exit(2);
                }
            }
            eprintln!("{}", err);
            std::process::exit(2);
        }
    }
}
