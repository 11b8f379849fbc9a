use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Rejects templates chrono cannot render.
pub fn validate_log_template(template: &str) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("path is empty".to_string());
    }
    if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid time format in {}", template));
    }
    Ok(())
}

/// Appends events to a file whose path is a strftime template, re-rendered
/// for every event so `/var/log/virt-backup-%Y%m.log` rotates monthly.
#[derive(Debug, Clone)]
pub struct LogSink {
    template: String,
}

impl LogSink {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn current_path(&self) -> PathBuf {
        PathBuf::from(Local::now().format(&self.template).to_string())
    }

    fn open(&self) -> io::Result<File> {
        let path = self.current_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(path)
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = Box<dyn Write>;

    fn make_writer(&'a self) -> Self::Writer {
        match self.open() {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::stderr()),
        }
    }
}

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%a %b %e %H:%M:%S %Y:"))
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the level.
pub fn init_tracing(logfile: Option<&str>, verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTimer)
        .with_target(false);
    match logfile {
        Some(template) => {
            let _ = builder
                .with_ansi(false)
                .with_writer(LogSink::new(template))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(io::stderr).try_init();
        }
    }
}
