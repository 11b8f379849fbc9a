use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::config::model::{ClientSection, ClientSpec, Config, GlobalConfig, GlobalSection, RuntimeConfig};
use crate::error::{ConfigError, Result};
use crate::logging::validate_log_template;
use crate::schedule::window::{parse_days_of_month, parse_time_of_day, parse_weekdays, ScheduleWindow};
use crate::types::{Backend, BackendKind, Method};
use crate::util::paths::is_safe_name;

const DEFAULT_DELAY_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 90;
const DEFAULT_SNAPSIZE: &str = "100G";
const DEFAULT_PRIORITY: i64 = 99;

/// Reads and parses the config document without validating it.
pub fn read_config(path: &Path) -> Result<Config> {
    let mut contents = String::new();
    File::open(path)
        .and_then(|mut file| file.read_to_string(&mut contents))
        .map_err(|e| ConfigError::Invalid(format!("read config {}: {}", path.display(), e)))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let cfg: Config =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    resolve(read_config(path)?)
}

/// Validates the raw document. Global problems are fatal; a client with an
/// invalid setting is logged and left out.
pub fn resolve(cfg: Config) -> Result<RuntimeConfig> {
    let global = resolve_global(&cfg.global)?;
    let mut clients = Vec::new();

    for (name, section) in cfg.clients {
        let section = match section.map(serde_yaml::from_value::<ClientSection>) {
            Some(Ok(section)) => section,
            Some(Err(err)) => {
                warn!("dropping client {}: {}", name, err);
                continue;
            }
            None => ClientSection::default(),
        };
        match resolve_client(&name, &section, &cfg.global, &global) {
            Ok(spec) => clients.push(spec),
            Err(reason) => warn!("dropping client {}: {}", name, reason),
        }
    }

    Ok(RuntimeConfig { global, clients })
}

fn resolve_global(section: &GlobalSection) -> Result<GlobalConfig> {
    let backup_dir = section
        .backup_dir
        .clone()
        .ok_or(ConfigError::Missing("backup_dir"))?;
    if backup_dir.as_os_str().is_empty() {
        return Err(ConfigError::Missing("backup_dir").into());
    }

    let kind = match &section.api {
        Some(api) => BackendKind::parse(api).map_err(ConfigError::Invalid)?,
        None => BackendKind::Program,
    };
    let backend = match kind {
        BackendKind::Libvirt => Backend::Libvirt,
        BackendKind::Program => {
            let path = section
                .backup_prg
                .clone()
                .ok_or(ConfigError::Missing("backup_prg"))?;
            Backend::Program { path }
        }
    };

    if let Some(method) = &section.method {
        Method::parse(method).map_err(|e| ConfigError::Invalid(format!("global: {}", e)))?;
    }
    if let Some(template) = &section.logfile {
        validate_log_template(template)
            .map_err(|e| ConfigError::Invalid(format!("global: logfile: {}", e)))?;
    }

    Ok(GlobalConfig {
        backup_dir,
        backend,
        snapsize: section
            .snapsize
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| DEFAULT_SNAPSIZE.to_string()),
        compress: section.compress.unwrap_or(false),
        shutdown_timeout: Duration::from_secs(
            section.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        ),
        delay: Duration::from_secs(section.delay.unwrap_or(DEFAULT_DELAY_SECS)),
        logfile: section.logfile.clone(),
    })
}

fn resolve_client(
    name: &str,
    section: &ClientSection,
    defaults: &GlobalSection,
    global: &GlobalConfig,
) -> std::result::Result<ClientSpec, String> {
    if !is_safe_name(name) {
        return Err("name must use only letters, digits, '.', '-', '_'".to_string());
    }

    if let Some(api) = &section.api {
        let kind = BackendKind::parse(api)?;
        if kind != global.backend.kind() {
            return Err(format!(
                "api {} differs from the process-wide api {}",
                kind.as_str(),
                global.backend.kind().as_str()
            ));
        }
    }

    let method = match section.method.as_ref().or(defaults.method.as_ref()) {
        Some(value) => Method::parse(value)?,
        None => return Err("no method configured".to_string()),
    };

    let retention = match section.retention.or(defaults.retention) {
        Some(n) if n >= 1 => n as usize,
        Some(n) => return Err(format!("retention {} must be at least 1", n)),
        None => return Err("no retention configured".to_string()),
    };

    let time = match section.time.as_ref().or(defaults.start_at.as_ref()) {
        Some(value) => parse_time_of_day(value)?,
        None => return Err("no time or global start_at configured".to_string()),
    };
    let mut window = ScheduleWindow::daily(time);
    if let Some(weekday) = &section.weekday {
        window.weekdays = Some(parse_weekdays(&weekday.to_string())?);
    }
    if let Some(dom) = &section.dom {
        window.days_of_month = Some(parse_days_of_month(dom)?);
    }

    Ok(ClientSpec {
        name: name.to_string(),
        priority: clamp_priority(section.priority.unwrap_or(DEFAULT_PRIORITY)),
        method,
        retention,
        window,
    })
}

pub fn clamp_priority(value: i64) -> u8 {
    value.clamp(1, 99) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::error::VirtBackupError;
    use tempfile::NamedTempFile;

    const BASE: &str = r#"
global:
  backup_prg: /usr/local/bin/virt-backup.pl
  backup_dir: /srv/backup
  method: suspend
  retention: 3
  start_at: 2300
"#;

    fn load(extra: &str) -> Result<RuntimeConfig> {
        resolve(parse_config(&format!("{}{}", BASE, extra))?)
    }

    #[test]
    fn load_config_from_file() {
        let mut file = NamedTempFile::new().expect("tempfile");
        let yaml = format!(
            "{}{}",
            BASE,
            r#"
web01:
  weekday: mon,wed
  priority: 10
db01:
  method: shutdown
  retention: 7
  time: "01:30"
  dom: 1,15
"#
        );
        file.write_all(yaml.as_bytes()).expect("write");
        let cfg = load_config(file.path()).expect("load");
        assert_eq!(cfg.clients.len(), 2);
        assert_eq!(cfg.global.delay, Duration::from_secs(30));
        assert_eq!(cfg.global.shutdown_timeout, Duration::from_secs(90));
        assert_eq!(cfg.global.snapsize, "100G");
        assert!(!cfg.global.compress);

        let db = cfg.clients.iter().find(|c| c.name == "db01").unwrap();
        assert_eq!(db.method, Method::Shutdown);
        assert_eq!(db.retention, 7);
        assert_eq!(db.priority, 99);
        assert_eq!(db.window.days_of_month, Some(vec![1, 15]));
        assert_eq!(db.window.time, chrono::NaiveTime::from_hms_opt(1, 30, 0).unwrap());

        let web = cfg.clients.iter().find(|c| c.name == "web01").unwrap();
        assert_eq!(web.method, Method::Suspend);
        assert_eq!(web.retention, 3);
        assert_eq!(web.priority, 10);
    }

    #[test]
    fn priority_is_clamped() {
        for (input, expected) in [(-5, 1), (0, 1), (1, 1), (50, 50), (99, 99), (100, 99), (1000, 99)] {
            assert_eq!(clamp_priority(input), expected);
        }
        let cfg = load("vm1:\n  priority: 500\nvm2:\n  priority: 0\n").expect("load");
        assert!(cfg.clients.iter().all(|c| (1..=99).contains(&c.priority)));
    }

    #[test]
    fn invalid_client_is_dropped_not_fatal() {
        let cfg = load(
            r#"
good:
bad-method:
  method: hibernate
bad-day:
  weekday: someday
bad-retention:
  retention: 0
"#,
        )
        .expect("load");
        let names: Vec<_> = cfg.clients.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn mistyped_client_value_drops_only_that_client() {
        let cfg = load(
            r#"
good:
bool-method:
  method: true
word-retention:
  retention: "three"
list-priority:
  priority: [1, 2]
scalar-section: 5
"#,
        )
        .expect("load");
        let names: Vec<_> = cfg.clients.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn client_api_must_match_process_backend() {
        let cfg = load("same:\n  api: program\nother:\n  api: libvirt\nbogus:\n  api: xen\n")
            .expect("load");
        let names: Vec<_> = cfg.clients.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["same"]);
    }

    #[test]
    fn missing_required_globals_are_fatal() {
        let err = resolve(parse_config("global:\n  backup_prg: /bin/true\n").unwrap()).unwrap_err();
        assert!(matches!(err, VirtBackupError::Config(ConfigError::Missing("backup_dir"))));

        let err = resolve(parse_config("global:\n  backup_dir: /srv\n").unwrap()).unwrap_err();
        assert!(matches!(err, VirtBackupError::Config(ConfigError::Missing("backup_prg"))));

        let cfg = resolve(
            parse_config("global:\n  backup_dir: /srv\n  api: libvirt\n").unwrap(),
        )
        .expect("libvirt does not need backup_prg");
        assert_eq!(cfg.global.backend, Backend::Libvirt);

        assert!(parse_config("vm1:\n  priority: 1\n").is_err());
    }
}
