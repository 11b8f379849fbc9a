use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::schedule::window::ScheduleWindow;
use crate::types::{Backend, Method};

/// Raw config document: a reserved `global` section plus one section per VM.
///
/// Client sections stay untyped here so a malformed one can be dropped on its
/// own during validation instead of failing the whole document.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub global: GlobalSection,
    #[serde(flatten)]
    pub clients: BTreeMap<String, Option<serde_yaml::Value>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GlobalSection {
    #[serde(default)]
    pub backup_prg: Option<PathBuf>,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default)]
    pub snapsize: Option<Scalar>,
    #[serde(default)]
    pub shutdown_timeout: Option<u64>,
    #[serde(default)]
    pub compress: Option<bool>,
    #[serde(default)]
    pub logfile: Option<String>,
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub retention: Option<i64>,
    #[serde(default)]
    pub start_at: Option<Scalar>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClientSection {
    #[serde(default)]
    pub weekday: Option<Scalar>,
    #[serde(default)]
    pub dom: Option<Scalar>,
    #[serde(default)]
    pub time: Option<Scalar>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub retention: Option<i64>,
    #[serde(default)]
    pub api: Option<String>,
}

/// A YAML scalar that may have been written as a string or a number
/// (`time: 0930` loads as the integer 930).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Scalar {
    Number(i64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub backup_dir: PathBuf,
    pub backend: Backend,
    pub snapsize: String,
    pub compress: bool,
    pub shutdown_timeout: Duration,
    pub delay: Duration,
    pub logfile: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub name: String,
    pub priority: u8,
    pub method: Method,
    pub retention: usize,
    pub window: ScheduleWindow,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub global: GlobalConfig,
    pub clients: Vec<ClientSpec>,
}

impl GlobalConfig {
    /// Scratch area for one client: `<backup_dir>/<client>`.
    pub fn client_dir(&self, client: &str) -> PathBuf {
        self.backup_dir.join(client)
    }
}
