use crate::models::ScheduleConfig;
use crate::scheduler::MAX_INTERVAL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_PATH_VAR: &str = "NETWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "netwatch.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Adresse d'écoute de l'API
    pub http: HttpConf,
    /// Intervalles initiaux des jobs
    pub schedule: ScheduleConfig,
    /// Commande ping et limites
    pub probe: ProbeConf,
    /// Commande speed test et identité réseau
    pub bandwidth: BandwidthConf,
    /// Fichier JSON et rétention
    pub storage: StorageConf,
    /// Hôtes enregistrés au démarrage s'ils ne sont pas déjà dans le store
    pub hosts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProbeConf {
    pub timeout_ms: u64,
    pub command: Option<String>, // ex: "ping -c 1 -W 2 {host}"
    /// Sondes simultanées au maximum pendant un tick
    pub max_concurrency: usize,
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            command: None,
            max_concurrency: 16,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BandwidthConf {
    pub command: Option<String>, // ex: "speedtest-cli --json"
    pub timeout_secs: u64,
    /// false = ssid toujours "N/A"
    pub identity_lookup: bool,
}

impl Default for BandwidthConf {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 120,
            identity_lookup: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConf {
    pub path: PathBuf,
    /// 0 = tout garder
    pub max_results_per_host: usize,
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/netwatch.json"),
            max_results_per_host: 1_000,
        }
    }
}

impl MonitorConfig {
    /// Parse un document YAML. Document vide = valeurs par défaut.
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Applique `NETWATCH_BIND`, `NETWATCH_PROBE_INTERVAL` et `NETWATCH_DATA`
    /// lus via `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("NETWATCH_BIND") {
            self.http.bind = bind;
        }
        if let Some(raw) = lookup("NETWATCH_PROBE_INTERVAL") {
            self.schedule.probe_interval_secs = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("NETWATCH_PROBE_INTERVAL is not a number of seconds: {raw:?}"))
            })?;
        }
        if let Some(path) = lookup("NETWATCH_DATA") {
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = MAX_INTERVAL.as_secs();
        for (name, secs) in [
            ("schedule.probe_interval_secs", self.schedule.probe_interval_secs),
            ("schedule.sample_interval_secs", self.schedule.sample_interval_secs),
        ] {
            if secs == 0 || secs > max {
                return Err(ConfigError::Invalid(format!("{name} must be between 1 and {max}")));
            }
        }
        if self.probe.timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe.timeout_ms must be > 0".into()));
        }
        if self.probe.max_concurrency == 0 {
            return Err(ConfigError::Invalid("probe.max_concurrency must be > 0".into()));
        }
        if self.bandwidth.timeout_secs == 0 {
            return Err(ConfigError::Invalid("bandwidth.timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Lit le fichier `path` ; fichier absent = valeurs par défaut
pub async fn load_config_from(path: &Path) -> Result<MonitorConfig, ConfigError> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(MonitorConfig::default());
    }
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    MonitorConfig::from_yaml(&txt)
}

/// Fichier désigné par `NETWATCH_CONFIG`, puis surcharges d'environnement, puis validation
pub async fn load_config() -> Result<MonitorConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = load_config_from(Path::new(&path)).await?;
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    info!(
        path = %path,
        bind = %cfg.http.bind,
        probe_interval_secs = cfg.schedule.probe_interval_secs,
        sample_interval_secs = cfg.schedule.sample_interval_secs,
        "configuration loaded"
    );
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_document_is_default() {
        let cfg = MonitorConfig::from_yaml("  \n").unwrap();
        assert_eq!(cfg, MonitorConfig::default());
        assert_eq!(cfg.http.bind, "0.0.0.0:5000");
        assert_eq!(cfg.probe.max_concurrency, 16);
        assert_eq!(cfg.storage.max_results_per_host, 1_000);
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg = MonitorConfig::from_yaml(
            "schedule:\n  probe_interval_secs: 15\nprobe:\n  command: \"fping -c1 {host}\"\nhosts:\n  - 8.8.8.8\n  - router.lan\n",
        )
        .unwrap();
        assert_eq!(cfg.schedule.probe_interval_secs, 15);
        assert_eq!(cfg.schedule.sample_interval_secs, 180);
        assert_eq!(cfg.probe.command.as_deref(), Some("fping -c1 {host}"));
        assert_eq!(cfg.probe.timeout_ms, 3_000);
        assert_eq!(cfg.hosts, vec!["8.8.8.8".to_string(), "router.lan".to_string()]);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(
            MonitorConfig::from_yaml("schedule: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides_win_over_file() {
        let env: HashMap<&str, &str> = [
            ("NETWATCH_BIND", "127.0.0.1:8080"),
            ("NETWATCH_PROBE_INTERVAL", " 5 "),
            ("NETWATCH_DATA", "/tmp/nw.json"),
        ]
        .into_iter()
        .collect();

        let mut cfg = MonitorConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.http.bind, "127.0.0.1:8080");
        assert_eq!(cfg.schedule.probe_interval_secs, 5);
        assert_eq!(cfg.storage.path, PathBuf::from("/tmp/nw.json"));
    }

    #[test]
    fn bad_interval_override_is_rejected() {
        let mut cfg = MonitorConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == "NETWATCH_PROBE_INTERVAL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_rejects_zero_values() {
        assert!(MonitorConfig::default().validate().is_ok());

        let mut cfg = MonitorConfig::default();
        cfg.schedule.probe_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.schedule.sample_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.probe.timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.probe.max_concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_intervals_beyond_one_year() {
        let mut cfg = MonitorConfig::default();
        cfg.schedule.probe_interval_secs = u64::MAX;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = MonitorConfig::default();
        cfg.schedule.sample_interval_secs = MAX_INTERVAL.as_secs() + 1;
        assert!(cfg.validate().is_err());

        cfg.schedule.sample_interval_secs = MAX_INTERVAL.as_secs();
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(cfg, MonitorConfig::default());
    }

    #[tokio::test]
    async fn file_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netwatch.yaml");
        std::fs::write(&path, "http:\n  bind: 127.0.0.1:9000\nbandwidth:\n  identity_lookup: false\n").unwrap();

        let cfg = load_config_from(&path).await.unwrap();
        assert_eq!(cfg.http.bind, "127.0.0.1:9000");
        assert!(!cfg.bandwidth.identity_lookup);
        assert_eq!(cfg.bandwidth.timeout_secs, 120);
    }
}
