use crate::exec::Host;
use crate::sync::EngineSettings;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub fleet_config: PathBuf,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8088),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".into()),
            db_path: data_dir.join("fleetsync.db"),
            data_dir,
            fleet_config: PathBuf::from(
                std::env::var("FLEET_CONFIG").unwrap_or_else(|_| "fleet.toml".into()),
            ),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fleet config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid fleet config: {0}")]
    Invalid(String),
}

/// The fleet file: which hosts exist and how to sync them.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    #[serde(default = "default_max_concurrent_hosts")]
    pub max_concurrent_hosts: usize,

    pub servers: Vec<Host>,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub timeouts: TimeoutSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    #[serde(default)]
    pub roots: Vec<String>,

    #[serde(default)]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub allow_delete: bool,

    pub ssh_key_path: Option<PathBuf>,

    #[serde(default = "default_agent_path")]
    pub agent_path: String,

    #[serde(default = "default_rsync_path")]
    pub rsync_path: String,

    pub staging_dir: Option<PathBuf>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            excludes: Vec::new(),
            allow_delete: false,
            ssh_key_path: None,
            agent_path: default_agent_path(),
            rsync_path: default_rsync_path(),
            staging_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_manifest_secs")]
    pub manifest_secs: u64,
    #[serde(default = "default_resolve_secs")]
    pub resolve_secs: u64,
    #[serde(default = "default_transfer_secs")]
    pub transfer_secs: u64,
    #[serde(default = "default_status_secs")]
    pub status_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            manifest_secs: default_manifest_secs(),
            resolve_secs: default_resolve_secs(),
            transfer_secs: default_transfer_secs(),
            status_secs: default_status_secs(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}
fn default_max_concurrent_hosts() -> usize {
    4
}
fn default_agent_path() -> String {
    "fleetsync-agent".into()
}
fn default_rsync_path() -> String {
    "rsync".into()
}
fn default_manifest_secs() -> u64 {
    240
}
fn default_resolve_secs() -> u64 {
    60
}
fn default_transfer_secs() -> u64 {
    3600
}
fn default_status_secs() -> u64 {
    10
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid("at least one server is required".into()));
        }

        let mut names = HashSet::new();
        let mut hosts = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() || server.ssh_host.trim().is_empty() {
                return Err(ConfigError::Invalid("servers need a name and an ssh_host".into()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate server name {:?}", server.name)));
            }
            if !hosts.insert(server.ssh_host.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ssh_host {:?}",
                    server.ssh_host
                )));
            }
        }

        if self.poll_interval_seconds < 1 {
            return Err(ConfigError::Invalid("poll_interval_seconds must be >= 1".into()));
        }
        if self.max_concurrent_hosts < 1 {
            return Err(ConfigError::Invalid("max_concurrent_hosts must be >= 1".into()));
        }

        for root in &self.sync.roots {
            validate_root(root).map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn server(&self, name_or_host: &str) -> Option<&Host> {
        self.servers
            .iter()
            .find(|s| s.name == name_or_host || s.ssh_host == name_or_host)
    }

    /// Pick sides A and B for a sync.
    ///
    /// With both given they are looked up by name or ssh host. Otherwise a
    /// two-server fleet defaults to first as A and second as B.
    pub fn resolve_pair(
        &self,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<(Host, Host), String> {
        let (source, target) = match (source, target) {
            (Some(s), Some(t)) => {
                let a = self.server(s).ok_or_else(|| format!("unknown server: {s}"))?;
                let b = self.server(t).ok_or_else(|| format!("unknown server: {t}"))?;
                (a, b)
            }
            _ if self.servers.len() == 2 => (&self.servers[0], &self.servers[1]),
            _ if self.servers.len() > 2 => {
                return Err("source_server and target_server are required".into())
            }
            _ => return Err("two servers are required for sync".into()),
        };

        if source.name == target.name {
            return Err("source and target must be different servers".into());
        }
        Ok((source.clone(), target.clone()))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            agent_path: self.sync.agent_path.clone(),
            rsync_path: self.sync.rsync_path.clone(),
            ssh_key_path: self.sync.ssh_key_path.clone(),
            staging_dir: self.sync.staging_dir.clone(),
            manifest_timeout: Duration::from_secs(self.timeouts.manifest_secs),
            resolve_timeout: Duration::from_secs(self.timeouts.resolve_secs),
            transfer_timeout: Duration::from_secs(self.timeouts.transfer_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.status_secs)
    }
}

/// Roots must be absolute and free of `.`/`..` components.
pub fn validate_root(root: &str) -> Result<(), String> {
    if !root.starts_with('/') {
        return Err(format!("root {root:?} must be an absolute path"));
    }
    if root.split('/').any(|part| part == "." || part == "..") {
        return Err(format!("root {root:?} must not contain . or .."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLEET: &str = r#"
poll_interval_seconds = 15

[[servers]]
name = "alpha"
ssh_host = "root@10.0.0.1"

[[servers]]
name = "beta"
ssh_host = "deploy@10.0.0.2"
ssh_port = 2222

[sync]
roots = ["/srv/app", "/etc/app"]
excludes = ["**/.env"]
ssh_key_path = "/keys/fleet"

[timeouts]
transfer_secs = 600
"#;

    #[test]
    fn parses_with_defaults() {
        let config = FleetConfig::parse(FLEET).unwrap();
        assert_eq!(config.poll_interval_seconds, 15);
        assert_eq!(config.max_concurrent_hosts, 4);
        assert_eq!(config.servers[0].ssh_port, 22);
        assert_eq!(config.servers[1].ssh_port, 2222);
        assert_eq!(config.sync.agent_path, "fleetsync-agent");
        assert!(!config.sync.allow_delete);

        let settings = config.engine_settings();
        assert_eq!(settings.transfer_timeout, Duration::from_secs(600));
        assert_eq!(settings.manifest_timeout, Duration::from_secs(240));
        assert_eq!(settings.ssh_key_path.as_deref(), Some(Path::new("/keys/fleet")));
    }

    #[test]
    fn rejects_empty_and_duplicate_servers() {
        assert!(FleetConfig::parse("servers = []").is_err());

        let dup_name = r#"
[[servers]]
name = "a"
ssh_host = "root@1"
[[servers]]
name = "a"
ssh_host = "root@2"
"#;
        assert!(FleetConfig::parse(dup_name).is_err());

        let dup_host = r#"
[[servers]]
name = "a"
ssh_host = "root@1"
[[servers]]
name = "b"
ssh_host = "root@1"
"#;
        assert!(FleetConfig::parse(dup_host).is_err());
    }

    #[test]
    fn rejects_bad_poll_interval_and_roots() {
        let zero_poll = "poll_interval_seconds = 0\n[[servers]]\nname = \"a\"\nssh_host = \"root@1\"\n";
        assert!(FleetConfig::parse(zero_poll).is_err());

        let relative = "[[servers]]\nname = \"a\"\nssh_host = \"root@1\"\n[sync]\nroots = [\"srv\"]\n";
        assert!(FleetConfig::parse(relative).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = FleetConfig::load(Path::new("/nonexistent/fleet.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn pair_defaults_for_two_servers() {
        let config = FleetConfig::parse(FLEET).unwrap();
        let (a, b) = config.resolve_pair(None, None).unwrap();
        assert_eq!((a.name.as_str(), b.name.as_str()), ("alpha", "beta"));

        let (a, b) = config.resolve_pair(Some("beta"), Some("root@10.0.0.1")).unwrap();
        assert_eq!((a.name.as_str(), b.name.as_str()), ("beta", "alpha"));

        assert!(config.resolve_pair(Some("alpha"), Some("alpha")).is_err());
        assert!(config.resolve_pair(Some("alpha"), Some("gamma")).is_err());
    }

    #[test]
    fn pair_with_three_servers() {
        let raw = r#"
[[servers]]
name = "a"
ssh_host = "root@1"
[[servers]]
name = "b"
ssh_host = "root@2"
[[servers]]
name = "c"
ssh_host = "root@3"
"#;
        let config = FleetConfig::parse(raw).unwrap();
        assert!(config.resolve_pair(None, None).is_err());
        assert!(config.resolve_pair(Some("a"), None).is_err());
        let (a, b) = config.resolve_pair(Some("c"), Some("a")).unwrap();
        assert_eq!((a.name.as_str(), b.name.as_str()), ("c", "a"));
    }
}
