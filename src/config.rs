use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_scheme")]
    pub access_scheme: String,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default = "default_plans")]
    pub plans: BTreeMap<String, PlanLimits>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Container CLI to invoke.
    #[serde(default = "default_binary")]
    pub binary: String,
    pub docker_network: Option<String>,
    #[serde(default = "default_image")]
    pub default_image: String,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            docker_network: None,
            default_image: default_image(),
            container_port: default_container_port(),
            call_timeout_secs: default_call_timeout(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

impl RuntimeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortsConfig {
    #[serde(default = "default_port_range")]
    pub range: [u16; 2],
    #[serde(default = "default_reserved_ports")]
    pub reserved: Vec<u16>,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range: default_port_range(),
            reserved: default_reserved_ports(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct PlanLimits {
    pub memory_mb: u32,
    pub cpu_limit: f64,
}

impl PlatformConfig {
    pub fn plan(&self, name: &str) -> Option<&PlanLimits> {
        self.plans.get(name)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: default_db_path(),
            domain: default_domain(),
            access_scheme: default_scheme(),
            sync_interval_secs: default_sync_interval(),
            runtime: RuntimeConfig::default(),
            retry: RetryConfig::default(),
            ports: PortsConfig::default(),
            plans: default_plans(),
        }
    }
}

// Default functions
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/tenantd.db")
}
fn default_domain() -> String {
    "localhost".into()
}
fn default_scheme() -> String {
    "http".into()
}
fn default_sync_interval() -> u64 {
    60
}
fn default_binary() -> String {
    "docker".into()
}
fn default_image() -> String {
    "tenant-app:latest".into()
}
fn default_container_port() -> u16 {
    8000
}
fn default_call_timeout() -> u64 {
    60
}
fn default_stop_grace() -> u32 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff() -> u64 {
    200
}
fn default_max_backoff() -> u64 {
    2000
}
fn default_port_range() -> [u16; 2] {
    [8001, 8999]
}
fn default_reserved_ports() -> Vec<u16> {
    vec![8000, 9000]
}

fn default_plans() -> BTreeMap<String, PlanLimits> {
    BTreeMap::from([
        (
            "basic".to_string(),
            PlanLimits {
                memory_mb: 512,
                cpu_limit: 0.5,
            },
        ),
        (
            "pro".to_string(),
            PlanLimits {
                memory_mb: 1024,
                cpu_limit: 1.0,
            },
        ),
    ])
}

/// Load config from TOML file with env var overrides.
pub fn load(path: &str) -> anyhow::Result<PlatformConfig> {
    let content = if std::path::Path::new(path).exists() {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?
    } else {
        tracing::warn!("Config file not found at {}, using defaults", path);
        String::new()
    };

    let mut config: PlatformConfig =
        toml::from_str(&content).with_context(|| format!("parsing {}", path))?;
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

fn apply_env(
    config: &mut PlatformConfig,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = var("TENANTD_HOST") {
        config.host = v;
    }
    if let Some(v) = var("TENANTD_PORT") {
        config.port = v.parse().context("TENANTD_PORT")?;
    }
    if let Some(v) = var("TENANTD_DB_PATH") {
        config.database_path = PathBuf::from(v);
    }
    if let Some(v) = var("TENANTD_DOMAIN") {
        config.domain = v;
    }
    if let Some(v) = var("TENANTD_DOCKER_BINARY") {
        config.runtime.binary = v;
    }
    if let Some(v) = var("TENANTD_DOCKER_NETWORK") {
        config.runtime.docker_network = Some(v);
    }
    if let Some(v) = var("TENANTD_DEFAULT_IMAGE") {
        config.runtime.default_image = v;
    }
    if let Some(v) = var("TENANTD_CALL_TIMEOUT_SECS") {
        config.runtime.call_timeout_secs = v.parse().context("TENANTD_CALL_TIMEOUT_SECS")?;
    }
    Ok(())
}
