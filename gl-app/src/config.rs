//! Greenlight configuration loader.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Ceiling for configured durations, one year in seconds. chrono durations
/// are built from these values and must stay well inside `i64` milliseconds.
pub(crate) const MAX_DURATION_SECS: u64 = 31_536_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GreenlightConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8790
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalsConfig {
    /// Seconds a proposal may wait for review before it expires.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Seconds resolved operations stay visible in session listings.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Buffered events per connected observer.
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_observer_buffer() -> usize {
    64
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_secs: default_retention_secs(),
            observer_buffer: default_observer_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory all file operations are confined to.
    #[serde(default = "default_workspace_root")]
    pub root_dir: String,
    #[serde(default = "default_file_bytes_max")]
    pub file_bytes_max: usize,
}

fn default_workspace_root() -> String {
    "~/.greenlight/workspace".to_string()
}

fn default_file_bytes_max() -> usize {
    1_000_000
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_workspace_root(),
            file_bytes_max: default_file_bytes_max(),
        }
    }
}

impl GreenlightConfig {
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(config_path = %path.display(), "config file absent; using defaults");
                GreenlightConfig::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!("read config {}: {e}", path.display()));
            }
        };

        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = std::env::var("GREENLIGHT_HOST") {
            if !v.trim().is_empty() {
                self.server.host = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("GREENLIGHT_PORT") {
            if let Some(port) = parse_override("GREENLIGHT_PORT", &v, "a port number")? {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("GREENLIGHT_WORKSPACE_ROOT") {
            if !v.trim().is_empty() {
                self.workspace.root_dir = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("GREENLIGHT_APPROVAL_TIMEOUT_SECS") {
            if let Some(secs) = parse_override("GREENLIGHT_APPROVAL_TIMEOUT_SECS", &v, "an integer")? {
                self.approvals.timeout_secs = secs;
            }
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        for (key, value) in [
            ("approvals.timeout_secs", self.approvals.timeout_secs),
            (
                "approvals.sweep_interval_secs",
                self.approvals.sweep_interval_secs,
            ),
            ("approvals.retention_secs", self.approvals.retention_secs),
        ] {
            if value == 0 || value > MAX_DURATION_SECS {
                return Err(anyhow::anyhow!(
                    "{key} must be between 1 and {MAX_DURATION_SECS}"
                ));
            }
        }
        if self.approvals.observer_buffer == 0 {
            return Err(anyhow::anyhow!("approvals.observer_buffer must be > 0"));
        }
        if self.workspace.root_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("workspace.root_dir is required"));
        }
        if self.workspace.file_bytes_max == 0 {
            return Err(anyhow::anyhow!("workspace.file_bytes_max must be > 0"));
        }
        Ok(())
    }

    pub fn store_config(&self) -> gl_core::StoreConfig {
        gl_core::StoreConfig {
            approval_timeout: chrono::Duration::seconds(self.approvals.timeout_secs as i64),
            retention: chrono::Duration::seconds(self.approvals.retention_secs as i64),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.host/server.port: {e}"))
    }

    pub fn workspace_root_path(&self) -> anyhow::Result<PathBuf> {
        expand_home(&self.workspace.root_dir)
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".greenlight").join("greenlight.toml")
}

/// Parses one environment-variable override. Blank values mean "keep the
/// configured default"; anything else must parse or the whole load fails.
pub(crate) fn parse_override<T: std::str::FromStr>(
    name: &str,
    raw: &str,
    expected: &str,
) -> anyhow::Result<Option<T>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| anyhow::anyhow!("{name} must be {expected}, got {raw:?}"))
}

pub(crate) fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim().to_string();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen("~", &home, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: GreenlightConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8790);
        assert_eq!(cfg.approvals.timeout_secs, 1800);
        assert_eq!(cfg.approvals.sweep_interval_secs, 30);
        assert_eq!(cfg.approvals.retention_secs, 3600);
        assert_eq!(cfg.approvals.observer_buffer, 64);
        assert_eq!(cfg.workspace.root_dir, "~/.greenlight/workspace");
        assert_eq!(cfg.workspace.file_bytes_max, 1_000_000);
        cfg.validate().expect("defaults validate");
    }

    #[test]
    fn partial_config_overrides_only_named_keys() {
        let cfg: GreenlightConfig = toml::from_str(
            r#"
[server]
port = 9000

[approvals]
timeout_secs = 60
"#,
        )
        .expect("partial config parses");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.approvals.timeout_secs, 60);
        assert_eq!(cfg.approvals.retention_secs, 3600);
    }

    #[test]
    fn validate_rejects_out_of_range_durations() {
        let mut cfg = GreenlightConfig::default();
        cfg.approvals.timeout_secs = 0;
        let err = cfg.validate().expect_err("zero timeout must fail");
        assert!(err.to_string().contains("approvals.timeout_secs"));

        let mut cfg = GreenlightConfig::default();
        cfg.approvals.retention_secs = MAX_DURATION_SECS + 1;
        let err = cfg.validate().expect_err("oversized retention must fail");
        assert!(err.to_string().contains("approvals.retention_secs"));
    }

    #[test]
    fn validate_rejects_blank_workspace_root() {
        let mut cfg = GreenlightConfig::default();
        cfg.workspace.root_dir = "  ".to_string();
        let err = cfg.validate().expect_err("blank root must fail");
        assert!(err.to_string().contains("workspace.root_dir"));
    }

    #[test]
    fn store_config_maps_configured_seconds() {
        let mut cfg = GreenlightConfig::default();
        cfg.approvals.timeout_secs = 90;
        cfg.approvals.retention_secs = 600;
        let store_cfg = cfg.store_config();
        assert_eq!(store_cfg.approval_timeout, chrono::Duration::seconds(90));
        assert_eq!(store_cfg.retention, chrono::Duration::seconds(600));
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let cfg = GreenlightConfig::default();
        let addr = cfg.bind_addr().expect("default addr parses");
        assert_eq!(addr.to_string(), "127.0.0.1:8790");
    }

    #[test]
    fn parse_override_rejects_bad_values_with_context() {
        let err = parse_override::<u16>("GREENLIGHT_PORT", "not-a-port", "a port number")
            .expect_err("non-numeric port must fail");
        assert_eq!(
            err.to_string(),
            "GREENLIGHT_PORT must be a port number, got \"not-a-port\""
        );

        let err = parse_override::<u64>("GREENLIGHT_APPROVAL_TIMEOUT_SECS", "30s", "an integer")
            .expect_err("suffixed integer must fail");
        assert!(err.to_string().contains("GREENLIGHT_APPROVAL_TIMEOUT_SECS"));
    }

    #[test]
    fn parse_override_accepts_values_and_skips_blanks() {
        assert_eq!(
            parse_override::<u16>("GREENLIGHT_PORT", " 9000 ", "a port number")
                .expect("trimmed value parses"),
            Some(9000)
        );
        assert_eq!(
            parse_override::<u16>("GREENLIGHT_PORT", "  ", "a port number")
                .expect("blank value is ignored"),
            None
        );
    }

    #[test]
    fn expand_home_replaces_tilde_prefix() {
        assert_eq!(
            expand_home("relative/dir").expect("plain path passes through"),
            PathBuf::from("relative/dir")
        );
        let home = std::env::var("HOME").expect("HOME set in test environment");
        assert_eq!(
            expand_home("~/workspace").expect("tilde path expands"),
            Path::new(&home).join("workspace")
        );
    }
}
