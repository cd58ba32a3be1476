//! Deployment config (`sdep.json`): loading, defaults and validation.
//!
//! The orchestrator only ever sees a [`Config`] that went through
//! [`Config::normalize`]: OS tags defaulted, paths expanded and resolved,
//! env maps present and every server holding a usable auth method.

use crate::error::{Error, Result};
use crate::utils::io;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub type EnvMap = BTreeMap<String, String>;

pub const DEFAULT_OS: &str = "linux";
pub const DEFAULT_CONFIG_FILE: &str = "sdep.json";

const STARTER_CONFIG: &str = include_str!("../../templates/sdep.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub app_name: String,

    /// Application source directory.
    #[serde(default)]
    pub app: PathBuf,

    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: EnvMap,

    /// Seconds the remote health check waits after a restart.
    #[serde(default = "default_deploy_check_wait_time")]
    pub deploy_check_wait_time: u64,

    #[serde(default = "default_true")]
    pub enable_upload_progress_bar: bool,

    #[serde(default = "default_true")]
    pub setup_node: bool,

    #[serde(default = "default_node_version")]
    pub node_version: String,

    #[serde(default)]
    pub setup_phantom: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem: Option<String>,

    #[serde(default = "default_os")]
    pub os: String,

    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: EnvMap,

    #[serde(default)]
    pub ssh_options: SshOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// ssh-agent socket, filled from `SSH_AUTH_SOCK` during normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfig {
    pub pem: String,

    #[serde(default = "default_backend_port")]
    pub backend_port: u16,
}

fn default_os() -> String {
    DEFAULT_OS.to_string()
}

fn default_true() -> bool {
    true
}

fn default_deploy_check_wait_time() -> u64 {
    10
}

fn default_node_version() -> String {
    "18".to_string()
}

fn default_backend_port() -> u16 {
    80
}

/// Env values may be written as JSON numbers or booleans (`"PORT": 80`).
fn deserialize_env<'de, D>(deserializer: D) -> std::result::Result<EnvMap, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Null => None,
            other => Some((key, other.to_string())),
        })
        .collect())
}

impl ServerConfig {
    pub fn port(&self) -> u16 {
        self.ssh_options.port.unwrap_or(22)
    }

    /// An agent only counts when its socket is actually there.
    pub fn has_usable_agent(&self) -> bool {
        self.ssh_options
            .agent
            .as_ref()
            .is_some_and(|sock| sock.exists())
    }

    fn has_auth(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
            || self.pem.as_deref().is_some_and(|p| !p.is_empty())
            || self.has_usable_agent()
    }
}

impl Config {
    /// Apply defaults and validate, the way `load` does after parsing.
    ///
    /// `config_dir` anchors a relative `app` path; `ssh_agent` is the
    /// caller's `SSH_AUTH_SOCK`, passed in rather than read here.
    pub fn normalize(mut self, config_dir: &Path, ssh_agent: Option<PathBuf>) -> Result<Self> {
        if self.servers.is_empty() {
            return Err(Error::config_missing_key("servers", None)
                .with_hint("Server information does not exist"));
        }

        if self.app_name.trim().is_empty() {
            return Err(Error::config_missing_key("appName", None));
        }

        if self.app.as_os_str().is_empty() {
            return Err(Error::config_missing_key("app", None)
                .with_hint("Path to app does not exist"));
        }

        let global_port = self
            .env
            .get("PORT")
            .cloned()
            .unwrap_or_else(|| "80".to_string());

        for (index, server) in self.servers.iter_mut().enumerate() {
            if let Some(sock) = &ssh_agent {
                server.ssh_options.agent = Some(sock.clone());
            }

            if server.host.trim().is_empty() {
                return Err(Error::config_missing_key(
                    format!("servers[{}].host", index),
                    None,
                ));
            }

            if server.username.trim().is_empty() {
                return Err(Error::config_missing_key(
                    format!("servers[{}].username", index),
                    None,
                ));
            }

            if !server.has_auth() {
                return Err(Error::config_auth_unresolved(&server.host, &server.username));
            }

            if server.os.trim().is_empty() {
                server.os = default_os();
            }

            if let Some(pem) = &server.pem {
                server.pem = Some(shellexpand::tilde(pem).to_string());
            }

            server
                .env
                .entry("CLUSTER_ENDPOINT_URL".to_string())
                .or_insert_with(|| format!("http://{}:{}", server.host, global_port));
        }

        let app = shellexpand::tilde(&self.app.to_string_lossy()).to_string();
        self.app = config_dir.join(app);

        if let Some(ssl) = &mut self.ssl {
            let pem = PathBuf::from(shellexpand::tilde(&ssl.pem).to_string());
            let pem = if pem.is_absolute() {
                pem
            } else {
                config_dir.join(pem)
            };
            if !pem.exists() {
                return Err(Error::config_invalid_value(
                    "ssl.pem",
                    Some(pem.to_string_lossy().to_string()),
                    "SSL pem file does not exist",
                ));
            }
            ssl.pem = pem.to_string_lossy().to_string();
        }

        Ok(self)
    }
}

fn require_json_path(path: &Path) -> Result<()> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(())
    } else {
        Err(Error::validation_invalid_argument(
            "config",
            "Please specify your JSON config file",
            Some(path.to_string_lossy().to_string()),
            None,
        ))
    }
}

/// Read, parse and normalize a config file.
pub fn load(path: &Path) -> Result<Config> {
    require_json_path(path)?;

    if !path.exists() {
        return Err(Error::config_file_not_found(path.to_string_lossy()));
    }

    let raw = io::read_file(path, "read config")?;
    let config: Config = serde_json::from_str(&raw)
        .map_err(|e| Error::config_invalid_json(path.to_string_lossy(), e))?;

    let config_dir = path
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let ssh_agent = std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from);

    let config = config.normalize(&config_dir, ssh_agent)?;
    log_status!(
        "config",
        "Loaded {} server(s) for '{}'",
        config.servers.len(),
        config.app_name
    );
    Ok(config)
}

/// Write the starter config. Refuses to overwrite an existing file.
pub fn init(path: &Path) -> Result<PathBuf> {
    require_json_path(path)?;

    if path.exists() {
        return Err(Error::config_already_exists(path.to_string_lossy()));
    }

    io::write_file(path, STARTER_CONFIG, "write starter config")?;
    Ok(path.to_path_buf())
}
