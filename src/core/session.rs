//! Runtime binding of one roster entry to the credentials used to reach it.

use crate::config::{EnvMap, ServerConfig};
use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// The one auth method a session uses, resolved at startup.
#[derive(Clone)]
pub enum Auth {
    /// Private key contents, read eagerly from the configured pem path.
    Pem(String),
    Password(String),
    /// Defer to the ssh-agent listening on this socket.
    Agent(PathBuf),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Pem(_) => f.write_str("Auth::Pem(<redacted>)"),
            Auth::Password(_) => f.write_str("Auth::Password(<redacted>)"),
            Auth::Agent(sock) => write!(f, "Auth::Agent({})", sock.display()),
        }
    }
}

impl Auth {
    pub fn kind(&self) -> &'static str {
        match self {
            Auth::Pem(_) => "pem",
            Auth::Password(_) => "password",
            Auth::Agent(_) => "agent",
        }
    }
}

/// Pem first, then password, then agent.
///
/// A relative pem path resolves against `cwd`.
pub fn resolve_auth(server: &ServerConfig, cwd: &Path) -> Result<Auth> {
    if let Some(pem) = server.pem.as_deref().filter(|p| !p.is_empty()) {
        let path = PathBuf::from(pem);
        let path = if path.is_absolute() {
            path
        } else {
            cwd.join(path)
        };

        return std::fs::read_to_string(&path)
            .map(Auth::Pem)
            .map_err(|_| {
                Error::ssh_identity_file_not_found(&server.host, path.to_string_lossy())
            });
    }

    if let Some(password) = server.password.as_deref().filter(|p| !p.is_empty()) {
        return Ok(Auth::Password(password.to_string()));
    }

    if server.has_usable_agent() {
        if let Some(sock) = &server.ssh_options.agent {
            return Ok(Auth::Agent(sock.clone()));
        }
    }

    Err(Error::config_auth_unresolved(&server.host, &server.username))
}

#[derive(Debug, Clone)]
pub struct Session {
    roster_index: usize,
    server: ServerConfig,
    auth: Auth,
}

impl Session {
    pub fn new(roster_index: usize, server: ServerConfig, auth: Auth) -> Self {
        Self {
            roster_index,
            server,
            auth,
        }
    }

    pub fn from_server(roster_index: usize, server: &ServerConfig, cwd: &Path) -> Result<Self> {
        let auth = resolve_auth(server, cwd)?;
        Ok(Self::new(roster_index, server.clone(), auth))
    }

    /// Position of the originating entry in the config's server list.
    pub fn roster_index(&self) -> usize {
        self.roster_index
    }

    pub fn host(&self) -> &str {
        &self.server.host
    }

    pub fn username(&self) -> &str {
        &self.server.username
    }

    pub fn os(&self) -> &str {
        &self.server.os
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn env(&self) -> &EnvMap {
        &self.server.env
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Prefix used when relaying remote output: `[host] `.
    pub fn output_prefix(&self) -> String {
        format!("[{}] ", self.server.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshOptions;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    fn server() -> ServerConfig {
        ServerConfig {
            host: "10.0.0.5".to_string(),
            username: "deploy".to_string(),
            password: None,
            pem: None,
            os: "linux".to_string(),
            env: EnvMap::new(),
            ssh_options: SshOptions::default(),
        }
    }

    #[test]
    fn pem_is_read_eagerly_and_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("id_rsa"), "KEY MATERIAL").unwrap();

        let mut server = server();
        server.pem = Some("id_rsa".to_string());
        server.password = Some("pw".to_string());

        match resolve_auth(&server, dir.path()).unwrap() {
            Auth::Pem(key) => assert_eq!(key, "KEY MATERIAL"),
            other => panic!("expected pem, got {:?}", other),
        }
    }

    #[test]
    fn missing_pem_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut server = server();
        server.pem = Some("nope".to_string());

        let err = resolve_auth(&server, dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::SshIdentityFileNotFound);
    }

    #[test]
    fn password_then_agent() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("agent.sock");
        std::fs::write(&sock, "").unwrap();

        let mut with_password = server();
        with_password.password = Some("pw".to_string());
        with_password.ssh_options.agent = Some(sock.clone());
        assert_eq!(
            resolve_auth(&with_password, dir.path()).unwrap().kind(),
            "password"
        );

        let mut with_agent = server();
        with_agent.ssh_options.agent = Some(sock);
        assert_eq!(resolve_auth(&with_agent, dir.path()).unwrap().kind(), "agent");

        let err = resolve_auth(&server(), dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigAuthUnresolved);
    }

    #[test]
    fn agent_without_socket_is_unresolved() {
        let dir = TempDir::new().unwrap();
        let mut server = server();
        server.ssh_options.agent = Some(dir.path().join("gone.sock"));

        let err = resolve_auth(&server, dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigAuthUnresolved);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let auth = Auth::Password("hunter2".to_string());
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }

    #[test]
    fn output_prefix_names_host() {
        let session = Session::new(0, server(), Auth::Password("pw".to_string()));
        assert_eq!(session.output_prefix(), "[10.0.0.5] ");
    }
}
