//! Filesystem configuration.
//!
//! Loaded from TOML, by default `~/.config/shellfs/config.toml`:
//!
//! ```toml
//! root_dir = "/home/alice"
//! host = "build01.example.net"
//! port = 22
//! username = "alice"
//! attr_cache_capacity = 1024
//! attr_cache_ttl_secs = 30
//!
//! [auth]
//! method = "key_file"
//! path = "/home/alice/.ssh/id_ed25519"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shellfs_client::constants::DEFAULT_SSH_PORT;
use shellfs_client::{Credentials, SshConfig};

use crate::cache::AttrCache;
use crate::constants::DEFAULT_ATTR_CACHE_CAPACITY;
use crate::error::{FsError, FsResult};

pub const APP_NAME: &str = "shellfs";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// How the session authenticates.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthConfig {
    Password {
        password: String,
    },
    KeyFile {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Identities from the running ssh-agent.
    #[default]
    Agent,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Credentials::from(self.clone()), f)
    }
}

impl From<AuthConfig> for Credentials {
    fn from(auth: AuthConfig) -> Self {
        match auth {
            AuthConfig::Password { password } => Credentials::Password(password),
            AuthConfig::KeyFile { path, passphrase } => Credentials::KeyFile { path, passphrase },
            AuthConfig::Agent => Credentials::Agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Default directory; relative paths resolve against it.
    pub root_dir: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    /// Local root under which remote paths are staged (defaults to the
    /// process temp dir).
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default = "default_attr_cache_capacity")]
    pub attr_cache_capacity: usize,
    #[serde(default)]
    pub attr_cache_ttl_secs: Option<u64>,
    /// Kept last: serialized as a TOML table.
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_username() -> String {
    whoami::username()
}

fn default_attr_cache_capacity() -> usize {
    DEFAULT_ATTR_CACHE_CAPACITY
}

impl FsConfig {
    /// Agent-authenticated config for the current user with default settings.
    pub fn new(host: impl Into<String>, root_dir: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            host: host.into(),
            port: default_port(),
            username: default_username(),
            staging_dir: None,
            attr_cache_capacity: default_attr_cache_capacity(),
            attr_cache_ttl_secs: None,
            auth: AuthConfig::default(),
        }
    }

    /// `<config dir>/shellfs/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> FsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FsError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
            .map_err(|e| FsError::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Load the default config file; `Ok(None)` if there is none.
    pub fn load_default() -> FsResult<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn from_toml(text: &str) -> FsResult<Self> {
        toml::from_str(text).map_err(|e| FsError::Configuration(e.to_string()))
    }

    pub fn to_toml(&self) -> FsResult<String> {
        toml::to_string_pretty(self).map_err(|e| FsError::Configuration(e.to_string()))
    }

    /// Check the root directory alone; enough for a caller-supplied transport.
    pub fn validate_root(&self) -> FsResult<()> {
        if !self.root_dir.starts_with('/') {
            return Err(FsError::Configuration(format!(
                "root_dir must be absolute: {:?}",
                self.root_dir
            )));
        }
        Ok(())
    }

    pub fn validate(&self) -> FsResult<()> {
        self.validate_root()?;
        if self.host.trim().is_empty() {
            return Err(FsError::Configuration("host must not be empty".into()));
        }
        Ok(())
    }

    pub fn ssh_config(&self) -> SshConfig {
        SshConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            credentials: self.auth.clone().into(),
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn attr_cache(&self) -> AttrCache {
        AttrCache::new(
            self.attr_cache_capacity,
            self.attr_cache_ttl_secs.map(Duration::from_secs),
        )
    }
}
