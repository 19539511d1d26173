use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineSettings;
use crate::http::outgoing::FetchTimeouts;
use crate::http::reader::UnknownHeaderPolicy;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration.
///
/// Built from defaults, then an optional YAML file, then the `LISTEN`
/// environment variable, then command-line flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen_addr: String,
    /// Serve a single connection over stdin/stdout instead of listening.
    pub subprocess: bool,
    /// Root for per-message request/response logs.
    pub log_dir: Option<PathBuf>,
    /// Root for static files served on GET.
    pub docs_root: Option<PathBuf>,
    /// Receives the bound address once the engines are loaded.
    pub server_info_file: Option<PathBuf>,
    pub pattern_sets: Option<PathBuf>,
    pub language: String,
    /// Bearer token required for shutdown/restart, if set.
    pub admin_token: Option<String>,
    pub verbosity: i32,
    pub fetch: FetchConfig,
    pub unknown_header_policy: UnknownHeaderPolicy,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl FetchConfig {
    pub fn timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            request: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            subprocess: false,
            log_dir: None,
            docs_root: None,
            server_info_file: None,
            pattern_sets: None,
            language: "English".to_string(),
            admin_token: None,
            verbosity: 0,
            fetch: FetchConfig::default(),
            unknown_header_policy: UnknownHeaderPolicy::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment.
    pub fn load() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document means "all defaults".
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides; `env` looks a variable up.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = env("LISTEN") {
            self.listen_addr = listen;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.subprocess && self.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("listen_addr must not be empty".to_string()));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must not be empty".to_string()));
        }
        if let Some(root) = &self.docs_root {
            if !root.is_dir() {
                return Err(ConfigError::Invalid(format!(
                    "docs_root {} is not a directory",
                    root.display()
                )));
            }
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            language: self.language.clone(),
            log_dir: self.log_dir.clone(),
            pattern_sets: self.pattern_sets.clone(),
        }
    }

    /// `tracing` filter directive for the configured verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            v if v < 0 => "warn",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
