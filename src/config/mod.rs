//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast on malformed values. The proxy URL is
//! wrapped in secrecy::SecretString to keep credentials out of logs.

pub mod secrets;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str =
    "https://dl.fedoraproject.org/pub/epel/9/Everything/x86_64/Packages/";
pub const DEFAULT_REPO_URL: &str = "https://dl.fedoraproject.org/pub/epel/9/Everything/x86_64/";
pub const DEFAULT_STATE_PATH: &str = "idxwalk.db";
pub const DEFAULT_DOWNLOAD_DIR: &str = "rpms";
pub const DEFAULT_EXTENSION: &str = ".rpm";
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
pub struct Config {
    /// Root of the file index. Locations are joined onto this.
    pub base_url: String,
    /// Repository root holding `repodata/repomd.xml`.
    pub repo_url: String,
    /// Follow weak (`recommends`) dependencies as well as hard ones.
    pub weak_deps: bool,
    /// SQLite file holding the session state.
    pub state_path: PathBuf,
    /// Where downloads land.
    pub download_dir: PathBuf,
    /// File extension a download target must end with.
    pub extension: String,
    /// Pause before the walker restarts after handling an item.
    pub restart_delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    pub proxy_url: Option<SecretString>,
    /// Accept invalid TLS certificates (corporate MITM proxies).
    pub skip_tls_verify: bool,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            repo_url: DEFAULT_REPO_URL.to_string(),
            weak_deps: false,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            extension: DEFAULT_EXTENSION.to_string(),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            proxy_url: None,
            skip_tls_verify: false,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

/// On-disk TOML shape. Every field is optional and overrides the environment.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub repo_url: Option<String>,
    pub weak_deps: Option<bool>,
    pub state_path: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub extension: Option<String>,
    pub restart_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub proxy_url: Option<String>,
    pub skip_tls_verify: Option<bool>,
    pub otel_endpoint: Option<String>,
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: lookup("IDXWALK_BASE_URL").unwrap_or(defaults.base_url),
            repo_url: lookup("IDXWALK_REPO_URL").unwrap_or(defaults.repo_url),
            weak_deps: match lookup("IDXWALK_WEAK_DEPS") {
                Some(v) => parse_bool("IDXWALK_WEAK_DEPS", &v)?,
                None => defaults.weak_deps,
            },
            state_path: lookup("IDXWALK_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_path),
            download_dir: lookup("IDXWALK_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            extension: lookup("IDXWALK_EXTENSION").unwrap_or(defaults.extension),
            restart_delay: match lookup("IDXWALK_RESTART_DELAY_MS") {
                Some(v) => Duration::from_millis(parse_var("IDXWALK_RESTART_DELAY_MS", &v)?),
                None => defaults.restart_delay,
            },
            timeout: match lookup("IDXWALK_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(parse_var("IDXWALK_TIMEOUT_SECS", &v)?),
                None => defaults.timeout,
            },
            proxy_url: lookup("IDXWALK_PROXY_URL")
                .filter(|v| !v.is_empty())
                .map(SecretString::from),
            skip_tls_verify: match lookup("IDXWALK_SKIP_TLS_VERIFY") {
                Some(v) => parse_bool("IDXWALK_SKIP_TLS_VERIFY", &v)?,
                None => defaults.skip_tls_verify,
            },
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|v| !v.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Load from the environment, then apply a TOML file on top if given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("cannot read config file {}: {e}", path.display()))
            })?;
            config.apply_toml(&content).map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
                other => other,
            })?;
        }
        Ok(config)
    }

    /// Override fields with the ones present in a TOML document.
    pub fn apply_toml(&mut self, content: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad TOML: {e}")))?;

        if let Some(v) = file.base_url {
            self.base_url = v;
        }
        if let Some(v) = file.repo_url {
            self.repo_url = v;
        }
        if let Some(v) = file.weak_deps {
            self.weak_deps = v;
        }
        if let Some(v) = file.state_path {
            self.state_path = v;
        }
        if let Some(v) = file.download_dir {
            self.download_dir = v;
        }
        if let Some(v) = file.extension {
            self.extension = v;
        }
        if let Some(v) = file.restart_delay_ms {
            self.restart_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.timeout_secs {
            self.timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.proxy_url.filter(|v| !v.is_empty()) {
            self.proxy_url = Some(SecretString::from(v));
        }
        if let Some(v) = file.skip_tls_verify {
            self.skip_tls_verify = v;
        }
        if let Some(v) = file.otel_endpoint {
            self.otel_endpoint = Some(v);
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        Ok(())
    }

    /// Render as TOML. The proxy URL is redacted, so the output is safe to print.
    pub fn to_toml(&self) -> Result<String> {
        let file = FileConfig {
            base_url: Some(self.base_url.clone()),
            repo_url: Some(self.repo_url.clone()),
            weak_deps: Some(self.weak_deps),
            state_path: Some(self.state_path.clone()),
            download_dir: Some(self.download_dir.clone()),
            extension: Some(self.extension.clone()),
            restart_delay_ms: Some(self.restart_delay.as_millis() as u64),
            timeout_secs: Some(self.timeout.as_secs()),
            proxy_url: self.proxy_url.as_ref().map(secrets::redact_url),
            skip_tls_verify: Some(self.skip_tls_verify),
            otel_endpoint: self.otel_endpoint.clone(),
            log_level: Some(self.log_level.clone()),
        };
        toml::to_string_pretty(&file).map_err(|e| Error::Config(format!("cannot render TOML: {e}")))
    }

    /// Write the built-in defaults to `path`. Refuses to overwrite an existing file.
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::Config(format!(
                "{} already exists, not overwriting",
                path.display()
            )));
        }
        std::fs::write(path, Self::default().to_toml()?)?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={value:?} is invalid: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{name}={value:?} is not a boolean"))),
    }
}
