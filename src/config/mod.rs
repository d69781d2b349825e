use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use crate::session::{DEFAULT_APOLOGY, SessionConfig};
use crate::transport::http::{DEFAULT_BASE_URL, DEFAULT_CHAT_PATH, DEFAULT_STREAM_PATH};
use crate::transport::{BaseUrl, HttpConfig};

pub const ENV_PREFIX: &str = "MINDFUL";

pub fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .map(|h| h.join("Library/Application Support/mindful"))
    }

    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
            .map(|c| c.join("mindful"))
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|a| a.join("mindful"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .map(|h| h.join(".config/mindful"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub chat_path: String,
    pub stream_path: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: Option<String>,
    pub streaming: bool,
    pub apology: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            user_agent: None,
            streaming: true,
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the user config file if present, then `MINDFUL_*`
    /// environment variables. A broken source is reported and defaults used.
    #[must_use]
    pub fn load() -> Self {
        Self::load_layered(Self::get_config_path().as_deref()).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {e}");
            Self::default()
        })
    }

    pub fn load_layered(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX));

        builder.build().and_then(Config::try_deserialize)
    }

    /// Reads a single file with no environment layer.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(File::from(path))
            .build()
            .and_then(Config::try_deserialize)
    }

    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn init_default() -> Result<PathBuf, io::Error> {
        let path = Self::get_config_path().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine config directory",
            )
        })?;
        Self::init_at(&path)?;
        Ok(path)
    }

    pub fn init_at(path: &Path) -> Result<(), io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("Config file already exists at {}", path.display()),
            ));
        }

        fs::write(path, include_str!("config.template.toml"))
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    #[must_use]
    pub fn http_config(&self) -> HttpConfig {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("mindful/{}", env!("CARGO_PKG_VERSION")));

        HttpConfig::new(BaseUrl::new(self.base_url.clone()))
            .with_paths(self.chat_path.clone(), self.stream_path.clone())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_user_agent(user_agent)
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            streaming: self.streaming,
            apology: self.apology.clone(),
        }
    }
}
