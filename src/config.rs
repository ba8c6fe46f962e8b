/// Configuration module for the DETool helper.
///
/// This module resolves everything the process needs before it starts:
/// - The listen address of the HTTP server (port 80 on the loopback address)
/// - The directory holding the pre-built UI files
/// - The URL opened by the tray's "Open" item
/// - The application data root where `DETool/TagSettings.json` lives
///
/// Every value can be overridden through an environment variable. The data
/// root follows `%APPDATA%` and falls back to the current directory when the
/// variable is unset.
///
/// # Example
///
/// ```rust
/// use detool::config::AppConfig;
///
/// let config = AppConfig::from_lookup(|_| None).unwrap();
/// assert_eq!(config.port, 80);
/// assert!(config.settings_path().ends_with("DETool/TagSettings.json"));
/// ```
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Folder created under the data root
pub const APP_DIR_NAME: &str = "DETool";
/// File holding the shared tag options
pub const SETTINGS_FILE_NAME: &str = "TagSettings.json";
/// Entry page served at `/`
pub const ENTRY_PAGE: &str = "profile.html";

/// Users map this hostname to 127.0.0.1 in their hosts file
pub const DEFAULT_APP_URL: &str = "http://DETool.APP";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub const ENV_DATA_ROOT: &str = "APPDATA";
pub const ENV_PORT: &str = "DETOOL_PORT";
pub const ENV_HOST: &str = "DETOOL_HOST";
pub const ENV_STATIC_DIR: &str = "DETOOL_STATIC_DIR";
pub const ENV_URL: &str = "DETOOL_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a port number, got {value:?}")]
    InvalidPort { var: &'static str, value: String },
    #[error("{var} must be an IP address, got {value:?}")]
    InvalidHost { var: &'static str, value: String },
}

/// Resolved process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Address the HTTP listener binds to
    pub host: IpAddr,
    pub port: u16,
    /// Root of the static UI files
    pub static_dir: PathBuf,
    /// URL the tray opens in the default browser
    pub app_url: String,
    /// Platform application data root (`%APPDATA%` or `.`)
    pub data_root: PathBuf,
}

impl AppConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match lookup(ENV_PORT) {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort { var: ENV_PORT, value })?,
            None => DEFAULT_PORT,
        };

        let host = match lookup(ENV_HOST) {
            Some(value) => value
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidHost { var: ENV_HOST, value })?,
            None => DEFAULT_HOST,
        };

        let static_dir = lookup(ENV_STATIC_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_static_dir);

        let app_url = lookup(ENV_URL).unwrap_or_else(|| DEFAULT_APP_URL.to_string());

        let data_root = lookup(ENV_DATA_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(AppConfig {
            host,
            port,
            static_dir,
            app_url,
            data_root,
        })
    }

    /// Socket address for the HTTP listener
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// `<data root>/DETool`
    pub fn app_data_dir(&self) -> PathBuf {
        self.data_root.join(APP_DIR_NAME)
    }

    /// `<data root>/DETool/TagSettings.json`
    pub fn settings_path(&self) -> PathBuf {
        self.app_data_dir().join(SETTINGS_FILE_NAME)
    }
}

/// `static/` next to the executable when it exists, else relative to the
/// working directory
fn default_static_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("static")))
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(|| PathBuf::from("static"))
}

/// Directory the executable lives in, used to look up `icon.png`
pub fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
