use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::args::ServeArgs;

pub const SERVICE_NAME: &str = "sw-gateway";
pub const CONFIG_ENV: &str = "SW_GATEWAY_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub origin: Option<String>,
    pub static_dir: Option<PathBuf>,
    /// JSON gateway config written to the config store on start.
    pub config_path: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    pub channel_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            origin: None,
            static_dir: None,
            config_path: None,
            fetch_timeout_secs: 5 * 60,
            channel_timeout_ms: 10_000,
        }
    }
}

/// Result of config discovery. Warnings are kept until logging is up.
#[derive(Debug, Default)]
pub struct Discovery {
    pub config: ServerConfig,
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl ServerConfig {
    pub fn discover() -> Discovery {
        Self::discover_in(&config_search_paths())
    }

    pub fn discover_in(paths: &[PathBuf]) -> Discovery {
        let Some(path) = paths.iter().find(|path| path.exists()) else {
            return Discovery::default();
        };

        let mut discovery = Discovery {
            source: Some(path.clone()),
            ..Discovery::default()
        };
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                discovery
                    .warnings
                    .push(format!("Failed to read {}: {}", path.display(), err));
                return discovery;
            }
        };
        match toml::from_str::<ServerConfig>(&contents) {
            Ok(config) => discovery.config = config,
            Err(err) => discovery
                .warnings
                .push(format!("Failed to parse {}: {}", path.display(), err)),
        }
        discovery
    }

    pub fn apply(&mut self, args: &ServeArgs) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(origin) = &args.origin {
            self.origin = Some(origin.clone());
        }
        if let Some(config) = &args.config {
            self.config_path = Some(config.clone());
        }
        if let Some(dir) = &args.static_dir {
            self.static_dir = Some(dir.clone());
        }
    }

    pub fn origin(&self) -> String {
        self.origin
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}

/// Reads the gateway config JSON that seeds the config store.
pub fn read_seed(path: &Path) -> anyhow::Result<serde_json::Value> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from(format!("./{}.toml", SERVICE_NAME)));
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join(SERVICE_NAME).join("config.toml"));
    } else if let Ok(home) = std::env::var("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config")
                .join(SERVICE_NAME)
                .join("config.toml"),
        );
    }
    paths
}
