use platform::ConfigStore;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GATEWAY: &str = "https://trustless-gateway.link";
pub const DEFAULT_ROUTER: &str = "https://delegated-ipfs.dev";
pub const DEFAULT_DNS_RESOLVER: &str = "https://delegated-ipfs.dev/dns-query";

/// Snapshot of the shared configuration written by the config UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    pub gateways: Vec<String>,
    pub routers: Vec<String>,
    pub auto_reload: bool,
    pub debug: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            gateways: vec![DEFAULT_GATEWAY.to_string()],
            routers: vec![DEFAULT_ROUTER.to_string()],
            auto_reload: false,
            debug: String::new(),
        }
    }
}

impl WorkerConfig {
    /// Current snapshot; an unreadable or malformed entry yields defaults.
    pub fn load(store: &dyn ConfigStore) -> Self {
        let value = match store.read() {
            Ok(Some(value)) => value,
            Ok(None) => return Self::default(),
            Err(err) => {
                tracing::warn!("config: failed to read stored config: {}", err);
                return Self::default();
            }
        };

        match serde_json::from_value::<WorkerConfig>(value) {
            Ok(config) => config.with_fallbacks(),
            Err(err) => {
                tracing::warn!("config: failed to parse stored config: {}", err);
                Self::default()
            }
        }
    }

    /// Empty endpoint lists mean "use the defaults".
    pub fn with_fallbacks(mut self) -> Self {
        if self.gateways.is_empty() {
            self.gateways = vec![DEFAULT_GATEWAY.to_string()];
        }
        if self.routers.is_empty() {
            self.routers = vec![DEFAULT_ROUTER.to_string()];
        }
        self
    }
}
