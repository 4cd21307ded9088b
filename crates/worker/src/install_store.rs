use anyhow::{Result, anyhow};
use platform::{RecordHandle, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-registration database; never shared with other worker identities.
pub const INSTALL_DATABASE: &str = "sw-gateway-unique";
pub const INSTALL_STORE: &str = "config";
const INSTALL_TIMESTAMP_KEY: &str = "installTimestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    #[serde(rename = "installTimestamp")]
    pub install_timestamp: i64,
}

/// Reads and writes the install record, opening and closing the store on
/// every access.
pub struct InstallStore<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> InstallStore<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<Option<InstallRecord>> {
        let handle = self.store.open(INSTALL_DATABASE, INSTALL_STORE)?;
        let result = read_record(handle.as_ref());
        handle.close();
        result
    }

    /// Writes `now_ms` unless a record already exists; returns the record
    /// in effect either way.
    pub fn record_first_install(&self, now_ms: i64) -> Result<InstallRecord> {
        let mut handle = self.store.open(INSTALL_DATABASE, INSTALL_STORE)?;
        let result = match read_record(handle.as_ref()) {
            Ok(Some(existing)) => Ok(existing),
            Ok(None) => handle
                .put(INSTALL_TIMESTAMP_KEY, Value::from(now_ms))
                .map(|_| InstallRecord {
                    install_timestamp: now_ms,
                }),
            Err(err) => Err(err),
        };
        handle.close();
        result
    }
}

fn read_record(handle: &dyn RecordHandle) -> Result<Option<InstallRecord>> {
    match handle.get(INSTALL_TIMESTAMP_KEY)? {
        None => Ok(None),
        Some(value) => {
            let install_timestamp = value
                .as_i64()
                .ok_or_else(|| anyhow!("malformed {}: {}", INSTALL_TIMESTAMP_KEY, value))?;
            Ok(Some(InstallRecord { install_timestamp }))
        }
    }
}
