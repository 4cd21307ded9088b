//! Capabilities the worker borrows from its host.
//!
//! The worker never reaches for globals: the current time, its persistent
//! record store, the shared configuration, the open pages and its own
//! registration all come through these traits.

use anyhow::Result;
use serde_json::Value;

pub trait Host: Send + Sync {
    /// Origin the worker is registered under, e.g. `https://example.com`.
    fn origin(&self) -> &str;
    fn time(&self) -> &dyn Time;
    fn store(&self) -> &dyn RecordStore;
    fn config(&self) -> &dyn ConfigStore;
    fn clients(&self) -> &dyn Clients;
    fn registration(&self) -> &dyn Registration;
}

pub trait Time: Send + Sync {
    fn now_unix_ms(&self) -> i64;
}

/// Key/value record store scoped to one worker registration.
///
/// Handles are opened, used and closed within a single operation; nothing
/// may hold one across events because the host can suspend the worker
/// between any two of them.
pub trait RecordStore: Send + Sync {
    fn open(&self, database: &str, store: &str) -> Result<Box<dyn RecordHandle>>;
}

pub trait RecordHandle: Send {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn put(&mut self, key: &str, value: Value) -> Result<()>;
    fn close(self: Box<Self>);
}

/// Shared configuration written by the config UI.
pub trait ConfigStore: Send + Sync {
    fn read(&self) -> Result<Option<Value>>;
    fn write(&self, value: Value) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub url: String,
}

/// Window clients controlled by (or claimable by) the worker.
pub trait Clients: Send + Sync {
    fn claim(&self) -> Result<()>;
    fn match_all_windows(&self) -> Result<Vec<ClientInfo>>;
    fn navigate(&self, client_id: &str, url: &str) -> Result<()>;
}

pub trait Registration: Send + Sync {
    /// Supersede older worker generations instead of waiting for them.
    fn skip_waiting(&self) -> Result<()>;
    /// Returns whether a registration was actually removed.
    fn unregister(&self) -> Result<bool>;
}
