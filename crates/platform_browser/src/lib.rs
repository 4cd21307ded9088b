use anyhow::{Result, anyhow};
use platform::{ClientInfo, Clients, ConfigStore, Host, RecordHandle, RecordStore, Registration, Time};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory host with the same observable behaviour as a browser worker
/// scope: one registration, one record store that is wiped on unregister,
/// a shared config entry and a list of open windows.
pub struct BrowserHost {
    origin: String,
    time: BrowserTime,
    store: Arc<BrowserStore>,
    config: BrowserConfig,
    clients: BrowserClients,
    registration: BrowserRegistration,
}

impl BrowserHost {
    pub fn new(origin: impl Into<String>) -> Self {
        let store = Arc::new(BrowserStore::default());
        Self {
            origin: origin.into(),
            time: BrowserTime::default(),
            store: Arc::clone(&store),
            config: BrowserConfig::default(),
            clients: BrowserClients::default(),
            registration: BrowserRegistration::new(store),
        }
    }

    pub fn browser_time(&self) -> &BrowserTime {
        &self.time
    }

    pub fn browser_store(&self) -> &BrowserStore {
        &self.store
    }

    pub fn browser_config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn browser_clients(&self) -> &BrowserClients {
        &self.clients
    }

    pub fn browser_registration(&self) -> &BrowserRegistration {
        &self.registration
    }
}

impl Host for BrowserHost {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn time(&self) -> &dyn Time {
        &self.time
    }

    fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    fn config(&self) -> &dyn ConfigStore {
        &self.config
    }

    fn clients(&self) -> &dyn Clients {
        &self.clients
    }

    fn registration(&self) -> &dyn Registration {
        &self.registration
    }
}

/// Wall clock unless pinned with [`BrowserTime::set_now`].
#[derive(Default)]
pub struct BrowserTime {
    pinned: AtomicI64,
    is_pinned: AtomicBool,
}

impl BrowserTime {
    pub fn set_now(&self, now_ms: i64) {
        self.pinned.store(now_ms, Ordering::SeqCst);
        self.is_pinned.store(true, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        let now = self.now_unix_ms();
        self.set_now(now + delta_ms);
    }
}

impl Time for BrowserTime {
    fn now_unix_ms(&self) -> i64 {
        if self.is_pinned.load(Ordering::SeqCst) {
            return self.pinned.load(Ordering::SeqCst);
        }
        let now = std::time::SystemTime::now();
        now.duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

type RecordKey = (String, String, String);

#[derive(Default)]
pub struct BrowserStore {
    records: Arc<Mutex<HashMap<RecordKey, Value>>>,
    unavailable: AtomicBool,
    open_handles: Arc<AtomicI64>,
}

impl BrowserStore {
    /// Makes every subsequent `open` fail, like a blocked IndexedDB.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn open_handles(&self) -> i64 {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.records
            .lock()
            .map(|records| records.is_empty())
            .unwrap_or(true)
    }

    fn clear(&self) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("failed to lock browser store"))?;
        records.clear();
        Ok(())
    }
}

impl RecordStore for BrowserStore {
    fn open(&self, database: &str, store: &str) -> Result<Box<dyn RecordHandle>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("record store {}/{} is unavailable", database, store));
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BrowserRecordHandle {
            database: database.to_string(),
            store: store.to_string(),
            records: Arc::clone(&self.records),
            open_handles: Arc::clone(&self.open_handles),
        }))
    }
}

struct BrowserRecordHandle {
    database: String,
    store: String,
    records: Arc<Mutex<HashMap<RecordKey, Value>>>,
    open_handles: Arc<AtomicI64>,
}

impl BrowserRecordHandle {
    fn key(&self, key: &str) -> RecordKey {
        (self.database.clone(), self.store.clone(), key.to_string())
    }
}

impl RecordHandle for BrowserRecordHandle {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("failed to lock browser store"))?;
        Ok(records.get(&self.key(key)).cloned())
    }

    fn put(&mut self, key: &str, value: Value) -> Result<()> {
        let record_key = self.key(key);
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("failed to lock browser store"))?;
        records.insert(record_key, value);
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct BrowserConfig {
    value: Mutex<Option<Value>>,
}

impl ConfigStore for BrowserConfig {
    fn read(&self) -> Result<Option<Value>> {
        let value = self
            .value
            .lock()
            .map_err(|_| anyhow!("failed to lock browser config"))?;
        Ok(value.clone())
    }

    fn write(&self, value: Value) -> Result<()> {
        let mut current = self
            .value
            .lock()
            .map_err(|_| anyhow!("failed to lock browser config"))?;
        *current = Some(value);
        Ok(())
    }
}

#[derive(Default)]
pub struct BrowserClients {
    windows: Mutex<Vec<ClientInfo>>,
    failing: Mutex<Vec<String>>,
    claimed: AtomicBool,
}

impl BrowserClients {
    pub fn open_window(&self, id: &str, url: &str) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.push(ClientInfo {
                id: id.to_string(),
                url: url.to_string(),
            });
        }
    }

    /// Navigation of this client will fail from now on.
    pub fn fail_navigation(&self, id: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(id.to_string());
        }
    }

    pub fn window_url(&self, id: &str) -> Option<String> {
        self.windows.lock().ok().and_then(|windows| {
            windows
                .iter()
                .find(|client| client.id == id)
                .map(|client| client.url.clone())
        })
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

impl Clients for BrowserClients {
    fn claim(&self) -> Result<()> {
        self.claimed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn match_all_windows(&self) -> Result<Vec<ClientInfo>> {
        let windows = self
            .windows
            .lock()
            .map_err(|_| anyhow!("failed to lock browser clients"))?;
        Ok(windows.clone())
    }

    fn navigate(&self, client_id: &str, url: &str) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| anyhow!("failed to lock browser clients"))?;
        if failing.iter().any(|id| id == client_id) {
            return Err(anyhow!("navigation of client {} was rejected", client_id));
        }
        drop(failing);

        let mut windows = self
            .windows
            .lock()
            .map_err(|_| anyhow!("failed to lock browser clients"))?;
        let client = windows
            .iter_mut()
            .find(|client| client.id == client_id)
            .ok_or_else(|| anyhow!("client not found: {}", client_id))?;
        client.url = url.to_string();
        Ok(())
    }
}

pub struct BrowserRegistration {
    store: Arc<BrowserStore>,
    registered: AtomicBool,
    skipped_waiting: AtomicBool,
}

impl BrowserRegistration {
    fn new(store: Arc<BrowserStore>) -> Self {
        Self {
            store,
            registered: AtomicBool::new(true),
            skipped_waiting: AtomicBool::new(false),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn skipped_waiting(&self) -> bool {
        self.skipped_waiting.load(Ordering::SeqCst)
    }

    /// Registers a fresh worker identity with an empty record store.
    pub fn reregister(&self) {
        self.registered.store(true, Ordering::SeqCst);
        self.skipped_waiting.store(false, Ordering::SeqCst);
    }
}

impl Registration for BrowserRegistration {
    fn skip_waiting(&self) -> Result<()> {
        self.skipped_waiting.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unregister(&self) -> Result<bool> {
        let was_registered = self.registered.swap(false, Ordering::SeqCst);
        if was_registered {
            self.store.clear()?;
        }
        Ok(was_registered)
    }
}
