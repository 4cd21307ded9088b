use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use channel::{Bus, Context};
use platform::{ConfigStore, Host};
use platform_browser::BrowserHost;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use worker::{LifecycleState, Worker, WorkerError, WorkerServices, WorkerSettings};

pub struct GatewayOptions {
    /// Origin the worker is registered on, e.g. `http://localhost:3000`.
    pub origin: String,
    pub static_dir: Option<PathBuf>,
    pub settings: WorkerSettings,
    pub channel_timeout: Duration,
    pub services: WorkerServices,
    pub initial_config: Option<serde_json::Value>,
}

struct Slot {
    worker: Arc<Worker>,
    listener: JoinHandle<()>,
}

/// One origin's worker plus everything needed to bring up its successor.
pub struct GatewayState {
    host: Arc<BrowserHost>,
    services: WorkerServices,
    settings: WorkerSettings,
    bus: Bus,
    scheme: String,
    static_dir: Option<PathBuf>,
    channel_timeout: Duration,
    slot: Mutex<Slot>,
}

impl GatewayState {
    pub async fn start(options: GatewayOptions) -> Result<Arc<Self>, WorkerError> {
        let host = Arc::new(BrowserHost::new(options.origin.clone()));
        if let Some(config) = options.initial_config {
            host.browser_config().write(config)?;
        }
        let scheme = options
            .origin
            .split_once("://")
            .map(|(scheme, _)| scheme.to_string())
            .unwrap_or_else(|| "http".to_string());
        let bus = Bus::new("sw-gateway");
        let slot = spawn_worker(&host, &options.services, &options.settings, &bus).await?;

        Ok(Arc::new(Self {
            host,
            services: options.services,
            settings: options.settings,
            bus,
            scheme,
            static_dir: options.static_dir,
            channel_timeout: options.channel_timeout,
            slot: Mutex::new(slot),
        }))
    }

    pub fn host(&self) -> &BrowserHost {
        &self.host
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn static_dir(&self) -> Option<&PathBuf> {
        self.static_dir.as_ref()
    }

    pub fn channel_timeout(&self) -> Duration {
        self.channel_timeout
    }

    /// The live worker. A terminated one is replaced by a freshly
    /// installed instance under a new registration.
    pub async fn worker(&self) -> Result<Arc<Worker>, WorkerError> {
        let mut slot = self.slot.lock().await;
        if slot.worker.state() == LifecycleState::Terminated {
            tracing::info!("[http] worker for {} terminated, installing a new one", self.host.origin());
            slot.listener.abort();
            self.host.browser_registration().reregister();
            *slot = spawn_worker(&self.host, &self.services, &self.settings, &self.bus).await?;
        }
        Ok(Arc::clone(&slot.worker))
    }
}

async fn spawn_worker(
    host: &Arc<BrowserHost>,
    services: &WorkerServices,
    settings: &WorkerSettings,
    bus: &Bus,
) -> Result<Slot, WorkerError> {
    let dyn_host: Arc<dyn Host> = host.clone();
    let worker = Arc::new(Worker::new(dyn_host, services.clone(), settings.clone())?);
    worker.install().await?;
    worker.activate().await?;
    let listener = worker.listen(bus.channel(Context::Sw));
    Ok(Slot { worker, listener })
}
