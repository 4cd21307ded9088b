//! One worker instance: install, activate, fetch handling, bounded
//! lifetime and self-deregistration.
//!
//! Everything cached here (install timestamp, content-fetch backend) is
//! rebuilt from the host on first use, so an instance the host evicted and
//! restarted behaves exactly like the one it replaced.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use platform::Host;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backend::{
    BackendFactory, BackendOptions, ContentFetch, ContentTypeSniffer, FetchError, FetchOptions,
    ProgressEvent,
};
use crate::config::WorkerConfig;
use crate::envelope::{FetchOutcome, FetchRequest, ResponseEnvelope};
use crate::error::WorkerError;
use crate::identity::RequestIdentity;
use crate::install_store::InstallStore;
use crate::isolation::{OriginIsolation, SubdomainProbe};
use crate::router::{self, Action, DeregisterKind, Router};
use crate::subdomain;

pub const TIMEBOMB: Duration = Duration::from_secs(24 * 60 * 60);
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const ISOLATION_REDIRECT_BODY: &str =
    "Gateway supports subdomain mode, redirecting to ensure Origin isolation..";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Waiting,
    Activating,
    Active,
    Deregistering,
    Terminated,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Installing, Waiting)
                | (Waiting, Activating)
                | (Activating, Active)
                | (Installing | Waiting | Activating | Active, Deregistering)
                | (Deregistering, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Deregistering | LifecycleState::Terminated)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub fetch_timeout: Duration,
    pub timebomb: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: FETCH_TIMEOUT,
            timebomb: TIMEBOMB,
        }
    }
}

/// Collaborators injected into a worker instance.
#[derive(Clone)]
pub struct WorkerServices {
    pub backend_factory: Arc<dyn BackendFactory>,
    pub probe: Arc<dyn SubdomainProbe>,
    pub sniffer: Arc<dyn ContentTypeSniffer>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeregisterReport {
    pub unregistered: bool,
    pub navigated: Vec<String>,
    /// `(client id, error)` for every page that could not be navigated.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallClock {
    Recorded(i64),
    Missing,
    Unreadable,
}

pub struct Worker {
    host: Arc<dyn Host>,
    services: WorkerServices,
    settings: WorkerSettings,
    router: Router,
    isolation: OriginIsolation,
    state: Mutex<LifecycleState>,
    backend: RwLock<Option<Arc<dyn ContentFetch>>>,
    install_clock: Mutex<Option<InstallClock>>,
}

impl Worker {
    pub fn new(
        host: Arc<dyn Host>,
        services: WorkerServices,
        settings: WorkerSettings,
    ) -> Result<Self, WorkerError> {
        let router = Router::new(host.origin())?;
        let isolation = OriginIsolation::new(Arc::clone(&services.probe));
        Ok(Self {
            host,
            services,
            settings,
            router,
            isolation,
            state: Mutex::new(LifecycleState::Installing),
            backend: RwLock::new(None),
            install_clock: Mutex::new(None),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(LifecycleState::Terminated)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn transition(&self, next: LifecycleState) -> Result<(), WorkerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("lifecycle state lock poisoned"))?;
        if !state.can_transition_to(next) {
            return Err(WorkerError::InvalidTransition { from: *state, to: next });
        }
        tracing::debug!("lifecycle: {:?} -> {:?}", *state, next);
        *state = next;
        Ok(())
    }

    /// Records the first-install timestamp and promotes straight to
    /// `Activating`, superseding any older generation.
    pub async fn install(&self) -> Result<(), WorkerError> {
        let now = self.host.time().now_unix_ms();
        match InstallStore::new(self.host.store()).record_first_install(now) {
            Ok(record) => self.set_install_clock(InstallClock::Recorded(record.install_timestamp)),
            Err(err) => tracing::error!("lifecycle: failed to record install timestamp: {}", err),
        }
        self.transition(LifecycleState::Waiting)?;
        if let Err(err) = self.host.registration().skip_waiting() {
            tracing::warn!("lifecycle: skip_waiting failed: {}", err);
        }
        self.transition(LifecycleState::Activating)
    }

    /// Builds the backend from the current config and claims open pages.
    pub async fn activate(&self) -> Result<(), WorkerError> {
        if self.state() == LifecycleState::Waiting {
            self.transition(LifecycleState::Activating)?;
        }
        if let Err(err) = self.reload_config().await {
            // The first fetch retries the build.
            tracing::error!("lifecycle: backend build failed during activation: {}", err);
        }
        if let Err(err) = self.host.clients().claim() {
            tracing::warn!("lifecycle: failed to claim clients: {}", err);
        }
        self.transition(LifecycleState::Active)
    }

    /// Rebuilds the content-fetch backend from a fresh config snapshot.
    /// Requests already in flight keep the backend they started with.
    pub async fn reload_config(&self) -> Result<(), WorkerError> {
        self.rebuild_backend().await.map(|_| ())
    }

    async fn rebuild_backend(&self) -> Result<Arc<dyn ContentFetch>, WorkerError> {
        let config = WorkerConfig::load(self.host.config());
        tracing::debug!("lifecycle: building backend for {} with {:?}", self.router.origin(), config);
        let options = BackendOptions::from_config(&config, Arc::clone(&self.services.sniffer));
        let backend = self.services.backend_factory.build(options).await?;
        let mut slot = self
            .backend
            .write()
            .map_err(|_| anyhow::anyhow!("backend lock poisoned"))?;
        *slot = Some(Arc::clone(&backend));
        Ok(backend)
    }

    async fn backend(&self) -> Result<Arc<dyn ContentFetch>, WorkerError> {
        let cached = self
            .backend
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(Arc::clone));
        match cached {
            Some(backend) => Ok(backend),
            None => self.rebuild_backend().await,
        }
    }

    fn set_install_clock(&self, clock: InstallClock) {
        if let Ok(mut cached) = self.install_clock.lock() {
            *cached = Some(clock);
        }
    }

    fn install_clock(&self) -> InstallClock {
        if let Some(clock) = self.install_clock.lock().ok().and_then(|cached| *cached) {
            return clock;
        }
        let clock = match InstallStore::new(self.host.store()).load() {
            Ok(Some(record)) => InstallClock::Recorded(record.install_timestamp),
            Ok(None) => {
                tracing::warn!("lifecycle: no install record for {}", self.router.origin());
                InstallClock::Missing
            }
            Err(err) => {
                tracing::error!("lifecycle: failed to read install timestamp: {}", err);
                InstallClock::Unreadable
            }
        };
        self.set_install_clock(clock);
        clock
    }

    pub fn is_timebomb_expired(&self) -> bool {
        let now = self.host.time().now_unix_ms();
        match self.install_clock() {
            InstallClock::Recorded(installed) => {
                now.saturating_sub(installed) > self.settings.timebomb.as_millis() as i64
            }
            InstallClock::Missing => false,
            InstallClock::Unreadable => true,
        }
    }

    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if self.state().is_terminal() {
            return FetchOutcome::Passthrough;
        }
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(err) => {
                tracing::trace!("router: unparsable url {}: {}", request.url, err);
                return FetchOutcome::Passthrough;
            }
        };

        match self.router.classify(&url, self.is_timebomb_expired()) {
            Action::Ignore => FetchOutcome::Passthrough,
            Action::Deregister(kind) => {
                self.deregister(&url, kind).await;
                FetchOutcome::Passthrough
            }
            Action::Handle => FetchOutcome::Respond(self.fetch_content(&url, request).await),
        }
    }

    /// Unregisters and moves every open page on. Skipped for requests
    /// outside a subdomain origin, where the config UI may be mid-flight.
    pub async fn deregister(&self, url: &Url, kind: DeregisterKind) -> DeregisterReport {
        let mut report = DeregisterReport::default();
        if !subdomain::is_subdomain_request(url) {
            tracing::debug!("lifecycle: ignoring {:?} deregistration from root request {}", kind, url);
            return report;
        }
        if let Err(err) = self.transition(LifecycleState::Deregistering) {
            tracing::debug!("lifecycle: deregistration already underway: {}", err);
            return report;
        }
        tracing::info!("lifecycle: deregistering worker for {} ({:?})", self.router.origin(), kind);

        match self.host.registration().unregister() {
            Ok(removed) => report.unregistered = removed,
            Err(err) => tracing::error!("lifecycle: unregister failed: {}", err),
        }

        let clients = self.host.clients().match_all_windows().unwrap_or_else(|err| {
            tracing::error!("lifecycle: failed to list clients: {}", err);
            Vec::new()
        });
        for client in clients {
            let target = match kind {
                DeregisterKind::Hard => {
                    router::config_landing_url(&client.url).unwrap_or_else(|| client.url.clone())
                }
                DeregisterKind::Soft => client.url.clone(),
            };
            match self.host.clients().navigate(&client.id, &target) {
                Ok(()) => report.navigated.push(client.id),
                Err(err) => {
                    tracing::error!("lifecycle: error navigating client {} to {}: {}", client.id, target, err);
                    report.failures.push((client.id, err.to_string()));
                }
            }
        }

        if let Err(err) = self.transition(LifecycleState::Terminated) {
            tracing::error!("lifecycle: {}", err);
        }
        report
    }

    async fn fetch_content(&self, url: &Url, request: &FetchRequest) -> ResponseEnvelope {
        if let Some(target) = self.isolation.check(url).await {
            return ResponseEnvelope::text(301, ISOLATION_REDIRECT_BODY)
                .with_header("Location", target.as_str());
        }

        let backend = match self.backend().await {
            Ok(backend) => backend,
            Err(err) => return error_response(&[err.to_string()]),
        };

        let mut locator = match RequestIdentity::from_url(url).and_then(|identity| identity.locator()) {
            Ok(locator) => locator,
            Err(err) => return error_response(&[err.to_string()]),
        };
        if let Some(query) = url.query() {
            locator.push('?');
            locator.push_str(query);
        }
        tracing::info!("fetch: {} for {}", locator, url);

        let signal = CancellationToken::new();
        let mut options = FetchOptions::new(signal.clone());
        options.headers = request.headers.clone();
        options.on_progress = Some(Arc::new(|event: ProgressEvent| {
            tracing::trace!("fetch progress {}: {}", event.kind, event.detail);
        }));

        match tokio::time::timeout(self.settings.fetch_timeout, backend.fetch(&locator, options)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::error!("fetch: {} failed: {}", locator, err);
                fetch_error_response(&err)
            }
            Err(_) => {
                signal.cancel();
                tracing::warn!("fetch: {} timed out after {:?}", locator, self.settings.fetch_timeout);
                timeout_response(&[format!(
                    "request aborted after {}s",
                    self.settings.fetch_timeout.as_secs()
                )])
            }
        }
    }
}

fn fetch_error_response(err: &FetchError) -> ResponseEnvelope {
    let messages = err.messages();
    if matches!(err, FetchError::Aborted(_)) || messages.iter().any(|m| m.contains("aborted")) {
        return timeout_response(&messages);
    }
    error_response(&messages)
}

fn timeout_response(messages: &[String]) -> ResponseEnvelope {
    ResponseEnvelope::text(
        408,
        format!("fetch error aborted due to timeout: {}", messages.join("\n")),
    )
}

fn error_response(messages: &[String]) -> ResponseEnvelope {
    ResponseEnvelope::text(500, format!("fetch error: {}", messages.join("\n")))
}
