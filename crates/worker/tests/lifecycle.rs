use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use channel::{Action, Bus, ChannelError, Context};
use platform::Host;
use platform_browser::BrowserHost;
use serde_json::json;
use worker::{
    BackendFactory, BackendOptions, ContentFetch, ContentTypeSniffer, FetchError, FetchOptions,
    FetchOutcome, FetchRequest, LifecycleState, ResponseEnvelope, SubdomainProbe, Worker,
    WorkerServices, WorkerSettings,
};

const ORIGIN: &str = "https://example.com";
const INSTALLED_AT: i64 = 1_700_000_000_000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone, Copy)]
enum Behaviour {
    Echo,
    Fail,
    Hang,
}

struct RecordingBackend {
    behaviour: Behaviour,
    gateways: Vec<String>,
    locators: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl ContentFetch for RecordingBackend {
    async fn fetch(&self, locator: &str, options: FetchOptions) -> Result<ResponseEnvelope, FetchError> {
        self.locators.lock().expect("lock").push(locator.to_string());
        match self.behaviour {
            Behaviour::Echo => Ok(ResponseEnvelope::new(200, format!("{} via {}", locator, self.gateways.join(",")))),
            Behaviour::Fail => Err(FetchError::Aggregate(vec![
                "gateway a: 404".to_string(),
                "gateway b: 502".to_string(),
            ])),
            Behaviour::Hang => {
                // A sub-operation that outlives this future and must observe the signal.
                let signal = options.signal.clone();
                let cancelled = Arc::clone(&self.cancelled);
                tokio::spawn(async move {
                    signal.cancelled().await;
                    cancelled.store(true, Ordering::SeqCst);
                });
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::Aborted("cancelled".to_string()))
            }
        }
    }
}

struct Factory {
    behaviour: Behaviour,
    builds: AtomicUsize,
    locators: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<AtomicBool>,
}

impl Factory {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            builds: AtomicUsize::new(0),
            locators: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl BackendFactory for Factory {
    async fn build(&self, options: BackendOptions) -> anyhow::Result<Arc<dyn ContentFetch>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingBackend {
            behaviour: self.behaviour,
            gateways: options.gateways,
            locators: Arc::clone(&self.locators),
            cancelled: Arc::clone(&self.cancelled),
        }))
    }
}

struct Probe(bool);

#[async_trait]
impl SubdomainProbe for Probe {
    async fn supports_subdomains(&self, _scheme: &str, _host: &str) -> bool {
        self.0
    }
}

struct NoSniff;

impl ContentTypeSniffer for NoSniff {
    fn sniff(&self, _bytes: &[u8], _file_name: Option<&str>) -> Option<String> {
        None
    }
}

fn host() -> Arc<BrowserHost> {
    let host = Arc::new(BrowserHost::new(ORIGIN));
    host.browser_time().set_now(INSTALLED_AT);
    host
}

fn build_worker(host: &Arc<BrowserHost>, factory: &Arc<Factory>, settings: WorkerSettings) -> Arc<Worker> {
    let services = WorkerServices {
        backend_factory: factory.clone(),
        probe: Arc::new(Probe(true)),
        sniffer: Arc::new(NoSniff),
    };
    let host: Arc<dyn Host> = host.clone();
    Arc::new(Worker::new(host, services, settings).expect("worker"))
}

async fn started(host: &Arc<BrowserHost>, factory: &Arc<Factory>) -> Arc<Worker> {
    let worker = build_worker(host, factory, WorkerSettings::default());
    worker.install().await.expect("install");
    worker.activate().await.expect("activate");
    worker
}

fn respond(outcome: FetchOutcome) -> ResponseEnvelope {
    match outcome {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => panic!("expected a response"),
    }
}

#[tokio::test]
async fn install_and_activate_reach_active() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = build_worker(&host, &factory, WorkerSettings::default());
    assert_eq!(worker.state(), LifecycleState::Installing);

    worker.install().await.expect("install");
    assert_eq!(worker.state(), LifecycleState::Activating);
    assert!(host.browser_registration().skipped_waiting());

    worker.activate().await.expect("activate");
    assert_eq!(worker.state(), LifecycleState::Active);
    assert!(host.browser_clients().is_claimed());
    assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    assert_eq!(host.browser_store().open_handles(), 0);
}

#[tokio::test]
async fn subdomain_request_is_fetched_by_locator() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;

    let response = respond(worker.handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/a/b")).await);
    assert_eq!(response.status, 200);
    assert_eq!(
        factory.locators.lock().expect("lock").as_slice(),
        ["ipfs://bafyabc/a/b"]
    );
}

#[tokio::test]
async fn query_string_travels_with_the_locator() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;

    worker
        .handle_fetch(&FetchRequest::get("https://k51key.ipns.example.com/feed.json?format=raw"))
        .await;
    assert_eq!(
        factory.locators.lock().expect("lock").as_slice(),
        ["ipns://k51key/feed.json?format=raw"]
    );
}

#[tokio::test]
async fn path_request_is_redirected_for_origin_isolation() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;

    let response = respond(worker.handle_fetch(&FetchRequest::get("https://example.com/ipfs/bafyabc/a/b")).await);
    assert_eq!(response.status, 301);
    assert_eq!(response.header("Location"), Some("https://bafyabc.ipfs.example.com/a/b"));
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert!(factory.locators.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn path_request_is_served_when_host_lacks_subdomains() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let services = WorkerServices {
        backend_factory: factory.clone(),
        probe: Arc::new(Probe(false)),
        sniffer: Arc::new(NoSniff),
    };
    let dyn_host: Arc<dyn Host> = host.clone();
    let worker = Worker::new(dyn_host, services, WorkerSettings::default()).expect("worker");
    worker.install().await.expect("install");
    worker.activate().await.expect("activate");

    let response = respond(worker.handle_fetch(&FetchRequest::get("https://example.com/ipfs/bafyabc/a/b")).await);
    assert_eq!(response.status, 200);
    assert_eq!(
        factory.locators.lock().expect("lock").as_slice(),
        ["ipfs://bafyabc/a/b"]
    );
}

#[tokio::test]
async fn unrelated_requests_pass_through() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;

    for url in [
        "https://example.com/",
        "https://example.com/#/config",
        "https://example.com/ipfs-sw-main.js",
        "https://cdn.other.org/lib.js",
        "not a url",
    ] {
        assert_eq!(worker.handle_fetch(&FetchRequest::get(url)).await, FetchOutcome::Passthrough, "{url}");
    }
    assert!(factory.locators.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn expired_timebomb_soft_deregisters() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;
    let page = "https://bafyabc.ipfs.example.com/a/b";
    host.browser_clients().open_window("tab-1", page);

    host.browser_time().set_now(INSTALLED_AT + DAY_MS + 1);
    assert!(worker.is_timebomb_expired());

    let outcome = worker.handle_fetch(&FetchRequest::get(page)).await;
    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert!(!host.browser_registration().is_registered());
    assert_eq!(host.browser_clients().window_url("tab-1").as_deref(), Some(page));
    assert_eq!(worker.state(), LifecycleState::Terminated);
    assert!(factory.locators.lock().expect("lock").is_empty());

    // Terminated instances no longer intercept anything.
    assert_eq!(worker.handle_fetch(&FetchRequest::get(page)).await, FetchOutcome::Passthrough);
}

#[tokio::test]
async fn timebomb_boundary_is_exclusive() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;

    host.browser_time().set_now(INSTALLED_AT + DAY_MS);
    assert!(!worker.is_timebomb_expired());
    let response = respond(worker.handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/")).await);
    assert_eq!(response.status, 200);
    assert!(host.browser_registration().is_registered());
}

#[tokio::test]
async fn restarted_instance_reads_install_time_from_store() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    started(&host, &factory).await;

    // The host evicted the first instance; a new one only sees the store.
    host.browser_time().set_now(INSTALLED_AT + DAY_MS + 1);
    let revived = build_worker(&host, &factory, WorkerSettings::default());
    assert!(revived.is_timebomb_expired());

    let fresh_host = self::host();
    let unrecorded = build_worker(&fresh_host, &factory, WorkerSettings::default());
    assert!(!unrecorded.is_timebomb_expired());

    let broken_host = self::host();
    broken_host.browser_store().set_unavailable(true);
    let unreadable = build_worker(&broken_host, &factory, WorkerSettings::default());
    assert!(unreadable.is_timebomb_expired());
}

#[tokio::test]
async fn reinstall_after_deregistration_starts_a_fresh_clock() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;
    host.browser_time().set_now(INSTALLED_AT + DAY_MS + 1);
    worker
        .handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/"))
        .await;
    assert_eq!(worker.state(), LifecycleState::Terminated);

    host.browser_registration().reregister();
    let successor = started(&host, &factory).await;
    assert!(!successor.is_timebomb_expired());
    let response = respond(successor.handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/")).await);
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn expired_root_request_skips_deregistration() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;
    host.browser_time().set_now(INSTALLED_AT + DAY_MS + 1);

    let outcome = worker.handle_fetch(&FetchRequest::get("https://example.com/ipfs/bafyabc/")).await;
    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert!(host.browser_registration().is_registered());
    assert_eq!(worker.state(), LifecycleState::Active);
}

#[tokio::test]
async fn hard_deregistration_sends_pages_to_config() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;
    host.browser_clients().open_window("ok", "https://bafyabc.ipfs.example.com/a");
    host.browser_clients().open_window("broken", "https://bafyabc.ipfs.example.com/b");
    host.browser_clients().open_window("later", "https://k51key.ipns.example.com/c");
    host.browser_clients().fail_navigation("broken");

    let url = url::Url::parse("https://bafyabc.ipfs.example.com/ipfs-sw-deregister").expect("url");
    let report = worker.deregister(&url, worker::DeregisterKind::Hard).await;

    assert!(report.unregistered);
    assert_eq!(report.navigated, vec!["ok".to_string(), "later".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "broken");
    assert_eq!(
        host.browser_clients().window_url("ok").as_deref(),
        Some("https://bafyabc.ipfs.example.com/#/config")
    );
    assert_eq!(
        host.browser_clients().window_url("later").as_deref(),
        Some("https://k51key.ipns.example.com/#/config")
    );
    assert_eq!(worker.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn deregister_trigger_request_passes_through() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;

    let outcome = worker
        .handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/ipfs-sw-deregister"))
        .await;
    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert!(!host.browser_registration().is_registered());
}

#[tokio::test]
async fn backend_failures_become_500() {
    let host = host();
    let factory = Factory::new(Behaviour::Fail);
    let worker = started(&host, &factory).await;

    let response = respond(worker.handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/")).await);
    assert_eq!(response.status, 500);
    assert_eq!(response.body_text(), "fetch error: gateway a: 404\ngateway b: 502");
}

#[tokio::test]
async fn slow_fetch_times_out_and_cancels_backend() {
    let host = host();
    let factory = Factory::new(Behaviour::Hang);
    let settings = WorkerSettings {
        fetch_timeout: Duration::from_millis(20),
        ..WorkerSettings::default()
    };
    let worker = build_worker(&host, &factory, settings);
    worker.install().await.expect("install");
    worker.activate().await.expect("activate");

    let response = respond(worker.handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/")).await);
    assert_eq!(response.status, 408);
    assert!(response.body_text().starts_with("fetch error aborted due to timeout"));
    assert_eq!(factory.locators.lock().expect("lock").len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(factory.cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn reload_message_rebuilds_backend_from_new_config() {
    let host = host();
    let factory = Factory::new(Behaviour::Echo);
    let worker = started(&host, &factory).await;
    let bus = Bus::new("sw-gateway");
    let listener = worker.listen(bus.channel(Context::Sw));
    let window = bus.channel(Context::Window).with_timeout(Duration::from_secs(2));

    host.config()
        .write(json!({"gateways": ["https://gw.example"]}))
        .expect("write");
    let reply = window
        .message_and_wait_for_response(Context::Sw, Action::ReloadConfig, None)
        .await
        .expect("reply");
    assert_eq!(reply.action, Action::ReloadConfigSuccess);
    assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    assert_eq!(worker.state(), LifecycleState::Active);

    let response = respond(worker.handle_fetch(&FetchRequest::get("https://bafyabc.ipfs.example.com/")).await);
    assert_eq!(response.body_text(), "ipfs://bafyabc/ via https://gw.example");
    listener.abort();
}

#[tokio::test]
async fn reload_without_listening_worker_reports_no_response() {
    let bus = Bus::new("sw-gateway");
    let window = bus.channel(Context::Window).with_timeout(Duration::from_millis(50));

    let err = window
        .message_and_wait_for_response(Context::Sw, Action::ReloadConfig, None)
        .await
        .expect_err("nobody is listening");
    assert!(matches!(err, ChannelError::NoResponse { .. }));
}
