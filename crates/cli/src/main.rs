use std::sync::Arc;

use fetch::{GatewayFactory, HttpProbe, MimeSniffer};
use http::{GatewayOptions, GatewayState};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use worker::{WorkerConfig, WorkerServices, WorkerSettings};

mod args;
mod config;

use args::{Command, USAGE};
use config::ServerConfig;

fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let serve = match args::parse(&argv) {
        Ok(Command::Serve(serve)) => serve,
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return;
        }
        Err(message) => {
            eprintln!("{}\n\n{}", message, USAGE);
            std::process::exit(2);
        }
    };

    let discovery = ServerConfig::discover();
    let mut config = discovery.config;
    config.apply(&serve);

    let mut seed_error = None;
    let seed = match &config.config_path {
        Some(path) => match config::read_seed(path) {
            Ok(seed) => Some(seed),
            Err(err) => {
                seed_error = Some(format!("Failed to load {}: {}", path.display(), err));
                None
            }
        },
        None => None,
    };
    let debug = seed
        .clone()
        .and_then(|value| serde_json::from_value::<WorkerConfig>(value).ok())
        .map(|worker_config| worker_config.debug)
        .unwrap_or_default();

    init_tracing(&debug);
    if let Some(path) = &discovery.source {
        tracing::info!("Loaded config from {}", path.display());
    }
    for warning in discovery.warnings.iter().chain(seed_error.iter()) {
        tracing::warn!("{}", warning);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("Failed to start runtime: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = runtime.block_on(run(config, seed)) {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig, seed: Option<serde_json::Value>) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().build()?;
    let services = WorkerServices {
        backend_factory: Arc::new(GatewayFactory::new(client.clone())),
        probe: Arc::new(HttpProbe::new(client)),
        sniffer: Arc::new(MimeSniffer),
    };
    let origin = config.origin();
    tracing::info!("Installing worker for {}", origin);

    let state = GatewayState::start(GatewayOptions {
        origin,
        static_dir: config.static_dir.clone(),
        settings: WorkerSettings {
            fetch_timeout: config.fetch_timeout(),
            ..WorkerSettings::default()
        },
        channel_timeout: config.channel_timeout(),
        services,
        initial_config: seed,
    })
    .await?;

    http::serve_http(state, config.port).await
}

fn init_tracing(debug: &str) {
    let directive = filter_directive(
        std::env::var("RUST_LOG").ok(),
        std::env::var("LOG_LEVEL").ok(),
        debug,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn filter_directive(rust_log: Option<String>, log_level: Option<String>, debug: &str) -> String {
    [rust_log, log_level, Some(debug.to_string())]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "info".to_string())
}
