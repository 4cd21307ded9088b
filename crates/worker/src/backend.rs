//! The seam to the content-fetch backend that turns a locator into bytes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_DNS_RESOLVER, WorkerConfig};
use crate::envelope::ResponseEnvelope;

pub trait ContentTypeSniffer: Send + Sync {
    /// Best guess for `bytes`, optionally helped by the requested file name.
    fn sniff(&self, bytes: &[u8], file_name: Option<&str>) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub kind: String,
    pub detail: String,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Clone)]
pub struct FetchOptions {
    /// Cancelled when the worker gives up on the request.
    pub signal: CancellationToken,
    pub headers: Vec<(String, String)>,
    pub on_progress: Option<ProgressCallback>,
}

impl FetchOptions {
    pub fn new(signal: CancellationToken) -> Self {
        Self {
            signal,
            headers: Vec::new(),
            on_progress: None,
        }
    }

    pub fn progress(&self, kind: &str, detail: impl Into<String>) {
        if let Some(callback) = &self.on_progress {
            callback(ProgressEvent {
                kind: kind.to_string(),
                detail: detail.into(),
            });
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request aborted: {0}")]
    Aborted(String),
    #[error("all {} sources failed", .0.len())]
    Aggregate(Vec<String>),
    #[error("{0}")]
    Message(String),
}

impl FetchError {
    /// One line per underlying failure.
    pub fn messages(&self) -> Vec<String> {
        match self {
            FetchError::Aggregate(messages) => messages.clone(),
            other => vec![other.to_string()],
        }
    }
}

#[async_trait]
pub trait ContentFetch: Send + Sync {
    async fn fetch(&self, locator: &str, options: FetchOptions) -> Result<ResponseEnvelope, FetchError>;
}

/// Endpoints a backend is built with, taken from one config snapshot.
#[derive(Clone)]
pub struct BackendOptions {
    pub gateways: Vec<String>,
    pub routers: Vec<String>,
    pub dns_resolvers: Vec<String>,
    pub sniffer: Arc<dyn ContentTypeSniffer>,
}

impl BackendOptions {
    pub fn from_config(config: &WorkerConfig, sniffer: Arc<dyn ContentTypeSniffer>) -> Self {
        let config = config.clone().with_fallbacks();
        Self {
            gateways: config.gateways,
            routers: config.routers,
            dns_resolvers: vec![DEFAULT_DNS_RESOLVER.to_string()],
            sniffer,
        }
    }
}

#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn build(&self, options: BackendOptions) -> anyhow::Result<Arc<dyn ContentFetch>>;
}
