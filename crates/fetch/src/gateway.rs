use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use worker::{
    BackendFactory, BackendOptions, ContentFetch, ContentTypeSniffer, FetchError, FetchOptions,
    ResponseEnvelope,
};

/// Request headers that describe the hop to the worker, not the content.
const SKIPPED_HEADERS: &[&str] = &["host", "connection", "content-length", "transfer-encoding"];

/// Response headers the page needs to read the body it is handed.
const RETURNED_HEADERS: &[(&str, &str)] = &[
    ("content-encoding", "Content-Encoding"),
    ("content-range", "Content-Range"),
    ("accept-ranges", "Accept-Ranges"),
    ("etag", "ETag"),
    ("last-modified", "Last-Modified"),
    ("cache-control", "Cache-Control"),
];

/// Gateways that only answer verifiable block and CAR requests.
const TRUSTLESS_ONLY: &[&str] = &["https://trustless-gateway.link"];

/// Path gateway asked when every configured gateway is trustless-only.
pub const FALLBACK_PATH_GATEWAY: &str = "https://dweb.link";

/// Splits `namespace://id/path?query` into its three parts; the path keeps
/// its leading `/` and any query.
pub fn split_locator(locator: &str) -> Option<(&str, &str, &str)> {
    let (namespace, rest) = locator.split_once("://")?;
    let split = rest.find(['/', '?']).unwrap_or(rest.len());
    let (id, path) = rest.split_at(split);
    if namespace.is_empty() || id.is_empty() {
        return None;
    }
    Some((namespace, id, path))
}

pub struct GatewayFetch {
    client: reqwest::Client,
    gateways: Vec<String>,
    sniffer: Arc<dyn ContentTypeSniffer>,
}

impl GatewayFetch {
    pub fn new(client: reqwest::Client, options: &BackendOptions) -> Self {
        Self {
            client,
            gateways: path_gateways(&options.gateways),
            sniffer: Arc::clone(&options.sniffer),
        }
    }

    async fn fetch_from(
        &self,
        url: &str,
        file_name: Option<&str>,
        options: &FetchOptions,
    ) -> Result<ResponseEnvelope, String> {
        let mut request = self.client.get(url);
        for (name, value) in &options.headers {
            if SKIPPED_HEADERS.iter().any(|skip| name.eq_ignore_ascii_case(skip)) {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|err| format!("{}: {}", url, err))?;
        let status = response.status();
        let not_modified = status == reqwest::StatusCode::NOT_MODIFIED;
        if !status.is_success() && !not_modified {
            return Err(format!("{}: HTTP {}", url, status.as_u16()));
        }

        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let returned: Vec<(&str, String)> = RETURNED_HEADERS
            .iter()
            .filter_map(|(key, name)| {
                let value = headers.get(*key)?.to_str().ok()?;
                Some((*name, value.to_string()))
            })
            .collect();
        let encoded = headers.contains_key(reqwest::header::CONTENT_ENCODING);

        let body = response.bytes().await.map_err(|err| format!("{}: {}", url, err))?;
        let content_type = match content_type {
            Some(content_type) => Some(content_type),
            // Compressed or absent bodies say nothing about the content.
            None if !encoded && !not_modified => self.sniffer.sniff(&body, file_name),
            None => None,
        };

        let mut envelope = ResponseEnvelope::new(status.as_u16(), body);
        if let Some(content_type) = content_type {
            envelope = envelope.with_header("Content-Type", &content_type);
        }
        for (name, value) in &returned {
            envelope = envelope.with_header(name, value);
        }
        Ok(envelope)
    }
}

/// Configured gateways that can answer plain path requests, in order.
fn path_gateways(configured: &[String]) -> Vec<String> {
    let gateways: Vec<String> = configured
        .iter()
        .map(|gateway| gateway.trim_end_matches('/').to_string())
        .filter(|gateway| !TRUSTLESS_ONLY.contains(&gateway.as_str()))
        .collect();
    if gateways.is_empty() {
        tracing::debug!("fetch: no path gateway configured, using {}", FALLBACK_PATH_GATEWAY);
        return vec![FALLBACK_PATH_GATEWAY.to_string()];
    }
    gateways
}

#[async_trait]
impl ContentFetch for GatewayFetch {
    async fn fetch(&self, locator: &str, options: FetchOptions) -> Result<ResponseEnvelope, FetchError> {
        let (namespace, id, path) = split_locator(locator)
            .ok_or_else(|| FetchError::Message(format!("invalid locator {}", locator)))?;
        let path = if path.is_empty() || path.starts_with('?') {
            format!("/{}", path)
        } else {
            path.to_string()
        };
        let file_name = path
            .split('?')
            .next()
            .and_then(|p| p.rsplit('/').next())
            .filter(|name| !name.is_empty());

        let mut errors = Vec::with_capacity(self.gateways.len());
        for gateway in &self.gateways {
            let url = format!("{}/{}/{}{}", gateway, namespace, id, path);
            options.progress("gateway:request", url.as_str());
            tokio::select! {
                biased;
                _ = options.signal.cancelled() => {
                    return Err(FetchError::Aborted(format!("{} aborted", url)));
                }
                result = self.fetch_from(&url, file_name, &options) => match result {
                    Ok(response) => {
                        options.progress("gateway:success", url.as_str());
                        return Ok(response);
                    }
                    Err(err) => {
                        tracing::debug!("fetch: {}", err);
                        options.progress("gateway:error", err.as_str());
                        errors.push(err);
                    }
                }
            }
        }
        Err(FetchError::Aggregate(errors))
    }
}

/// Builds a [`GatewayFetch`] per config snapshot, sharing one HTTP client.
#[derive(Clone, Default)]
pub struct GatewayFactory {
    client: reqwest::Client,
}

impl GatewayFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendFactory for GatewayFactory {
    async fn build(&self, options: BackendOptions) -> Result<Arc<dyn ContentFetch>> {
        tracing::info!(
            "fetch: gateways {:?}, routers {:?}, dns {:?}",
            options.gateways,
            options.routers,
            options.dns_resolvers
        );
        Ok(Arc::new(GatewayFetch::new(self.client.clone(), &options)))
    }
}
