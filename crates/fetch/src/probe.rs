use std::time::Duration;

use async_trait::async_trait;
use worker::SubdomainProbe;
use worker::isolation::probe_url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Asks the host itself whether it serves the empty inline CID on a
/// subdomain.
#[derive(Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubdomainProbe for HttpProbe {
    async fn supports_subdomains(&self, scheme: &str, host: &str) -> bool {
        let url = probe_url(scheme, host);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().as_u16() == 200,
            Err(err) => {
                tracing::debug!("probe: {} unreachable: {}", url, err);
                false
            }
        }
    }
}
