use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::error::WorkerError;
use crate::subdomain;

pub const DEREGISTER_PATH: &str = "/ipfs-sw-deregister";
pub const CONFIG_FRAGMENT_PREFIX: &str = "/config";

static SW_ASSET_PATTERN: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregisterKind {
    /// Timebomb expiry: pages are reloaded at their current URL.
    Soft,
    /// Explicit trigger: pages are sent to the config landing page.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ignore,
    Deregister(DeregisterKind),
    Handle,
}

/// Decides per request whether the worker answers it.
#[derive(Debug, Clone)]
pub struct Router {
    origin: String,
}

impl Router {
    pub fn new(origin: &str) -> Result<Self, WorkerError> {
        let url = Url::parse(origin).map_err(|_| WorkerError::InvalidUrl(origin.to_string()))?;
        Ok(Self {
            origin: url.origin().ascii_serialization(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// First match wins: expiry, deregistration trigger, worker-owned
    /// routes, then content requests.
    pub fn classify(&self, url: &Url, timebomb_expired: bool) -> Action {
        if timebomb_expired {
            tracing::trace!("router: timebomb expired, deregistering for {}", url);
            return Action::Deregister(DeregisterKind::Soft);
        }
        if is_deregister_request(url) {
            tracing::trace!("router: deregister request {}", url);
            return Action::Deregister(DeregisterKind::Hard);
        }
        if is_config_page_request(url) || is_sw_asset_request(url) {
            tracing::trace!("router: config page or worker asset, ignoring {}", url);
            return Action::Ignore;
        }
        if !subdomain::is_subdomain_request(url) && !self.is_root_request_for_content(url) {
            tracing::trace!("router: not a content request, ignoring {}", url);
            return Action::Ignore;
        }
        Action::Handle
    }

    /// Path-style request against the origin this worker was registered on.
    pub fn is_root_request_for_content(&self, url: &Url) -> bool {
        url.origin().ascii_serialization() == self.origin
            && (url.path().starts_with("/ipfs/") || url.path().starts_with("/ipns/"))
    }
}

pub fn is_deregister_request(url: &Url) -> bool {
    url.path() == DEREGISTER_PATH
}

pub fn is_config_page_request(url: &Url) -> bool {
    url.fragment()
        .is_some_and(|fragment| fragment.starts_with(CONFIG_FRAGMENT_PREFIX))
}

pub fn is_sw_asset_request(url: &Url) -> bool {
    SW_ASSET_PATTERN
        .get_or_init(|| Regex::new(r"^.*/ipfs-sw-[^/]+\.js$").expect("static pattern"))
        .is_match(url.path())
}

/// Where a hard deregistration sends an open page.
pub fn config_landing_url(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;
    Some(format!("{}/#{}", url.origin().ascii_serialization(), CONFIG_FRAGMENT_PREFIX))
}
