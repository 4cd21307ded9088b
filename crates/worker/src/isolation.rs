//! Origin isolation for path-style requests.
//!
//! Every `/ipfs/<id>` and `/ipns/<id>` path on one host shares a single
//! browser origin, so one identity could read another's cookies and
//! storage. When the host also answers subdomain-style requests the
//! request is redirected to `<id>.<namespace>.<host>` before any content is
//! served.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cid::Cid;
use cid::multibase::Base;
use url::Url;

use crate::identity::RequestIdentity;
use crate::subdomain::{self, Namespace};

/// Inline CID of the empty block; every subdomain gateway can serve it.
pub const PROBE_CID: &str = "bafkqaaa";

const MAX_LABEL_LEN: usize = 63;

/// Multicodec of a public key in an `ipns` name.
const LIBP2P_KEY: u64 = 0x72;

#[async_trait]
pub trait SubdomainProbe: Send + Sync {
    /// Whether `scheme://<id>.ipfs.<host>` addressing works for `host`.
    async fn supports_subdomains(&self, scheme: &str, host: &str) -> bool;
}

pub fn probe_url(scheme: &str, host: &str) -> String {
    format!("{}://{}.ipfs.{}/", scheme, PROBE_CID, host)
}

pub struct OriginIsolation {
    probe: Arc<dyn SubdomainProbe>,
    verdicts: Mutex<HashMap<String, bool>>,
}

impl OriginIsolation {
    pub fn new(probe: Arc<dyn SubdomainProbe>) -> Self {
        Self {
            probe,
            verdicts: Mutex::new(HashMap::new()),
        }
    }

    /// The subdomain-style URL `url` must be redirected to, if any.
    pub async fn check(&self, url: &Url) -> Option<Url> {
        if !is_path_gateway_request(url) || subdomain::is_subdomain_request(url) {
            return None;
        }
        let target = to_subdomain_url(url)?;
        if self.supports_subdomains(url).await {
            tracing::debug!("origin isolation: redirecting {} to {}", url, target);
            Some(target)
        } else {
            None
        }
    }

    async fn supports_subdomains(&self, url: &Url) -> bool {
        let host = host_with_port(url);
        let key = format!("{}://{}", url.scheme(), host);
        if let Some(verdict) = self.cached(&key) {
            return verdict;
        }
        let verdict = self.probe.supports_subdomains(url.scheme(), &host).await;
        tracing::trace!("origin isolation: {} subdomain support = {}", key, verdict);
        if let Ok(mut verdicts) = self.verdicts.lock() {
            verdicts.insert(key, verdict);
        }
        verdict
    }

    fn cached(&self, key: &str) -> Option<bool> {
        self.verdicts
            .lock()
            .ok()
            .and_then(|verdicts| verdicts.get(key).copied())
    }
}

pub fn is_path_gateway_request(url: &Url) -> bool {
    let path = url.path();
    path.starts_with("/ipfs/") || path.starts_with("/ipns/")
}

/// Path-style `url` rewritten to subdomain style, keeping the remainder
/// path, query and fragment untouched. `None` when the identifier has no
/// single-label form.
pub fn to_subdomain_url(url: &Url) -> Option<Url> {
    let identity = RequestIdentity::from_url(url).ok()?;
    let namespace = identity.namespace?;
    let id = identity.identifier?;
    let label = subdomain_label(namespace, &id)?;

    let mut target = format!(
        "{}://{}.{}.{}{}",
        url.scheme(),
        label,
        namespace,
        host_with_port(url),
        identity.path
    );
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        target.push('#');
        target.push_str(fragment);
    }
    Url::parse(&target).ok()
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// The DNS label `id` is addressed by under `namespace`.
///
/// Content identifiers become CIDv1 base32, public-key names become
/// `libp2p-key` CIDv1 base36, and any other name is DNSLink-inlined.
pub fn subdomain_label(namespace: Namespace, id: &str) -> Option<String> {
    if is_dns_label(id) {
        return Some(id.to_string());
    }
    let label = match namespace {
        Namespace::Content => {
            let cid = Cid::try_from(id).ok()?.into_v1().ok()?;
            cid.to_string_of_base(Base::Base32Lower).ok()?
        }
        Namespace::Name => match peer_id_cid(id) {
            Some(cid) => cid.to_string_of_base(Base::Base36Lower).ok()?,
            None => subdomain::dnslink_label_encode(&id.to_ascii_lowercase()),
        },
    };
    is_dns_label(&label).then_some(label)
}

/// A peer id (base58 multihash, or any CID of the key) as a `libp2p-key` CID.
fn peer_id_cid(id: &str) -> Option<Cid> {
    if let Ok(multihash) = Base::Base58Btc.decode(id) {
        let mut bytes = vec![1, LIBP2P_KEY as u8];
        bytes.extend_from_slice(&multihash);
        if let Ok(cid) = Cid::try_from(bytes.as_slice()) {
            return Some(cid);
        }
    }
    let cid = Cid::try_from(id).ok()?;
    Some(Cid::new_v1(LIBP2P_KEY, *cid.hash()))
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProbe {
        supported: bool,
        calls: AtomicUsize,
    }

    impl FixedProbe {
        fn new(supported: bool) -> Arc<Self> {
            Arc::new(Self {
                supported,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SubdomainProbe for FixedProbe {
        async fn supports_subdomains(&self, _scheme: &str, _host: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.supported
        }
    }

    fn url(value: &str) -> Url {
        Url::parse(value).expect("url")
    }

    #[tokio::test]
    async fn path_request_redirects_to_subdomain() {
        let isolation = OriginIsolation::new(FixedProbe::new(true));
        let target = isolation
            .check(&url("https://example.com/ipfs/bafyabc/a/b"))
            .await
            .expect("redirect");
        assert_eq!(target.as_str(), "https://bafyabc.ipfs.example.com/a/b");
    }

    #[tokio::test]
    async fn redirect_preserves_path_query_and_is_idempotent() {
        let isolation = OriginIsolation::new(FixedProbe::new(true));
        for (input, path, query) in [
            ("http://localhost:3000/ipfs/bafyabc/x/y/?q=1&r=2", "/x/y/", Some("q=1&r=2")),
            ("https://example.com/ipfs/bafyabc", "/", None),
            ("https://example.com/ipfs/bafyabc/ipfs/nested", "/ipfs/nested", None),
            ("https://example.com/ipns/k51key/index.html?format=raw", "/index.html", Some("format=raw")),
        ] {
            let source = url(input);
            let target = isolation.check(&source).await.expect("redirect");
            assert_eq!(target.path(), path, "{input}");
            assert_eq!(target.query(), query, "{input}");
            assert_eq!(target.port(), source.port(), "{input}");
            assert!(isolation.check(&target).await.is_none(), "{input}");
        }
    }

    #[tokio::test]
    async fn dnslink_names_are_inlined() {
        let isolation = OriginIsolation::new(FixedProbe::new(true));
        let target = isolation
            .check(&url("https://example.com/ipns/docs.ipfs-example.org/guide#top"))
            .await
            .expect("redirect");
        assert_eq!(
            target.as_str(),
            "https://docs-ipfs--example-org.ipns.example.com/guide#top"
        );
        let parts = subdomain::subdomain_parts(&target);
        assert_eq!(parts.id.as_deref(), Some("docs.ipfs-example.org"));
    }

    #[tokio::test]
    async fn unsupported_host_is_not_redirected() {
        let isolation = OriginIsolation::new(FixedProbe::new(false));
        assert!(isolation.check(&url("https://example.com/ipfs/bafyabc/a")).await.is_none());
    }

    #[tokio::test]
    async fn cidv0_redirects_to_base32_cidv1() {
        let isolation = OriginIsolation::new(FixedProbe::new(true));
        let target = isolation
            .check(&url("https://example.com/ipfs/QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG/a?x=1"))
            .await
            .expect("redirect");
        assert_eq!(
            target.as_str(),
            "https://bafybeie5nqv6kd3qnfjupgvz34woh3oksc3iau6abmyajn7qvtf6d2ho34.ipfs.example.com/a?x=1"
        );
        assert!(isolation.check(&target).await.is_none());
    }

    #[tokio::test]
    async fn upper_case_cid_is_lowered() {
        let isolation = OriginIsolation::new(FixedProbe::new(true));
        let target = isolation
            .check(&url(
                "https://example.com/ipfs/BAFYBEIE5NQV6KD3QNFJUPGVZ34WOH3OKSC3IAU6ABMYAJN7QVTF6D2HO34/",
            ))
            .await
            .expect("redirect");
        assert_eq!(
            target.host_str(),
            Some("bafybeie5nqv6kd3qnfjupgvz34woh3oksc3iau6abmyajn7qvtf6d2ho34.ipfs.example.com")
        );
    }

    #[tokio::test]
    async fn peer_ids_redirect_to_base36_keys() {
        let isolation = OriginIsolation::new(FixedProbe::new(true));
        let target = isolation
            .check(&url("https://example.com/ipns/12D3KooW9pP4Seg3kZYhySpuVjn1RPdQBsUFZKiFxGMGQN5MeL6A/"))
            .await
            .expect("redirect");
        assert_eq!(
            target.as_str(),
            "https://k51qzi5uqu5dg6lcd99r9gmb963kgugjinxxggwy7o93oagk3f2eg3qcjh7127.ipns.example.com/"
        );
        assert!(isolation.check(&target).await.is_none());

        let target = isolation
            .check(&url("https://example.com/ipns/QmRZxqmfd6isQRZ7AU9pUc7oTS95Ji2JENyBKsF8ZvdLFR/x"))
            .await
            .expect("redirect");
        assert_eq!(
            target.host_str(),
            Some("k2k4r8km2i8v08lunb2pcu0qdbeeobz2all30x0f0nely9pf8lwm5bj4.ipns.example.com")
        );
    }

    #[test]
    fn identifiers_without_label_form_are_left_alone() {
        assert_eq!(subdomain_label(Namespace::Content, "not_a_cid"), None);
        assert_eq!(subdomain_label(Namespace::Name, "bad_name.example"), None);
        assert_eq!(
            subdomain_label(Namespace::Name, "Docs.Example.org").as_deref(),
            Some("docs-example-org")
        );
    }

    #[tokio::test]
    async fn probe_verdict_is_cached_per_origin() {
        let probe = FixedProbe::new(true);
        let isolation = OriginIsolation::new(probe.clone());
        isolation.check(&url("https://example.com/ipfs/bafya/")).await;
        isolation.check(&url("https://example.com/ipfs/bafyb/")).await;
        isolation.check(&url("https://example.com:8443/ipfs/bafyb/")).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn probe_url_uses_empty_inline_cid() {
        assert_eq!(
            probe_url("http", "localhost:3000"),
            "http://bafkqaaa.ipfs.localhost:3000/"
        );
    }
}
