use url::Url;

use crate::error::WorkerError;
use crate::subdomain::{self, Namespace};

/// Who a request is for. Request-scoped; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub namespace: Option<Namespace>,
    pub identifier: Option<String>,
    pub path: String,
}

impl RequestIdentity {
    /// Subdomain form wins over path form. A URL in neither form yields an
    /// identity with no namespace; a path-form URL with an unknown
    /// namespace token is an error.
    pub fn from_url(url: &Url) -> Result<Self, WorkerError> {
        let parts = subdomain::parse(url);
        let (Some(protocol), Some(id)) = (parts.protocol, parts.id) else {
            return Ok(Self {
                namespace: None,
                identifier: None,
                path: url.path().to_string(),
            });
        };
        let namespace = Namespace::parse_token(&protocol)?;

        let path = if subdomain::is_subdomain_request(url) {
            url.path().to_string()
        } else {
            let prefix_len = 1 + protocol.len() + 1 + id.len();
            match url.path().get(prefix_len..) {
                Some(rest) if !rest.is_empty() => rest.to_string(),
                _ => "/".to_string(),
            }
        };
        Ok(Self {
            namespace: Some(namespace),
            identifier: Some(id),
            path,
        })
    }

    /// `namespace://id/path`; fails when the URL named no identity.
    pub fn locator(&self) -> Result<String, WorkerError> {
        match (&self.namespace, &self.identifier) {
            (Some(namespace), Some(id)) => build_locator(Some(namespace.token()), Some(id), &self.path),
            _ => Err(WorkerError::MissingIdentifier(self.path.clone())),
        }
    }
}

/// `namespace://id/path` for the content-fetch backend.
///
/// With a subdomain `protocol` and `id` the whole `path` is the remainder.
/// Otherwise `path` itself must start with `/<namespace>/<id>`.
pub fn build_locator(
    protocol: Option<&str>,
    id: Option<&str>,
    path: &str,
) -> Result<String, WorkerError> {
    if let (Some(protocol), Some(id)) = (protocol, id) {
        let namespace = Namespace::parse_token(protocol)?;
        return Ok(format!("{}://{}{}", namespace, id, path));
    }

    let mut parts = path.split('/');
    let mut namespace = parts.next().unwrap_or("");
    if namespace.is_empty() {
        namespace = parts.next().unwrap_or("");
    }
    let namespace = Namespace::parse_token(namespace)?;
    let root = parts
        .next()
        .filter(|root| !root.is_empty())
        .ok_or_else(|| WorkerError::MissingIdentifier(path.to_string()))?;
    let rest = parts.collect::<Vec<_>>().join("/");
    Ok(format!("{}://{}/{}", namespace, root, rest))
}
