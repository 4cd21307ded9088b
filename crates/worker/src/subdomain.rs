//! Content identity from a URL, in subdomain form
//! (`<id>.<protocol>.<parent>`) or path form (`/<protocol>/<id>/...`).

use std::fmt;

use url::Url;

use crate::error::WorkerError;

pub const CONTENT_TOKEN: &str = "ipfs";
pub const NAME_TOKEN: &str = "ipns";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Immutable content identifiers (`ipfs`).
    Content,
    /// Mutable name records (`ipns`).
    Name,
}

impl Namespace {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            CONTENT_TOKEN => Some(Namespace::Content),
            NAME_TOKEN => Some(Namespace::Name),
            _ => None,
        }
    }

    pub fn parse_token(token: &str) -> Result<Self, WorkerError> {
        Self::from_token(token).ok_or_else(|| WorkerError::UnsupportedNamespace(token.to_string()))
    }

    pub fn token(&self) -> &'static str {
        match self {
            Namespace::Content => CONTENT_TOKEN,
            Namespace::Name => NAME_TOKEN,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubdomainParts {
    pub id: Option<String>,
    pub protocol: Option<String>,
    pub parent_domain: String,
}

impl SubdomainParts {
    fn unmatched(parent_domain: &str) -> Self {
        Self {
            id: None,
            protocol: None,
            parent_domain: parent_domain.to_string(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.id.is_some() && self.protocol.is_some()
    }
}

/// Subdomain form first, path form second. Never fails: a URL matching
/// neither comes back with `id` and `protocol` unset.
pub fn parse(url: &Url) -> SubdomainParts {
    let parts = subdomain_parts(url);
    if parts.is_match() {
        return parts;
    }
    path_parts(url)
}

pub fn subdomain_parts(url: &Url) -> SubdomainParts {
    let host = url.host_str().unwrap_or("");
    let labels: Vec<&str> = host.split('.').collect();

    // Right to left, so `docs.ipfs.tech.ipns.localhost` resolves to the
    // outermost protocol label.
    for index in (0..labels.len()).rev() {
        let label = labels[index];
        if Namespace::from_token(label).is_none() {
            continue;
        }
        if index == 0 {
            break;
        }
        let mut id = labels[..index].join(".");
        if label == NAME_TOKEN && is_inlined_dnslink(&id) {
            id = dnslink_label_decode(&id);
        }
        return SubdomainParts {
            id: Some(id),
            protocol: Some(label.to_string()),
            parent_domain: labels[index + 1..].join("."),
        };
    }

    SubdomainParts::unmatched(host)
}

pub fn path_parts(url: &Url) -> SubdomainParts {
    let host = url.host_str().unwrap_or("");
    let mut segments = url.path().split('/');
    let mut protocol = segments.next().unwrap_or("");
    if protocol.is_empty() {
        protocol = segments.next().unwrap_or("");
    }
    let id = segments.next().unwrap_or("");
    if protocol.is_empty() || id.is_empty() {
        return SubdomainParts::unmatched(host);
    }

    SubdomainParts {
        id: Some(id.to_string()),
        protocol: Some(protocol.to_string()),
        parent_domain: host.to_string(),
    }
}

pub fn is_subdomain_request(url: &Url) -> bool {
    subdomain_parts(url).is_match()
}

fn is_inlined_dnslink(label: &str) -> bool {
    !label.contains('.') && label.contains('-')
}

/// `docs.ipfs-example.org` -> `docs-ipfs--example-org`
pub fn dnslink_label_encode(name: &str) -> String {
    name.replace('-', "--").replace('.', "-")
}

/// Inverse of [`dnslink_label_encode`].
pub fn dnslink_label_decode(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut chars = label.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '-' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'-') {
            chars.next();
            out.push('-');
        } else {
            out.push('.');
        }
    }
    out
}
