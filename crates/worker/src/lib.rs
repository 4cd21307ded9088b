pub mod backend;
pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod install_store;
pub mod isolation;
pub mod lifecycle;
pub mod messages;
pub mod router;
pub mod subdomain;

pub use backend::{
    BackendFactory, BackendOptions, ContentFetch, ContentTypeSniffer, FetchError, FetchOptions,
    ProgressEvent,
};
pub use config::WorkerConfig;
pub use envelope::{FetchOutcome, FetchRequest, ResponseEnvelope};
pub use error::WorkerError;
pub use identity::{RequestIdentity, build_locator};
pub use install_store::{InstallRecord, InstallStore};
pub use isolation::{OriginIsolation, SubdomainProbe};
pub use lifecycle::{
    DeregisterReport, LifecycleState, Worker, WorkerServices, WorkerSettings,
};
pub use router::{Action, DeregisterKind, Router};
pub use subdomain::{Namespace, SubdomainParts};
