use crate::lifecycle::LifecycleState;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("unsupported namespace {0:?}, expected ipfs or ipns")]
    UnsupportedNamespace(String),
    #[error("no content identifier in {0}")]
    MissingIdentifier(String),
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}
