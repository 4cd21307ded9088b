//! Correlated messaging between the worker and the pages it serves.
//!
//! Both sides share one [`Bus`] (the host's broadcast primitive). Each side
//! holds a [`Channel`] bound to its own [`Context`] and only ever sees
//! messages addressed to it from the context it listens to. Requests carry
//! a correlation id; [`Channel::message_and_wait_for_response`] resolves
//! with the first reply that echoes it, or fails with
//! [`ChannelError::NoResponse`] once the timeout elapses.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Context {
    #[serde(rename = "WINDOW")]
    Window,
    #[serde(rename = "SW")]
    Sw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ReloadConfig,
    ReloadConfigSuccess,
    ReloadConfigFailure,
    SwReady,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ReloadConfig => "RELOAD_CONFIG",
            Action::ReloadConfigSuccess => "RELOAD_CONFIG_SUCCESS",
            Action::ReloadConfigFailure => "RELOAD_CONFIG_FAILURE",
            Action::SwReady => "SW_READY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub source: Context,
    pub target: Context,
    pub action: Action,
    pub correlation_id: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("no response to {action} from {target:?} within {waited_ms}ms")]
    NoResponse {
        action: &'static str,
        target: Context,
        waited_ms: u128,
    },
    #[error("channel closed")]
    Closed,
}

/// Named broadcast medium shared by every context on one origin.
#[derive(Clone)]
pub struct Bus {
    name: String,
    sender: broadcast::Sender<ChannelMessage>,
}

impl Bus {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            name: name.into(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self, context: Context) -> Channel {
        Channel {
            bus: self.clone(),
            context,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct Channel {
    bus: Bus,
    context: Context,
    timeout: Duration,
}

impl Channel {
    pub fn context(&self) -> Context {
        self.context
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends a fresh message and returns it (with its correlation id).
    pub fn post_message(&self, target: Context, action: Action, payload: Option<Value>) -> ChannelMessage {
        let message = ChannelMessage {
            source: self.context,
            target,
            action,
            correlation_id: nanoid::nanoid!(),
            payload,
        };
        self.send(message.clone());
        message
    }

    /// Answers `request`, echoing its correlation id back to its sender.
    pub fn reply(&self, request: &ChannelMessage, action: Action, payload: Option<Value>) -> ChannelMessage {
        let message = ChannelMessage {
            source: self.context,
            target: request.source,
            action,
            correlation_id: request.correlation_id.clone(),
            payload,
        };
        self.send(message.clone());
        message
    }

    pub fn subscribe_from(&self, source: Context) -> Subscription {
        Subscription {
            receiver: self.bus.sender.subscribe(),
            context: self.context,
            source,
        }
    }

    /// Runs `handler` for every message `source` addresses to this context
    /// until the bus closes or the returned task is aborted.
    pub fn on_message_from<F, Fut>(&self, source: Context, handler: F) -> JoinHandle<()>
    where
        F: Fn(ChannelMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe_from(source);
        let bus_name = self.bus.name.clone();
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                handler(message).await;
            }
            tracing::debug!("channel {}: listener for {:?} stopped", bus_name, source);
        })
    }

    pub async fn message_and_wait_for_response(
        &self,
        target: Context,
        action: Action,
        payload: Option<Value>,
    ) -> Result<ChannelMessage, ChannelError> {
        // Subscribe before sending so a fast reply cannot be missed.
        let mut subscription = self.subscribe_from(target);
        let request = self.post_message(target, action, payload);

        let wait = async {
            loop {
                match subscription.recv().await {
                    Some(message) if message.correlation_id == request.correlation_id => {
                        return Ok(message);
                    }
                    Some(_) => continue,
                    None => return Err(ChannelError::Closed),
                }
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "channel {}: {} to {:?} timed out",
                    self.bus.name,
                    action.as_str(),
                    target
                );
                Err(ChannelError::NoResponse {
                    action: action.as_str(),
                    target,
                    waited_ms: self.timeout.as_millis(),
                })
            }
        }
    }

    fn send(&self, message: ChannelMessage) {
        tracing::trace!(
            "channel {}: {:?} -> {:?} {}",
            self.bus.name,
            message.source,
            message.target,
            message.action.as_str()
        );
        if self.bus.sender.send(message).is_err() {
            tracing::trace!("channel {}: no listeners", self.bus.name);
        }
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<ChannelMessage>,
    context: Context,
    source: Context,
}

impl Subscription {
    /// Next message from the subscribed source addressed to this context.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.source == self.source && message.target == self.context => {
                    return Some(message);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("channel subscriber lagged, {} messages dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
