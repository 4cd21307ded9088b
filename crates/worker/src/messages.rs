use std::sync::Arc;

use channel::{Action, Channel, ChannelMessage, Context};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::lifecycle::Worker;

impl Worker {
    /// Answers one message from a page. Returns the reply that was sent.
    pub async fn handle_message(&self, channel: &Channel, message: &ChannelMessage) -> Option<ChannelMessage> {
        match message.action {
            Action::ReloadConfig => match self.reload_config().await {
                Ok(()) => {
                    tracing::trace!("channel: RELOAD_CONFIG_SUCCESS for {}", self.router().origin());
                    Some(channel.reply(message, Action::ReloadConfigSuccess, None))
                }
                Err(err) => {
                    tracing::error!("channel: config reload failed: {}", err);
                    Some(channel.reply(
                        message,
                        Action::ReloadConfigFailure,
                        Some(Value::String(err.to_string())),
                    ))
                }
            },
            other => {
                tracing::debug!("channel: unknown action {}", other.as_str());
                None
            }
        }
    }

    /// Serves messages from pages until the task is aborted, and announces
    /// readiness once listening.
    pub fn listen(self: &Arc<Self>, channel: Channel) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let responder = channel.clone();
        let handle = channel.on_message_from(Context::Window, move |message| {
            let worker = Arc::clone(&worker);
            let responder = responder.clone();
            async move {
                worker.handle_message(&responder, &message).await;
            }
        });
        channel.post_message(Context::Window, Action::SwReady, None);
        handle
    }
}
