//! Uniform send-prompt + update-outcome contract over notification backends
//! (a chat bot, a push-notification service, …). Any number of channels may
//! be active simultaneously; the orchestrator fans a prompt out to all of
//! them and proceeds once at least one send succeeds.

use broker_protocol::RequestId;
use thiserror::Error;

/// Identifies the message a channel produced for a given prompt, handed back
/// unchanged on `update_outcome` so the channel can find and edit it.
#[derive(Debug, Clone)]
pub struct ChannelMessageHandle(pub String);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Send(String),
    #[error("{0}")]
    Validate(String),
}

/// The fields a channel needs to render a human-readable approval prompt.
#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    pub request_id: RequestId,
    pub container: &'a str,
    pub item: &'a str,
    pub field: &'a str,
    pub reason: &'a str,
}

pub trait NotificationChannel: Send + Sync {
    /// Sends an approval prompt. Per-channel failure is tolerated by the
    /// orchestrator (audited as `channel_error`) as long as at least one
    /// configured channel succeeds.
    fn send_prompt(&self, prompt: &PromptRequest<'_>) -> Result<ChannelMessageHandle, ChannelError>;

    /// Best-effort notification that a request resolved. The return value is
    /// ignored by the orchestrator; failures here are never retried or
    /// surfaced.
    fn update_outcome(&self, handle: &ChannelMessageHandle, approved: bool, prompt: &PromptRequest<'_>);

    /// Startup self-check, fatal on failure like the provider's.
    fn validate(&self) -> Result<(), ChannelError>;

    fn name(&self) -> &str;
}

/// Reference channel that always succeeds and records everything it was
/// asked to do, for tests and for operators running without a real chat
/// integration wired up.
pub struct LogChannel {
    name: String,
    log: std::sync::Mutex<Vec<String>>,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().expect("log channel mutex poisoned").clone()
    }
}

impl NotificationChannel for LogChannel {
    fn send_prompt(&self, prompt: &PromptRequest<'_>) -> Result<ChannelMessageHandle, ChannelError> {
        let token = broker_protocol::callback_data(broker_protocol::CallbackVerb::Approve, prompt.request_id);
        self.log.lock().expect("log channel mutex poisoned").push(format!(
            "prompt id={} container={} item={} field={} reason={:?} token={token}",
            prompt.request_id, prompt.container, prompt.item, prompt.field, prompt.reason
        ));
        Ok(ChannelMessageHandle(prompt.request_id.to_string()))
    }

    fn update_outcome(&self, handle: &ChannelMessageHandle, approved: bool, prompt: &PromptRequest<'_>) {
        self.log.lock().expect("log channel mutex poisoned").push(format!(
            "outcome handle={} approved={approved} item={}",
            handle.0, prompt.item
        ));
    }

    fn validate(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_channel_records_prompt_and_outcome() {
        let channel = LogChannel::new("log");
        let id = RequestId::random();
        let prompt = PromptRequest {
            request_id: id,
            container: "sec",
            item: "stripe",
            field: "key",
            reason: "check webhook",
        };
        let handle = channel.send_prompt(&prompt).unwrap();
        channel.update_outcome(&handle, true, &prompt);
        let entries = channel.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("stripe"));
        assert!(entries[1].contains("approved=true"));
    }
}
