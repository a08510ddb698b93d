//! The central algorithm: classifies a request, consults standing approval
//! and the cache, fans prompts out to channels, suspends for resolution, and
//! writes every decision point to the audit trail. See spec.md §4.10 for the
//! decision tree this module implements verbatim.

use std::time::Duration;

use broker_protocol::{ApprovalOutcome, RequestId};
use thiserror::Error;

use crate::audit::AuditSink;
use crate::cache::ValueCache;
use crate::channel::{ChannelMessageHandle, NotificationChannel, PromptRequest};
use crate::matcher::{self, StandingRule};
use crate::provider::{FetchOptions, ProviderError, SecretProvider};
use crate::registry::{deadline_from_now, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Open,
    Gated,
    Unknown,
}

/// Synchronous error responses the orchestrator can produce. Every variant
/// maps to an `{error: ...}` response on the local transport; none but the
/// ones explicitly called out in spec.md §4.10 are audited.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid URI")]
    InvalidReference,
    #[error("Reason is REQUIRED for gated secrets")]
    ReasonRequired,
    #[error("container '{0}' is not configured")]
    UnknownContainer(String),
    #[error("Failed to send approval request to any channel")]
    NoChannelSucceeded,
    #[error("Request denied by operator")]
    Denied,
    #[error("Request timed out after {0:?} waiting for approval")]
    TimedOut(Duration),
    #[error("{0}")]
    Provider(String),
}

pub struct OrchestratorConfig {
    pub open_containers: Vec<String>,
    pub gated_containers: Vec<String>,
    pub standing_rules: Vec<StandingRule>,
    pub approval_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn classify(&self, container: &str) -> Classification {
        let folded = container.to_lowercase();
        if self.open_containers.iter().any(|c| c.to_lowercase() == folded) {
            Classification::Open
        } else if self.gated_containers.iter().any(|c| c.to_lowercase() == folded) {
            Classification::Gated
        } else {
            Classification::Unknown
        }
    }
}

pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub provider: Box<dyn SecretProvider>,
    pub channels: Vec<Box<dyn NotificationChannel>>,
    pub cache: ValueCache,
    pub registry: std::sync::Arc<Registry>,
    pub audit: AuditSink,
}

impl Orchestrator {
    /// Handles one `read` request end to end, implementing spec.md §4.10.
    pub fn handle_read(&self, reference: &str, reason: Option<&str>) -> Result<String, BrokerError> {
        let parsed = self
            .provider
            .parse_reference(reference)
            .map_err(|_| BrokerError::InvalidReference)?;
        let container_class = self.config.classify(&parsed.container);

        match container_class {
            Classification::Open => {
                self.audit.record(
                    "read",
                    serde_json::json!({"result": "allowed", "reference": reference, "container": parsed.container}),
                );
                self.provider
                    .fetch(reference, FetchOptions { elevated: false })
                    .map_err(|err| {
                        self.audit.record(
                            "read_error",
                            serde_json::json!({"reference": reference, "error": err.to_string()}),
                        );
                        provider_error_to_broker(err)
                    })
            }
            Classification::Gated => self.handle_gated(reference, &parsed.container, &parsed.item, &parsed.field, reason),
            Classification::Unknown => Err(BrokerError::UnknownContainer(parsed.container)),
        }
    }

    fn handle_gated(
        &self,
        reference: &str,
        container: &str,
        item: &str,
        field: &str,
        reason: Option<&str>,
    ) -> Result<String, BrokerError> {
        let reason = match reason {
            Some(reason) if !reason.is_empty() => reason,
            _ => return Err(BrokerError::ReasonRequired),
        };

        if let Some(rule) = matcher::find_match(&self.config.standing_rules, item, reason) {
            self.audit.record(
                "read",
                serde_json::json!({"result": "standing_approval", "reference": reference, "note": rule.note}),
            );
            return self
                .provider
                .fetch(reference, FetchOptions { elevated: true })
                .inspect(|_| {
                    self.audit.record(
                        "read",
                        serde_json::json!({"result": "standing_approved_read", "reference": reference}),
                    );
                })
                .map_err(|err| {
                    self.audit.record(
                        "read_error",
                        serde_json::json!({"reference": reference, "error": err.to_string()}),
                    );
                    provider_error_to_broker(err)
                });
        }

        if let Some(value) = self.cache.lookup(reference) {
            self.audit.record(
                "read",
                serde_json::json!({"result": "cache_hit", "reference": reference}),
            );
            return Ok(value);
        }

        self.approval_path(reference, container, item, field, reason)
    }

    fn approval_path(
        &self,
        reference: &str,
        container: &str,
        item: &str,
        field: &str,
        reason: &str,
    ) -> Result<String, BrokerError> {
        let id = RequestId::random();
        self.audit.record(
            "request",
            serde_json::json!({"result": "pending", "id": id.to_string(), "reference": reference, "reason": reason}),
        );

        let prompt = PromptRequest {
            request_id: id,
            container,
            item,
            field,
            reason,
        };

        let mut handles: Vec<(String, ChannelMessageHandle)> = Vec::new();
        for channel in &self.channels {
            match channel.send_prompt(&prompt) {
                Ok(handle) => handles.push((channel.name().to_string(), handle)),
                Err(err) => {
                    self.audit.record(
                        "channel_error",
                        serde_json::json!({"channel": channel.name(), "id": id.to_string(), "error": err.to_string()}),
                    );
                }
            }
        }

        if !self.channels.is_empty() && handles.is_empty() {
            return Err(BrokerError::NoChannelSucceeded);
        }

        let deadline = deadline_from_now(self.config.approval_timeout);
        let rx = self.registry.register(id, deadline);
        let outcome = rx
            .recv()
            .unwrap_or(ApprovalOutcome::Denied);

        // Shutdown tears every pending request down as denied but, unlike an
        // operator denial or a timeout, must not notify channels (spec.md §5).
        if outcome != ApprovalOutcome::Shutdown {
            self.notify_handles(&handles, &prompt, outcome);
        }

        match outcome {
            ApprovalOutcome::Approved => {
                self.audit.record("approved", serde_json::json!({"id": id.to_string()}));
                self.provider
                    .fetch(reference, FetchOptions { elevated: true })
                    .inspect(|value| {
                        self.cache.store(reference, value.clone());
                        self.audit.record(
                            "read",
                            serde_json::json!({"result": "approved_read", "reference": reference, "id": id.to_string()}),
                        );
                    })
                    .map_err(|err| {
                        self.audit.record(
                            "read_error",
                            serde_json::json!({"reference": reference, "id": id.to_string(), "error": err.to_string()}),
                        );
                        provider_error_to_broker(err)
                    })
            }
            ApprovalOutcome::Denied => {
                self.audit.record("denied", serde_json::json!({"id": id.to_string()}));
                Err(BrokerError::Denied)
            }
            ApprovalOutcome::TimedOut => {
                self.audit.record("timeout", serde_json::json!({"id": id.to_string()}));
                Err(BrokerError::TimedOut(self.config.approval_timeout))
            }
            ApprovalOutcome::Shutdown => {
                self.audit.record("denied", serde_json::json!({"id": id.to_string(), "reason": "shutdown"}));
                Err(BrokerError::Denied)
            }
        }
    }

    fn notify_handles(&self, handles: &[(String, ChannelMessageHandle)], prompt: &PromptRequest<'_>, outcome: ApprovalOutcome) {
        let approved = outcome.approved();
        for (channel_name, handle) in handles {
            if let Some(channel) = self.channels.iter().find(|c| c.name() == channel_name) {
                channel.update_outcome(handle, approved, prompt);
            }
        }
    }
}

fn provider_error_to_broker(err: ProviderError) -> BrokerError {
    match err {
        ProviderError::Unrecognised => BrokerError::InvalidReference,
        ProviderError::Fetch(msg) | ProviderError::Validate(msg) => BrokerError::Provider(msg),
    }
}
