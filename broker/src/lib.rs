//! Core engine for the secret approval broker: a local, privilege-separated
//! daemon that gates access to high-sensitivity secrets behind classification,
//! a standing-approval rule table, a short-lived value cache, and (for gated
//! containers) human approval correlated across three independent callback
//! ingresses.

pub mod audit;
pub mod cache;
pub mod channel;
pub mod config;
pub mod fs_poller;
pub mod http_callback;
pub mod matcher;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod transport;

pub use broker_protocol::{
    callback_data, parse_callback_data, ApprovalOutcome, AuditEvent, CallbackDataError,
    CallbackVerb, LocalRequest, RequestId,
};
