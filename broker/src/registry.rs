//! Central map of outstanding approvals with per-request deadline timers and
//! one-shot resolvers. This is the single rendezvous all three callback
//! ingresses (HTTP, filesystem poller, and any future ingress) converge on:
//! they only ever call `resolve(id, outcome)`, decoupling the notification
//! catalogue from the callback-delivery catalogue.
//!
//! Discipline mirrors the teacher's client table: one `Mutex` guards both the
//! lookup and the resolver-fire so exactly-one-resolve holds even under a
//! simultaneous timer expiry and callback arrival.

use std::collections::HashMap;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use broker_protocol::{ApprovalOutcome, RequestId};

// The registry itself only needs to hold the one-shot resolver: the
// orchestrator thread that registers a request is the same thread that
// suspends on it, so the reference/item/reason/channel-handles the spec
// associates with a "pending entry" live on that thread's stack rather than
// in this map.
struct Entry {
    resolver: SyncSender<ApprovalOutcome>,
}

pub struct Registry {
    entries: Mutex<HashMap<RequestId, Entry>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Registers a pending request and arms its deadline timer. Returns the
    /// receiving half of the one-shot resolver; the caller suspends on it.
    pub fn register(
        self: &Arc<Self>,
        id: RequestId,
        deadline: Instant,
    ) -> std::sync::mpsc::Receiver<ApprovalOutcome> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .insert(id, Entry { resolver: tx });

        let registry = Arc::clone(self);
        let now = Instant::now();
        let wait = deadline.saturating_duration_since(now);
        thread::spawn(move || {
            thread::sleep(wait);
            registry.resolve(id, ApprovalOutcome::TimedOut);
        });

        rx
    }

    /// Resolves a pending id. Idempotent: once an entry is removed (by a
    /// prior resolve), subsequent calls observe nothing and return `false`.
    /// The entry is removed from the map before the resolver fires, so the
    /// registry never holds a stale handle past the terminal decision.
    pub fn resolve(&self, id: RequestId, outcome: ApprovalOutcome) -> bool {
        let entry = self.entries.lock().expect("registry mutex poisoned").remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.resolver.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Removes a pending id without resolving it (used by shutdown, which
    /// resolves everything as denied through `resolve` directly instead; kept
    /// for callers that need to drop an entry without waking anyone).
    pub fn cancel(&self, id: RequestId) {
        self.entries.lock().expect("registry mutex poisoned").remove(&id);
    }

    /// Count of currently pending requests.
    pub fn snapshot(&self) -> usize {
        self.entries.lock().expect("registry mutex poisoned").len()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.lock().expect("registry mutex poisoned").contains_key(&id)
    }

    /// All currently pending ids, used by the filesystem poller to match
    /// dropped files without taking the lock per file.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Resolves every pending request with `Shutdown`, distinct from an
    /// operator denial so waiters know not to notify channels. Used during
    /// daemon shutdown.
    pub fn deny_all(&self) {
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        for (_, entry) in entries.drain() {
            let _ = entry.resolver.send(ApprovalOutcome::Shutdown);
        }
    }
}

pub fn deadline_from_now(timeout: Duration) -> Instant {
    Instant::now() + timeout
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn resolve_wakes_waiter_exactly_once() {
        let registry = Registry::new();
        let id = RequestId::random();
        let rx = registry.register(id, deadline_from_now(Duration::from_secs(30)));
        assert!(registry.resolve(id, ApprovalOutcome::Approved));
        assert_eq!(rx.recv().unwrap(), ApprovalOutcome::Approved);
        // Second resolve for the same id is a silent no-op.
        assert!(!registry.resolve(id, ApprovalOutcome::Denied));
    }

    #[test]
    fn resolve_of_unknown_id_returns_false() {
        let registry = Registry::new();
        assert!(!registry.resolve(RequestId::random(), ApprovalOutcome::Denied));
    }

    #[test]
    fn two_concurrent_requests_have_independent_ids() {
        let registry = Registry::new();
        let a = RequestId::random();
        let b = RequestId::random();
        let rx_a = registry.register(a, deadline_from_now(Duration::from_secs(30)));
        let rx_b = registry.register(b, deadline_from_now(Duration::from_secs(30)));
        registry.resolve(a, ApprovalOutcome::Approved);
        assert_eq!(rx_a.recv().unwrap(), ApprovalOutcome::Approved);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn timeout_fires_after_deadline() {
        let registry = Registry::new();
        let id = RequestId::random();
        let rx = registry.register(id, deadline_from_now(Duration::from_millis(20)));
        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(outcome, ApprovalOutcome::TimedOut);
    }

    #[test]
    fn deny_all_resolves_every_pending_entry_as_shutdown() {
        let registry = Registry::new();
        let a = RequestId::random();
        let rx = registry.register(a, deadline_from_now(Duration::from_secs(30)));
        registry.deny_all();
        assert_eq!(rx.recv().unwrap(), ApprovalOutcome::Shutdown);
        assert_eq!(registry.snapshot(), 0);
    }
}
