//! Filesystem callback poller: the broker's third callback ingress. Scans the
//! pending drop directory roughly every 500ms for files named
//! `<requestId>.json` whose id is currently pending. The unlink is the commit
//! point — it runs before the resolver fires, so a resolved file never
//! lingers to be observed by a later scan. Files naming an id that is not
//! (or no longer) pending are left untouched; a racing external agent may
//! still be about to resolve it, or it has already resolved.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_protocol::ApprovalOutcome;
use serde::Deserialize;

use crate::registry::Registry;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Deserialize)]
struct DropFile {
    approved: bool,
}

pub struct FsPoller {
    dir: PathBuf,
}

impl FsPoller {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn run(&self, registry: Arc<Registry>, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            self.scan_once(&registry);
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn scan_once(&self, registry: &Registry) {
        let pending = registry.pending_ids();
        if pending.is_empty() {
            return;
        }
        for id in pending {
            let path = self.dir.join(format!("{id}.json"));
            if let Some(outcome) = read_and_consume(&path) {
                registry.resolve(id, outcome);
            }
        }
    }
}

fn read_and_consume(path: &Path) -> Option<ApprovalOutcome> {
    let bytes = std::fs::read(path).ok()?;
    let parsed: DropFile = serde_json::from_slice(&bytes).ok()?;
    // Unlink before resolving: the commit point precedes the wake-up so the
    // file never lingers past request completion.
    let _ = std::fs::remove_file(path);
    Some(if parsed.approved {
        ApprovalOutcome::Approved
    } else {
        ApprovalOutcome::Denied
    })
}
