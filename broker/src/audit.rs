//! Append-only JSONL audit sink with a stderr fallback on write failure.
//!
//! Mirrors the teacher's `log_event`: a single `Mutex<File>` guarding one
//! append-only handle so every line is written atomically and without
//! interleaving, plus a best-effort posture — a failing write never fails the
//! caller, it just gets mirrored to stderr with a loss marker.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use broker_protocol::AuditEvent;

pub struct AuditSink {
    file: Mutex<File>,
}

impl AuditSink {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| anyhow::anyhow!("unable to open audit log {}: {err}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one record. Never fails the caller: write errors are mirrored
    /// to stderr, prefixed with an audit-loss marker, instead of propagating.
    pub fn append(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                eprintln!("AUDIT_WRITE_FAILED: failed to serialize event: {err}");
                return;
            }
        };
        let mut guard = self.file.lock().expect("audit log mutex poisoned");
        let result = (|| -> std::io::Result<()> {
            guard.write_all(line.as_bytes())?;
            guard.write_all(b"\n")?;
            guard.flush()
        })();
        if let Err(err) = result {
            eprintln!("AUDIT_WRITE_FAILED: {err}: {line}");
        }
    }

    /// Convenience: builds and appends an event in one call.
    pub fn record(&self, action: &str, payload: serde_json::Value) {
        self.append(AuditEvent::new(action, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn append_writes_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = AuditSink::open(&path).unwrap();
        sink.record("daemon_start", serde_json::json!({}));
        sink.record("read", serde_json::json!({"result": "allowed"}));

        let reader = BufReader::new(File::open(&path).unwrap());
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>().unwrap();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["action"], "daemon_start");
        assert!(first["timestamp"].is_string());
    }
}
