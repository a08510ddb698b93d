//! Local request transport: a Unix stream socket carrying one newline-
//! delimited JSON request object per line, one JSON response object per
//! line, in both directions. A single connection may carry several
//! sequential requests; responses preserve request order per connection
//! because each connection is serviced by a single dedicated thread that
//! reads, dispatches, and replies before reading the next line.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use broker_protocol::LocalRequest;
use serde_json::{json, Value};

use crate::orchestrator::{BrokerError, Orchestrator};

pub struct LocalTransport {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl LocalTransport {
    /// Removes a stale socket file at `socket_path` if present, then binds a
    /// fresh listener there with permissions relaxed enough for a distinct
    /// low-privilege caller identity to connect.
    pub fn bind(socket_path: &Path) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        // 0o666: the containing directory is expected to be the real
        // permission boundary in the production install (see spec.md §9).
        let mut perms = std::fs::metadata(socket_path)?.permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o666);
        std::fs::set_permissions(socket_path, perms)?;
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
        })
    }

    /// Runs the accept loop on the calling thread until `running` is cleared,
    /// spawning one worker thread per connection. Blocks with a short accept
    /// timeout so shutdown is noticed promptly.
    pub fn serve(&self, orchestrator: Arc<Orchestrator>, started_at: Instant, running: Arc<AtomicBool>) {
        self.listener
            .set_nonblocking(true)
            .expect("unix listener nonblocking");
        while running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let orchestrator = Arc::clone(&orchestrator);
                    thread::spawn(move || {
                        if let Err(err) = handle_connection(stream, &orchestrator, started_at) {
                            tracing::debug!(error = %err, "local transport connection ended");
                        }
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "local transport accept failed");
                }
            }
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn handle_connection(stream: UnixStream, orchestrator: &Orchestrator, started_at: Instant) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch_line(&line, orchestrator, started_at);
        writer.write_all(response.to_string().as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

fn dispatch_line(line: &str, orchestrator: &Orchestrator, started_at: Instant) -> Value {
    let raw: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return json!({"error": "Invalid JSON"}),
    };

    let action = raw.get("action").and_then(Value::as_str).unwrap_or("").to_string();
    match action.as_str() {
        "read" | "ping" | "status" => {
            let request: LocalRequest = match serde_json::from_value(raw) {
                Ok(request) => request,
                Err(_) => return json!({"error": "Invalid JSON"}),
            };
            match request {
                LocalRequest::Read { reference, reason } => {
                    match orchestrator.handle_read(&reference, reason.as_deref()) {
                        Ok(value) => json!({"value": value}),
                        Err(err) => json!({"error": broker_error_message(&err)}),
                    }
                }
                LocalRequest::Ping => json!({"status": "ok", "pending": orchestrator.registry.snapshot()}),
                LocalRequest::Status => json!({
                    "status": "running",
                    "pending": orchestrator.registry.snapshot(),
                    "cacheSize": orchestrator.cache.len(),
                    "uptimeSeconds": started_at.elapsed().as_secs(),
                    "channels": orchestrator.channels.iter().map(|c| c.name().to_string()).collect::<Vec<_>>(),
                    "provider": orchestrator.provider.name(),
                }),
            }
        }
        other => json!({"error": format!("Unknown action: {other}")}),
    }
}

fn broker_error_message(err: &BrokerError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::cache::ValueCache;
    use crate::channel::LogChannel;
    use crate::matcher::StandingRule;
    use crate::orchestrator::OrchestratorConfig;
    use crate::provider::StaticProvider;
    use crate::registry::Registry;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn test_orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator {
            config: OrchestratorConfig {
                open_containers: vec!["pub".to_string()],
                gated_containers: vec![],
                standing_rules: Vec::<StandingRule>::new(),
                approval_timeout: Duration::from_secs(5),
            },
            provider: Box::new(StaticProvider::new("static").with_value("op://pub/k/f", "v")),
            channels: vec![Box::new(LogChannel::new("log"))],
            cache: ValueCache::new(0),
            registry: Registry::new(),
            audit: AuditSink::open(&std::env::temp_dir().join(format!(
                "transport-test-{:?}.jsonl",
                std::thread::current().id()
            )))
            .unwrap(),
        })
    }

    #[test]
    fn serves_read_ping_and_unknown_action_over_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("broker.sock");
        let transport = LocalTransport::bind(&socket_path).unwrap();
        let orchestrator = test_orchestrator();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let started_at = Instant::now();
        let server = std::thread::spawn(move || transport.serve(orchestrator, started_at, running_clone));

        std::thread::sleep(Duration::from_millis(50));
        let mut stream = UnixStream::connect(&socket_path).unwrap();
        stream
            .write_all(br#"{"action":"read","reference":"op://pub/k/f"}"#)
            .unwrap();
        stream.write_all(b"\n").unwrap();
        stream.write_all(br#"{"action":"ping"}"#).unwrap();
        stream.write_all(b"\n").unwrap();
        stream.write_all(br#"{"action":"bogus"}"#).unwrap();
        stream.write_all(b"\n").unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim(), r#"{"value":"v"}"#);

        line.clear();
        reader.read_line(&mut line).unwrap();
        let ping: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(ping["status"], "ok");

        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim(), r#"{"error":"Unknown action: bogus"}"#);

        running.store(false, Ordering::Relaxed);
        let _ = server.join();
    }

    #[test]
    fn malformed_json_keeps_connection_open() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("broker.sock");
        let transport = LocalTransport::bind(&socket_path).unwrap();
        let orchestrator = test_orchestrator();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let started_at = Instant::now();
        let server = std::thread::spawn(move || transport.serve(orchestrator, started_at, running_clone));

        std::thread::sleep(Duration::from_millis(50));
        let mut stream = UnixStream::connect(&socket_path).unwrap();
        stream.write_all(b"{not json\n").unwrap();
        stream.write_all(br#"{"action":"ping"}"#).unwrap();
        stream.write_all(b"\n").unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim(), r#"{"error":"Invalid JSON"}"#);
        line.clear();
        reader.read_line(&mut line).unwrap();
        let ping: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(ping["status"], "ok");

        running.store(false, Ordering::Relaxed);
        let _ = server.join();
    }
}
