//! Loopback-only HTTP callback listener. Hand-rolls a minimal HTTP/1.1
//! request parser over `std::net::TcpListener` rather than pulling in a web
//! framework — the three endpoints here are simple enough that owning the
//! wire protocol directly (the way the teacher owns its socket framing) is
//! more in keeping with this stack than a dependency for it. Grounded in
//! `codex-rs`'s `provider_auth::callback_server::CallbackServer`, which
//! parses OAuth callbacks the same way.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use broker_protocol::{parse_callback_data, ApprovalOutcome, RequestId};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::registry::Registry;

pub struct HttpCallbackListener {
    listener: TcpListener,
}

impl HttpCallbackListener {
    pub fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        Ok(Self { listener })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn serve(&self, registry: Arc<Registry>, running: Arc<AtomicBool>) {
        self.listener
            .set_nonblocking(true)
            .expect("http listener nonblocking");
        while running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let registry = Arc::clone(&registry);
                    thread::spawn(move || {
                        if let Err(err) = handle_connection(stream, &registry) {
                            tracing::debug!(error = %err, "http callback connection ended");
                        }
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(err) => tracing::warn!(error = %err, "http callback accept failed"),
            }
        }
    }
}

struct ParsedRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<ParsedRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut content_length: usize = 0;
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line)? == 0 {
            break;
        }
        let trimmed = header_line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body)?;
    }

    Ok(ParsedRequest { method, path, body })
}

fn handle_connection(mut stream: TcpStream, registry: &Registry) -> std::io::Result<()> {
    let request = read_request(&mut stream)?;
    let (status, body) = route(&request, registry);
    write_response(&mut stream, status, &body)
}

fn route(request: &ParsedRequest, registry: &Registry) -> (u16, Value) {
    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => (200, json!({})),
        ("GET", "/health") => (200, json!({"status": "ok", "pending": registry.snapshot()})),
        ("POST", "/callback") => handle_callback(&request.body, registry),
        ("POST", "/channel-callback") => handle_channel_callback(&request.body, registry),
        _ => (404, json!({"error": "not found"})),
    }
}

#[derive(Deserialize)]
struct CallbackBody {
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    approved: Option<bool>,
}

fn handle_callback(body: &[u8], registry: &Registry) -> (u16, Value) {
    let parsed: CallbackBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(_) => return (400, json!({"error": "malformed body"})),
    };
    let Some(raw_id) = parsed.request_id else {
        return (400, json!({"error": "missing requestId"}));
    };
    let Some(id) = RequestId::parse(&raw_id) else {
        return (400, json!({"error": "invalid requestId"}));
    };
    let Some(approved) = parsed.approved else {
        return (400, json!({"error": "missing approved"}));
    };
    let outcome = if approved { ApprovalOutcome::Approved } else { ApprovalOutcome::Denied };
    let resolved = registry.resolve(id, outcome);
    (200, json!({"ok": true, "resolved": resolved}))
}

#[derive(Deserialize)]
struct ChannelCallbackBody {
    callback_data: String,
}

fn handle_channel_callback(body: &[u8], registry: &Registry) -> (u16, Value) {
    let parsed: ChannelCallbackBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(_) => return (400, json!({"error": "malformed body"})),
    };
    let (verb, id) = match parse_callback_data(&parsed.callback_data) {
        Ok(pair) => pair,
        Err(err) => return (400, json!({"error": err.to_string()})),
    };
    let outcome = match verb {
        broker_protocol::CallbackVerb::Approve => ApprovalOutcome::Approved,
        broker_protocol::CallbackVerb::Deny => ApprovalOutcome::Denied,
    };
    let resolved = registry.resolve(id, outcome);
    (200, json!({"ok": true, "resolved": resolved}))
}

fn write_response(stream: &mut TcpStream, status: u16, body: &Value) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Error",
    };
    let payload = body.to_string();
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: content-type\r\n\
         Connection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}
