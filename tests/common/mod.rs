//! Stub monitoring dashboard for integration tests.
//!
//! Serves one session page, the history-status endpoint, the session-stop
//! endpoint and the reply endpoint, recording every request it sees.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use live_view_refresher::config::RefresherConfig;
use live_view_refresher::viewport::ViewportGeometry;

pub const USER: &str = "U1";
pub const PAGE_PATH: &str = "/monitor/sessions/U1/";
pub const STATUS_PATH: &str = "/monitor/session/history-status/U1/";
pub const STOP_PATH: &str = "/monitor/session/stop/U1/";
pub const REPLY_PATH: &str = "/monitor/session/reply/U1/";
pub const HUMAN_LABEL: &str = "応答モードに切り替え";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct StubState {
    pub page: String,
    pub page_status: u16,
    pub set_cookie: Option<String>,
    pub latest_id: u64,
    pub status_code: u16,
    pub status_delay: Duration,
    pub toggle_status: u16,
    /// Page served after a toggle request, if set.
    pub page_after_toggle: Option<String>,
    pub reply_status: u16,
    pub reply_body: String,
    pub requests: Vec<Recorded>,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            page: session_page(0, &[], HUMAN_LABEL),
            page_status: 200,
            set_cookie: None,
            latest_id: 0,
            status_code: 200,
            status_delay: Duration::ZERO,
            toggle_status: 200,
            page_after_toggle: None,
            reply_status: 200,
            reply_body: r#"{"success": true}"#.to_string(),
            requests: Vec::new(),
        }
    }
}

pub struct StubServer {
    pub addr: SocketAddr,
    state: Arc<Mutex<StubState>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl StubServer {
    pub async fn start(state: StubState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(state));
        let shared = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let st = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = handle(stream, st).await;
                });
            }
        });
        StubServer { addr, state, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Config pointed at this server with a small, predictable viewport:
    /// 100px visible, 50px per message.
    pub fn config(&self) -> RefresherConfig {
        RefresherConfig {
            base_url: self.base_url(),
            page_path: PAGE_PATH.to_string(),
            poll_interval_ms: 50,
            viewport: ViewportGeometry {
                client_height: 100.0,
                row_height: 50.0,
            },
            ..Default::default()
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut StubState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn last(&self, method: &str, path: &str) -> Option<Recorded> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .rev()
            .find(|r| r.method == method && r.path == path)
            .cloned()
    }
}

/// A session detail page.
pub fn session_page(last_id: u64, messages: &[&str], toggle_label: &str) -> String {
    let msgs: String = messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let role = if i % 2 == 0 { "user" } else { "bot" };
            format!(r#"<div class="message {role}">{m}</div>"#)
        })
        .collect();
    format!(
        r#"<!DOCTYPE html>
<html><head><title>session</title></head>
<body>
<div class="log-container" data-user-id="{USER}" data-last-log-id="{last_id}">
  <div class="chat-log-area">
    <div class="chat-log">{msgs}</div>
  </div>
</div>
<form id="reply-form" action="{REPLY_PATH}" method="post">
  <input type="hidden" name="csrfmiddlewaretoken" value="form-token">
  <textarea id="reply-message-input" name="message"></textarea>
</form>
<button id="stopButton" data-user-id="{USER}">{toggle_label}</button>
</body></html>"#
    )
}

/// `n` numbered messages.
pub fn numbered(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("message {i}")).collect()
}

pub fn as_refs(v: &[String]) -> Vec<&str> {
    v.iter().map(String::as_str).collect()
}

async fn handle(mut stream: TcpStream, state: Arc<Mutex<StubState>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let (method, path, headers, head_len) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut raw = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut raw);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                let headers: Vec<(String, String)> = req
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect();
                break (
                    req.method.unwrap_or("").to_string(),
                    req.path.unwrap_or("").to_string(),
                    headers,
                    len,
                );
            }
            Ok(httparse::Status::Partial) => continue,
            Err(_) => return Ok(()),
        }
    };

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_len + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = (head_len + content_length).min(buf.len());
    let body = buf[head_len..end].to_vec();

    let snapshot = {
        let mut st = state.lock().unwrap();
        st.requests.push(Recorded {
            method: method.clone(),
            path: path.clone(),
            headers,
            body,
        });
        st.clone()
    };

    let (status, content_type, payload, cookie) = match (method.as_str(), path.as_str()) {
        ("GET", PAGE_PATH) => (
            snapshot.page_status,
            "text/html; charset=utf-8",
            snapshot.page.clone(),
            snapshot.set_cookie.clone(),
        ),
        ("GET", STATUS_PATH) => {
            if !snapshot.status_delay.is_zero() {
                tokio::time::sleep(snapshot.status_delay).await;
            }
            (
                snapshot.status_code,
                "application/json",
                format!(r#"{{"latest_id": {}}}"#, snapshot.latest_id),
                None,
            )
        }
        ("POST", STOP_PATH) => {
            if let Some(next) = snapshot.page_after_toggle.clone() {
                state.lock().unwrap().page = next;
            }
            (snapshot.toggle_status, "application/json", "{}".to_string(), None)
        }
        ("POST", REPLY_PATH) => (
            snapshot.reply_status,
            "application/json",
            snapshot.reply_body.clone(),
            None,
        ),
        _ => (404, "text/plain", "Not Found".to_string(), None),
    };

    let mut head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reason(status),
        payload.len()
    );
    if let Some(cookie) = cookie {
        head.push_str(&format!("Set-Cookie: {cookie}\r\n"));
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(payload.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
