#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use checklist_sync::config::RemoteConfig;
use checklist_sync::credentials::Credentials;

pub const OWNER: &str = "acme";
pub const REPO: &str = "certs";
pub const TOKEN: &str = "ghp_testtoken";

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub files: BTreeMap<String, StoredFile>,
    pub requests: Vec<Request>,
    // Overrides every contents response with (status, body).
    pub forced: Option<(u16, String)>,
    // Paths served like files over 1 MB: empty content, encoding "none".
    pub large: BTreeSet<String>,
    generation: u64,
}

impl ServerState {
    fn next_sha(&mut self, content: &str) -> String {
        self.generation += 1;
        let mut h = Sha256::new();
        h.update(self.generation.to_le_bytes());
        h.update(content.as_bytes());
        hex::encode(&h.finalize()[..20])
    }
}

/// Minimal stand-in for the GitHub repository contents API.
pub struct FakeGitHub {
    pub base_url: String,
    pub state: Arc<Mutex<ServerState>>,
}

impl FakeGitHub {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = Arc::new(Mutex::new(ServerState::default()));
        let shared = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                handle(stream, &shared);
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            api_base: self.base_url.clone(),
            token_env: None,
            timeout_secs: 5,
            ..RemoteConfig::default()
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            token: TOKEN.into(),
            owner: OWNER.into(),
            repo: REPO.into(),
        }
    }

    pub fn record_path(client_id: &str) -> String {
        format!("avances/{client_id}.json")
    }

    /// Seeds a record as if written by another client. Returns its sha.
    pub fn seed_json(&self, client_id: &str, json: &str) -> String {
        let content = wrap_base64(&STANDARD.encode(json.as_bytes()));
        self.seed_raw(client_id, content)
    }

    pub fn seed_raw(&self, client_id: &str, content: String) -> String {
        let mut st = self.state.lock().unwrap();
        let sha = st.next_sha(&content);
        st.files.insert(
            Self::record_path(client_id),
            StoredFile {
                content,
                sha: sha.clone(),
            },
        );
        sha
    }

    /// Serves the record like GitHub serves files over 1 MB, so the
    /// client must fall back to the git blobs API.
    pub fn mark_large(&self, client_id: &str) {
        self.state
            .lock()
            .unwrap()
            .large
            .insert(Self::record_path(client_id));
    }

    pub fn force(&self, status: u16, body: &str) {
        self.state.lock().unwrap().forced = Some((status, body.to_string()));
    }

    pub fn clear_forced(&self) {
        self.state.lock().unwrap().forced = None;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn stored_json(&self, client_id: &str) -> serde_json::Value {
        let st = self.state.lock().unwrap();
        let file = st
            .files
            .get(&Self::record_path(client_id))
            .expect("stored file");
        let compact = file.content.replace('\n', "");
        let bytes = STANDARD.decode(compact).expect("stored base64");
        serde_json::from_slice(&bytes).expect("stored json")
    }
}

// GitHub wraps returned base64 content at 60 columns.
fn wrap_base64(b64: &str) -> String {
    b64.as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut first = lines.next()?.split_whitespace();
    let method = first.next()?.to_string();
    let path = first.next()?.to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    let mut user_agent = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.trim().parse().unwrap_or(0),
            "authorization" => authorization = Some(value.trim().to_string()),
            "user-agent" => user_agent = Some(value.trim().to_string()),
            _ => {}
        }
    }

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(Request {
        method,
        path,
        authorization,
        user_agent,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn respond(stream: &mut TcpStream, status: u16, body: &str, head_only: bool) {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        401 => "Unauthorized",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let hdr = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(hdr.as_bytes());
    if !head_only {
        let _ = stream.write_all(body.as_bytes());
    }
    let _ = stream.flush();
}

fn handle(mut stream: TcpStream, state: &Arc<Mutex<ServerState>>) {
    let Some(req) = read_request(&mut stream) else {
        return;
    };
    let mut st = state.lock().unwrap();
    st.requests.push(req.clone());
    let head_only = req.method == "HEAD";

    if req.authorization.as_deref() != Some(&format!("Bearer {TOKEN}")) {
        respond(&mut stream, 401, r#"{"message":"Bad credentials"}"#, head_only);
        return;
    }

    let repo_root = format!("/repos/{OWNER}/{REPO}");
    let contents_prefix = format!("{repo_root}/contents/");
    let blobs_prefix = format!("{repo_root}/git/blobs/");
    if req.path == repo_root && req.method == "GET" {
        respond(&mut stream, 200, r#"{"full_name":"acme/certs"}"#, false);
        return;
    }
    if let Some(sha) = req.path.strip_prefix(&blobs_prefix) {
        match st.files.values().find(|f| f.sha == sha) {
            Some(file) => {
                let body = serde_json::json!({
                    "sha": file.sha,
                    "content": file.content,
                    "encoding": "base64",
                })
                .to_string();
                respond(&mut stream, 200, &body, head_only);
            }
            None => respond(&mut stream, 404, r#"{"message":"Not Found"}"#, head_only),
        }
        return;
    }
    let Some(key) = req.path.strip_prefix(&contents_prefix).map(str::to_string) else {
        respond(&mut stream, 404, r#"{"message":"Not Found"}"#, head_only);
        return;
    };
    if let Some((status, body)) = st.forced.clone() {
        respond(&mut stream, status, &body, head_only);
        return;
    }

    match req.method.as_str() {
        "GET" | "HEAD" => match st.files.get(&key) {
            Some(file) => {
                let (content, encoding) = if st.large.contains(&key) {
                    ("", "none")
                } else {
                    (file.content.as_str(), "base64")
                };
                let body = serde_json::json!({
                    "type": "file",
                    "path": key,
                    "content": content,
                    "encoding": encoding,
                    "sha": file.sha,
                })
                .to_string();
                respond(&mut stream, 200, &body, head_only);
            }
            None => respond(&mut stream, 404, r#"{"message":"Not Found"}"#, head_only),
        },
        "PUT" => {
            let body: serde_json::Value = match serde_json::from_str(&req.body) {
                Ok(v) => v,
                Err(_) => {
                    respond(&mut stream, 400, r#"{"message":"Problems parsing JSON"}"#, false);
                    return;
                }
            };
            let sent_sha = body.get("sha").and_then(|v| v.as_str()).map(str::to_string);
            let content = body
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let existing = st.files.get(&key).map(|f| f.sha.clone());
            match (existing.as_deref(), sent_sha.as_deref()) {
                (Some(_), None) => {
                    respond(
                        &mut stream,
                        422,
                        r#"{"message":"Invalid request.\n\n\"sha\" wasn't supplied."}"#,
                        false,
                    );
                    return;
                }
                (Some(cur), Some(sent)) if cur != sent => {
                    let msg = format!(r#"{{"message":"{key} does not match {sent}"}}"#);
                    respond(&mut stream, 409, &msg, false);
                    return;
                }
                _ => {}
            }
            let sha = st.next_sha(&content);
            st.large.remove(&key);
            st.files.insert(
                key.clone(),
                StoredFile {
                    content: wrap_base64(&content),
                    sha: sha.clone(),
                },
            );
            let status = if existing.is_some() { 200 } else { 201 };
            let out = serde_json::json!({
                "content": { "path": key, "sha": sha },
                "commit": { "sha": "c0ffee" },
            })
            .to_string();
            respond(&mut stream, status, &out, false);
        }
        _ => respond(&mut stream, 404, r#"{"message":"Not Found"}"#, false),
    }
}

/// Accepts connections and never answers, to exercise client timeouts.
pub fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            held.push(stream);
            thread::sleep(Duration::from_millis(10));
        }
    });
    format!("http://{addr}")
}
