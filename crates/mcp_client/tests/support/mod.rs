#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// What one event-stream request gets.
#[derive(Clone, Debug)]
pub enum StreamScript {
    /// Emits `connected` with the given clientId, then relays pushed frames.
    Handshake(String),
    /// Opens the stream and never says anything.
    Silent,
    /// Answers with an error status.
    Reject(u16),
}

/// What one invoke request gets.
#[derive(Clone, Debug)]
pub enum InvokeScript {
    /// 200 with this JSON body.
    Immediate(Value),
    /// 202 `{"status":"accepted"}`, then these events on the stream with `id` filled in.
    Deferred(Vec<Value>),
    /// Bare status with a body.
    Status(u16, String),
    /// 202 and nothing ever arrives.
    Silent,
    /// Reads the request and never answers it.
    Hang,
}

#[derive(Clone, Debug)]
enum Frame {
    Data(String),
    Close,
}

#[derive(Clone)]
struct Script {
    streams: Arc<Mutex<Vec<StreamScript>>>,
    fallback_body: Option<String>,
    tools: Value,
    stall_tools: bool,
    invokes: Arc<Mutex<Vec<InvokeScript>>>,
    invoke_delay: Duration,
}

fn next_or_last<T: Clone>(items: &Mutex<Vec<T>>) -> Option<T> {
    let mut items = items.lock().expect("script lock");
    if items.len() > 1 {
        Some(items.remove(0))
    } else {
        items.first().cloned()
    }
}

#[derive(Default)]
pub struct Counters {
    pub stream: AtomicUsize,
    pub fallback: AtomicUsize,
    pub tools: AtomicUsize,
    pub invoke: AtomicUsize,
    pub info: AtomicUsize,
}

pub struct ToolServerBuilder {
    streams: Vec<StreamScript>,
    fallback_body: Option<String>,
    tools: Value,
    stall_tools: bool,
    invokes: Vec<InvokeScript>,
    invoke_delay: Duration,
}

impl ToolServerBuilder {
    pub fn streams(mut self, streams: Vec<StreamScript>) -> Self {
        self.streams = streams;
        self
    }

    /// Raw body served to requests that do not ask for `text/event-stream`.
    pub fn fallback_body(mut self, body: impl Into<String>) -> Self {
        self.fallback_body = Some(body.into());
        self
    }

    pub fn tools(mut self, tools: Value) -> Self {
        self.tools = tools;
        self
    }

    /// `/tools` requests are accepted and never answered.
    pub fn stall_tools(mut self) -> Self {
        self.stall_tools = true;
        self
    }

    pub fn invokes(mut self, invokes: Vec<InvokeScript>) -> Self {
        self.invokes = invokes;
        self
    }

    pub fn invoke_delay(mut self, delay: Duration) -> Self {
        self.invoke_delay = delay;
        self
    }

    pub async fn start(self) -> MockToolServer {
        MockToolServer::start(Script {
            streams: Arc::new(Mutex::new(self.streams)),
            fallback_body: self.fallback_body,
            tools: self.tools,
            stall_tools: self.stall_tools,
            invokes: Arc::new(Mutex::new(self.invokes)),
            invoke_delay: self.invoke_delay,
        })
        .await
    }
}

/// Minimal HTTP/1.1 tool server: one request per connection.
pub struct MockToolServer {
    pub base_url: String,
    pub counters: Arc<Counters>,
    invoke_bodies: Arc<Mutex<Vec<Value>>>,
    frames: broadcast::Sender<Frame>,
    handle: JoinHandle<()>,
}

impl MockToolServer {
    pub fn builder() -> ToolServerBuilder {
        ToolServerBuilder {
            streams: vec![StreamScript::Handshake("abc123".to_string())],
            fallback_body: None,
            tools: json!([
                {"name": "listFiles", "description": "List a directory",
                 "inputSchema": {"type": "object",
                                 "properties": {"path": {"type": "string"}},
                                 "required": ["path"]}}
            ]),
            stall_tools: false,
            invokes: vec![InvokeScript::Immediate(json!({
                "result": {"content": [{"type": "text", "text": "{\"files\":[\"a.txt\"]}"}]}
            }))],
            invoke_delay: Duration::ZERO,
        }
    }

    async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let counters = Arc::new(Counters::default());
        let invoke_bodies = Arc::new(Mutex::new(Vec::new()));
        let (frames, _) = broadcast::channel(64);

        let handle = tokio::spawn({
            let counters = Arc::clone(&counters);
            let invoke_bodies = Arc::clone(&invoke_bodies);
            let frames = frames.clone();
            async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        break;
                    };
                    tokio::spawn(serve_one(
                        socket,
                        script.clone(),
                        Arc::clone(&counters),
                        Arc::clone(&invoke_bodies),
                        frames.clone(),
                    ));
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            counters,
            invoke_bodies,
            frames,
            handle,
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn invoke_bodies(&self) -> Vec<Value> {
        self.invoke_bodies.lock().expect("bodies lock").clone()
    }

    /// Pushes one `data:` frame to every open event stream.
    pub fn push_event(&self, event: Value) {
        let _ = self.frames.send(Frame::Data(event.to_string()));
    }

    /// Ends every open event stream.
    pub fn drop_streams(&self) {
        let _ = self.frames.send(Frame::Close);
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for MockToolServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    let header_end = loop {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buffer[header_end..].to_vec();
    while body.len() < length {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Some(Request {
        method,
        path,
        headers,
        body,
    })
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        410 => "Gone",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

async fn write_full(socket: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        status_reason(status),
        body.len(),
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Keeps the connection open without ever writing a response.
async fn hold_open(socket: TcpStream) {
    let _socket = socket;
    std::future::pending::<()>().await;
}

async fn write_chunk(socket: &mut TcpStream, bytes: &[u8]) -> bool {
    let prefix = format!("{:X}\r\n", bytes.len());
    socket.write_all(prefix.as_bytes()).await.is_ok()
        && socket.write_all(bytes).await.is_ok()
        && socket.write_all(b"\r\n").await.is_ok()
        && socket.flush().await.is_ok()
}

async fn relay_stream(
    mut socket: TcpStream,
    first: Option<String>,
    mut frames: broadcast::Receiver<Frame>,
) {
    let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
    if socket.write_all(headers.as_bytes()).await.is_err() {
        return;
    }
    if let Some(first) = first {
        if !write_chunk(&mut socket, first.as_bytes()).await {
            return;
        }
    }

    loop {
        match frames.recv().await {
            Ok(Frame::Data(data)) => {
                let frame = format!("data: {data}\n\n");
                if !write_chunk(&mut socket, frame.as_bytes()).await {
                    return;
                }
            }
            Ok(Frame::Close) | Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

async fn serve_one(
    mut socket: TcpStream,
    script: Script,
    counters: Arc<Counters>,
    invoke_bodies: Arc<Mutex<Vec<Value>>>,
    frames: broadcast::Sender<Frame>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let path = request.path.split('?').next().unwrap_or("").to_string();

    match (request.method.as_str(), path.as_str()) {
        ("GET", "/sse") => {
            let wants_stream = request
                .headers
                .get("accept")
                .is_some_and(|accept| accept.contains("text/event-stream"));
            // Subscribe before answering so no pushed frame is missed.
            let receiver = frames.subscribe();

            if !wants_stream {
                if let Some(body) = script.fallback_body.clone() {
                    counters.fallback.fetch_add(1, Ordering::SeqCst);
                    relay_stream(socket, Some(body), receiver).await;
                    return;
                }
            }

            counters.stream.fetch_add(1, Ordering::SeqCst);
            match next_or_last(&script.streams) {
                Some(StreamScript::Handshake(client_id)) => {
                    let first = format!(
                        "data: {}\n\n",
                        json!({"type": "connected", "clientId": client_id})
                    );
                    relay_stream(socket, Some(first), receiver).await;
                }
                Some(StreamScript::Silent) => relay_stream(socket, None, receiver).await,
                Some(StreamScript::Reject(status)) => {
                    let body = r#"{"error":"unavailable"}"#;
                    write_full(&mut socket, status, "application/json", body).await;
                }
                None => {
                    write_full(&mut socket, 503, "application/json", r#"{"error":"unavailable"}"#)
                        .await;
                }
            }
        }
        ("GET", "/tools") => {
            counters.tools.fetch_add(1, Ordering::SeqCst);
            if script.stall_tools {
                hold_open(socket).await;
                return;
            }
            write_full(&mut socket, 200, "application/json", &script.tools.to_string()).await;
        }
        ("GET", "/info") => {
            counters.info.fetch_add(1, Ordering::SeqCst);
            write_full(
                &mut socket,
                200,
                "application/json",
                r#"{"name":"mock-tools","version":"1.0.0"}"#,
            )
            .await;
        }
        ("POST", "/invoke") => {
            counters.invoke.fetch_add(1, Ordering::SeqCst);
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            invoke_bodies
                .lock()
                .expect("bodies lock")
                .push(body.clone());
            let message_id = body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            if !script.invoke_delay.is_zero() {
                sleep(script.invoke_delay).await;
            }

            match next_or_last(&script.invokes) {
                Some(InvokeScript::Immediate(reply)) => {
                    write_full(&mut socket, 200, "application/json", &reply.to_string()).await;
                }
                Some(InvokeScript::Deferred(events)) => {
                    write_full(&mut socket, 202, "application/json", r#"{"status":"accepted"}"#)
                        .await;
                    tokio::spawn(async move {
                        sleep(Duration::from_millis(20)).await;
                        for mut event in events {
                            if let Some(fields) = event.as_object_mut() {
                                fields.insert("id".to_string(), json!(message_id));
                            }
                            let _ = frames.send(Frame::Data(event.to_string()));
                        }
                    });
                }
                Some(InvokeScript::Status(status, reply)) => {
                    write_full(&mut socket, status, "application/json", &reply).await;
                }
                Some(InvokeScript::Hang) => hold_open(socket).await,
                Some(InvokeScript::Silent) | None => {
                    write_full(&mut socket, 202, "application/json", r#"{"status":"accepted"}"#)
                        .await;
                }
            }
        }
        _ => write_full(&mut socket, 404, "application/json", r#"{"error":"no route"}"#).await,
    }
}
