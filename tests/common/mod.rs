//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How the mock backend answers the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Respond and keep the connection open.
    Status(u16),
    /// Respond with `Connection: close`, then close the socket.
    StatusClose(u16),
    /// Respond, then close the socket if idle for this many milliseconds.
    StatusIdleClose(u16, u64),
    /// Respond with a chunked body sent in two writes.
    Chunked(u16),
    /// Read the request and never answer.
    Stall,
    /// Read the request and close the socket without answering.
    Hangup,
}

#[derive(Default)]
struct Stats {
    accepted: AtomicUsize,
    requests: AtomicUsize,
    open: AtomicUsize,
}

/// A raw-TCP HTTP/1.1 backend whose behaviour can be switched at runtime.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    reply: Arc<Mutex<Reply>>,
    stats: Arc<Stats>,
    last_request: Arc<Mutex<Option<String>>>,
}

impl MockBackend {
    pub async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = Self {
            addr: listener.local_addr().unwrap(),
            reply: Arc::new(Mutex::new(reply)),
            stats: Arc::new(Stats::default()),
            last_request: Arc::new(Mutex::new(None)),
        };

        let server = backend.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                server.stats.accepted.fetch_add(1, Ordering::SeqCst);
                server.stats.open.fetch_add(1, Ordering::SeqCst);
                let conn = server.clone();
                tokio::spawn(async move {
                    conn.serve(socket).await;
                    conn.stats.open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        backend
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.stats.accepted.load(Ordering::SeqCst)
    }

    /// Request heads received so far.
    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    /// Sockets the backend still considers open.
    pub fn open_sockets(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<String> {
        self.last_request.lock().unwrap().clone()
    }

    async fn serve(&self, mut socket: TcpStream) {
        let mut buf = Vec::new();
        let mut idle_limit = None;
        loop {
            let head = match idle_limit {
                Some(limit) => {
                    match tokio::time::timeout(limit, read_head(&mut socket, &mut buf)).await {
                        Ok(head) => head,
                        Err(_) => None,
                    }
                }
                None => read_head(&mut socket, &mut buf).await,
            };
            let Some(head) = head else {
                return;
            };
            self.stats.requests.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(head);

            let reply = *self.reply.lock().unwrap();
            match reply {
                Reply::Status(status) => {
                    if socket.write_all(response(status, false).as_bytes()).await.is_err() {
                        return;
                    }
                    idle_limit = None;
                }
                Reply::StatusIdleClose(status, idle_ms) => {
                    if socket.write_all(response(status, false).as_bytes()).await.is_err() {
                        return;
                    }
                    idle_limit = Some(Duration::from_millis(idle_ms));
                }
                Reply::Chunked(status) => {
                    let head = format!(
                        "HTTP/1.1 {status} {}\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nall\r\n",
                        reason(status)
                    );
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if socket.write_all(b"5\r\n good\r\n0\r\n\r\n").await.is_err() {
                        return;
                    }
                }
                Reply::StatusClose(status) => {
                    let _ = socket.write_all(response(status, true).as_bytes()).await;
                    let _ = socket.shutdown().await;
                    return;
                }
                Reply::Stall => {
                    // Hold the socket until the client gives up.
                    let mut sink = [0u8; 1024];
                    while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
                    return;
                }
                Reply::Hangup => return,
            }
        }
    }
}

/// Read one request head, leaving any pipelined bytes in `buf`.
async fn read_head(socket: &mut TcpStream, buf: &mut Vec<u8>) -> Option<String> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head: Vec<u8> = buf.drain(..end + 4).collect();
            return Some(String::from_utf8_lossy(&head).into_owned());
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn response(status: u16, close: bool) -> String {
    let reason = reason(status);
    let body = if status == 204 { "" } else { "ok" };
    let connection = if close { "Connection: close\r\n" } else { "" };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\n{connection}\r\n{body}",
        body.len()
    )
}

/// An HTTP/2 backend served by hyper, answering every request with `status`.
#[derive(Clone)]
pub struct H2Backend {
    pub addr: SocketAddr,
    status: Arc<AtomicU16>,
    stats: Arc<Stats>,
    last_authority: Arc<Mutex<Option<String>>>,
}

impl H2Backend {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = Self {
            addr: listener.local_addr().unwrap(),
            status: Arc::new(AtomicU16::new(status)),
            stats: Arc::new(Stats::default()),
            last_authority: Arc::new(Mutex::new(None)),
        };

        let server = backend.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                server.stats.accepted.fetch_add(1, Ordering::SeqCst);
                let conn = server.clone();
                tokio::spawn(async move {
                    let handler = conn.clone();
                    let service = service_fn(move |request: Request<Incoming>| {
                        let handler = handler.clone();
                        async move { Ok::<_, Infallible>(handler.answer(&request)) }
                    });
                    let _ = http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(socket), service)
                        .await;
                });
            }
        });

        backend
    }

    fn answer(&self, request: &Request<Incoming>) -> Response<Full<Bytes>> {
        self.stats.requests.fetch_add(1, Ordering::SeqCst);
        *self.last_authority.lock().unwrap() = request.uri().authority().map(|a| a.to_string());
        Response::builder()
            .status(self.status.load(Ordering::SeqCst))
            .body(Full::new(Bytes::from_static(b"ok")))
            .unwrap()
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> usize {
        self.stats.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    pub fn last_authority(&self) -> Option<String> {
        self.last_authority.lock().unwrap().clone()
    }
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Poll `check` until it holds or the deadline passes.
pub async fn eventually<F, Fut>(deadline: Duration, check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
