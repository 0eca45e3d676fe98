//! Codec client over hyper's low-level connection API.
//!
//! # Responsibilities
//! - Dial the host, handshake HTTP/1.1 or HTTP/2 and keep the connection open
//! - Turn encoded header maps into requests
//! - Feed responses back through the registered stream decoder
//! - Reset outstanding streams when the connection fails or is closed
//!
//! # Design Decisions
//! - One background task per connection; the client handle only enqueues
//!   commands, so `encode_headers` never blocks and never calls back
//! - The connection driver runs in its own task and is aborted on close
//! - When the peer closes the connection, in-flight exchanges are allowed
//!   to finish so a `connection: close` response is still delivered

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::{Body as _, Bytes, Incoming};
use hyper::client::conn::{http1, http2};
use hyper::header::{HOST, USER_AGENT};
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::net::ConnectionId;
use crate::stream::{
    CodecClient, CodecClientFactory, CodecProtocol, HeaderMap, Stream, StreamCallbacks,
    StreamDecoder, StreamEncoder, StreamResetReason, HEADER_HOST, HEADER_METHOD, HEADER_PATH,
    HEADER_STATUS,
};
use crate::upstream::{ConnectionSpec, CreateConnectionData, HostDescription};

const PROBE_USER_AGENT: &str = "upstream-health-check";

/// Errors raised while setting up a connection or request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),
}

/// Creates `HyperCodecClient`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperCodecClientFactory;

impl CodecClientFactory for HyperCodecClientFactory {
    fn create(&self, protocol: CodecProtocol, data: CreateConnectionData) -> Box<dyn CodecClient> {
        Box::new(HyperCodecClient::new(protocol, data))
    }
}

struct PendingStream {
    id: u64,
    headers: HeaderMap,
    decoder: Arc<dyn StreamDecoder>,
    callbacks: Vec<Arc<dyn StreamCallbacks>>,
}

impl PendingStream {
    fn reset(&self, reason: StreamResetReason) {
        reset_all(&self.callbacks, reason);
    }
}

fn reset_all(callbacks: &[Arc<dyn StreamCallbacks>], reason: StreamResetReason) {
    for cb in callbacks {
        cb.on_reset_stream(reason);
    }
}

enum Command {
    Send(PendingStream),
    Close,
}

/// Client handle for one probe connection.
pub struct HyperCodecClient {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<Command>,
    next_stream: u64,
    closed: bool,
}

impl HyperCodecClient {
    /// Start connecting in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(protocol: CodecProtocol, data: CreateConnectionData) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let id = data.connection.guard.id();
        tokio::spawn(run_connection(protocol, data, rx));
        Self {
            id,
            commands,
            next_stream: 0,
            closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl CodecClient for HyperCodecClient {
    fn new_stream(
        &mut self,
        _priority: u8,
        decoder: Arc<dyn StreamDecoder>,
    ) -> Box<dyn StreamEncoder> {
        self.next_stream += 1;
        Box::new(HyperStreamEncoder {
            id: self.next_stream,
            commands: self.commands.clone(),
            decoder,
            stream: HyperStream::default(),
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            tracing::trace!(connection_id = %self.id, "Closing codec client");
            let _ = self.commands.send(Command::Close);
        }
    }

    fn is_closed(&self) -> bool {
        // The connection task closes its receiver on exit.
        self.closed || self.commands.is_closed()
    }
}

impl Drop for HyperCodecClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct HyperStream {
    callbacks: Vec<Arc<dyn StreamCallbacks>>,
}

impl Stream for HyperStream {
    fn add_callbacks(&mut self, callbacks: Arc<dyn StreamCallbacks>) {
        self.callbacks.push(callbacks);
    }
}

struct HyperStreamEncoder {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    decoder: Arc<dyn StreamDecoder>,
    stream: HyperStream,
}

impl StreamEncoder for HyperStreamEncoder {
    fn stream(&mut self) -> &mut dyn Stream {
        &mut self.stream
    }

    fn encode_headers(&mut self, headers: HeaderMap, end_stream: bool) {
        if !end_stream {
            tracing::debug!(
                stream = self.id,
                "Request bodies are not supported, sending headers only"
            );
        }
        let pending = PendingStream {
            id: self.id,
            headers,
            decoder: self.decoder.clone(),
            callbacks: std::mem::take(&mut self.stream.callbacks),
        };
        if let Err(mpsc::error::SendError(Command::Send(pending))) =
            self.commands.send(Command::Send(pending))
        {
            // Connection task is gone; report the reset off this call stack.
            tokio::spawn(async move {
                pending.reset(StreamResetReason::ConnectionFailure);
            });
        }
    }
}

enum Sender {
    Http1(http1::SendRequest<Empty<Bytes>>),
    Http2(http2::SendRequest<Empty<Bytes>>),
}

type ResponseFuture = Pin<Box<dyn Future<Output = hyper::Result<Response<Incoming>>> + Send>>;

impl Sender {
    async fn ready(&mut self) -> hyper::Result<()> {
        match self {
            Sender::Http1(s) => s.ready().await,
            Sender::Http2(s) => s.ready().await,
        }
    }

    fn send(&mut self, request: Request<Empty<Bytes>>) -> ResponseFuture {
        match self {
            Sender::Http1(s) => Box::pin(s.send_request(request)),
            Sender::Http2(s) => Box::pin(s.send_request(request)),
        }
    }
}

async fn connect(
    protocol: CodecProtocol,
    addr: SocketAddr,
    timeout: Duration,
) -> Result<(Sender, JoinHandle<()>), TransportError> {
    let tcp = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(tcp)) => tcp,
        Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
        Err(_) => return Err(TransportError::ConnectTimeout { addr, timeout }),
    };
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!(host = %addr, error = %e, "Failed to set TCP_NODELAY");
    }
    let io = TokioIo::new(tcp);

    match protocol {
        CodecProtocol::Http1 => {
            let (sender, conn) = http1::handshake(io).await.map_err(TransportError::Handshake)?;
            let driver = tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "HTTP/1 connection ended with error");
                }
            });
            Ok((Sender::Http1(sender), driver))
        }
        CodecProtocol::Http2 => {
            let (sender, conn) = http2::handshake(TokioExecutor::new(), io)
                .await
                .map_err(TransportError::Handshake)?;
            let driver = tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "HTTP/2 connection ended with error");
                }
            });
            Ok((Sender::Http2(sender), driver))
        }
    }
}

fn build_request(
    protocol: CodecProtocol,
    headers: &HeaderMap,
) -> Result<Request<Empty<Bytes>>, TransportError> {
    let method = headers.get(HEADER_METHOD).map_or("GET", String::as_str);
    let path = headers.get(HEADER_PATH).map_or("/", String::as_str);
    let authority = headers.get(HEADER_HOST).map_or("localhost", String::as_str);

    let mut builder = Request::builder().method(method);
    builder = match protocol {
        CodecProtocol::Http1 => builder.uri(path).header(HOST, authority),
        CodecProtocol::Http2 => builder.uri(format!("http://{authority}{path}")),
    };
    builder = builder.header(USER_AGENT, PROBE_USER_AGENT);
    for (name, value) in headers.iter().filter(|(k, _)| !k.starts_with(':')) {
        builder = builder.header(name.as_str(), value.as_str());
    }

    Ok(builder.body(Empty::new())?)
}

fn to_header_map(headers: &hyper::HeaderMap) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

fn reset_reason(e: &hyper::Error) -> StreamResetReason {
    if e.is_canceled() || e.is_closed() || e.is_incomplete_message() {
        StreamResetReason::ConnectionTermination
    } else {
        StreamResetReason::RemoteReset
    }
}

/// Deliver one response to the stream's decoder.
async fn exchange(response: ResponseFuture, stream: PendingStream) {
    let response = match response.await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(stream = stream.id, error = %e, "Request failed");
            stream.reset(reset_reason(&e));
            return;
        }
    };

    let (parts, mut body) = response.into_parts();
    let mut headers = to_header_map(&parts.headers);
    headers.insert(HEADER_STATUS.to_string(), parts.status.as_u16().to_string());

    let end_stream = body.is_end_stream();
    stream.decoder.on_decode_headers(headers, end_stream);
    if end_stream {
        return;
    }

    loop {
        match body.frame().await {
            None => {
                stream.decoder.on_decode_data(Bytes::new(), true);
                return;
            }
            Some(Err(e)) => {
                tracing::debug!(stream = stream.id, error = %e, "Response body failed");
                stream.reset(reset_reason(&e));
                return;
            }
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => {
                    let end_stream = body.is_end_stream();
                    stream.decoder.on_decode_data(data, end_stream);
                    if end_stream {
                        return;
                    }
                }
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        stream.decoder.on_decode_trailers(to_header_map(&trailers));
                        return;
                    }
                }
            },
        }
    }
}

struct Exchanges {
    tasks: JoinSet<u64>,
    open: HashMap<u64, Vec<Arc<dyn StreamCallbacks>>>,
}

impl Exchanges {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            open: HashMap::new(),
        }
    }

    async fn dispatch(
        &mut self,
        sender: &mut Sender,
        protocol: CodecProtocol,
        stream: PendingStream,
    ) {
        let request = match build_request(protocol, &stream.headers) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(stream = stream.id, error = %e, "Dropping malformed probe request");
                stream.reset(StreamResetReason::LocalReset);
                return;
            }
        };
        if let Err(e) = sender.ready().await {
            tracing::debug!(stream = stream.id, error = %e, "Connection not ready");
            stream.reset(StreamResetReason::ConnectionTermination);
            return;
        }

        let id = stream.id;
        self.open.insert(id, stream.callbacks.clone());
        let response = sender.send(request);
        self.tasks.spawn(async move {
            exchange(response, stream).await;
            id
        });
    }

    fn finished(&mut self, joined: Result<u64, tokio::task::JoinError>) {
        if let Ok(id) = joined {
            self.open.remove(&id);
        }
    }

    /// Abort every exchange and reset its stream.
    fn abort(mut self, reason: StreamResetReason) {
        self.tasks.abort_all();
        for (_, callbacks) in self.open.drain() {
            reset_all(&callbacks, reason);
        }
    }

    /// Let running exchanges observe the dead connection on their own.
    async fn drain(mut self, reason: StreamResetReason) {
        while let Some(joined) = self.tasks.join_next().await {
            self.finished(joined);
        }
        self.abort(reason);
    }
}

async fn run_connection(
    protocol: CodecProtocol,
    data: CreateConnectionData,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let CreateConnectionData {
        connection,
        host_info,
    } = data;
    let ConnectionSpec {
        address,
        connect_timeout,
        guard,
    } = connection;
    let HostDescription { cluster, .. } = host_info;
    let connection_id = guard.id();

    let connecting = connect(protocol, address, connect_timeout);
    tokio::pin!(connecting);
    let mut queued = Vec::new();

    let (mut sender, mut driver) = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok(parts) => break parts,
                Err(e) => {
                    tracing::warn!(
                        cluster = %cluster,
                        host = %address,
                        connection_id = %connection_id,
                        error = %e,
                        "Probe connection failed"
                    );
                    fail_remaining(queued, &mut commands, StreamResetReason::ConnectionFailure);
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(stream)) => queued.push(stream),
                Some(Command::Close) | None => {
                    fail_remaining(queued, &mut commands, StreamResetReason::ConnectionTermination);
                    return;
                }
            },
        }
    };

    tracing::debug!(
        cluster = %cluster,
        host = %address,
        connection_id = %connection_id,
        protocol = %protocol,
        "Probe connection established"
    );

    let mut exchanges = Exchanges::new();
    for stream in queued {
        exchanges.dispatch(&mut sender, protocol, stream).await;
    }

    let peer_closed = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(stream)) => {
                    exchanges.dispatch(&mut sender, protocol, stream).await
                }
                Some(Command::Close) | None => break false,
            },
            Some(joined) = exchanges.tasks.join_next(), if !exchanges.tasks.is_empty() => {
                exchanges.finished(joined);
            }
            _ = &mut driver => break true,
        }
    };

    // No new streams from here on; `is_closed` turns true for the client.
    commands.close();
    if peer_closed {
        tracing::debug!(
            host = %address,
            connection_id = %connection_id,
            "Connection closed by peer"
        );
        drop(sender);
        exchanges.drain(StreamResetReason::ConnectionTermination).await;
    } else {
        drop(sender);
        driver.abort();
        exchanges.abort(StreamResetReason::ConnectionTermination);
    }
    fail_remaining(Vec::new(), &mut commands, StreamResetReason::ConnectionTermination);
    drop(guard);
}

/// Reset queued streams plus anything still waiting in the channel.
fn fail_remaining(
    queued: Vec<PendingStream>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    reason: StreamResetReason,
) {
    commands.close();
    for stream in queued {
        stream.reset(reason);
    }
    while let Ok(command) = commands.try_recv() {
        if let Command::Send(stream) = command {
            stream.reset(reason);
        }
    }
}
