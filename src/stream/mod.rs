//! Stream layer contract.
//!
//! # Data Flow
//! ```text
//! CreateConnectionData (from a Host)
//!     → CodecClientFactory::create(protocol, data) → CodecClient
//!     → CodecClient::new_stream(priority, decoder) → StreamEncoder
//!     → StreamEncoder::stream().add_callbacks(callbacks)
//!     → StreamEncoder::encode_headers(request, end_stream)
//!
//! Transport events (asynchronous):
//!     → StreamDecoder::on_decode_headers / on_decode_data / on_decode_trailers
//!     → StreamCallbacks::on_reset_stream
//! ```
//!
//! # Design Decisions
//! - Callback targets are registered as `Arc<dyn ...>`; transports never own the
//!   component behind them, only a handle to it
//! - Decode and reset callbacks are never invoked from inside `new_stream` or
//!   `encode_headers`; `close` may reset outstanding streams synchronously
//! - Headers are a flat name → value map; HTTP/2 style pseudo-headers carry the
//!   request line and response status

pub mod hyper_client;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hyper::body::Bytes;
use serde::{Deserialize, Serialize};

use crate::upstream::CreateConnectionData;

/// Header set exchanged with the codec.
pub type HeaderMap = HashMap<String, String>;

pub const HEADER_METHOD: &str = ":method";
pub const HEADER_PATH: &str = ":path";
pub const HEADER_HOST: &str = ":authority";
pub const HEADER_STATUS: &str = ":status";

/// Wire protocol spoken by a codec client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecProtocol {
    #[default]
    Http1,
    Http2,
}

impl fmt::Display for CodecProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecProtocol::Http1 => write!(f, "http1"),
            CodecProtocol::Http2 => write!(f, "http2"),
        }
    }
}

/// Why a stream was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamResetReason {
    /// The connection could not be established.
    ConnectionFailure,
    /// The connection was closed while the stream was open.
    ConnectionTermination,
    /// Reset by this side.
    LocalReset,
    /// Reset by the peer or a protocol error.
    RemoteReset,
}

impl fmt::Display for StreamResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamResetReason::ConnectionFailure => "connection_failure",
            StreamResetReason::ConnectionTermination => "connection_termination",
            StreamResetReason::LocalReset => "local_reset",
            StreamResetReason::RemoteReset => "remote_reset",
        };
        f.write_str(s)
    }
}

/// Receives the decoded response of a stream.
pub trait StreamDecoder: Send + Sync {
    fn on_decode_headers(&self, headers: HeaderMap, end_stream: bool);

    fn on_decode_data(&self, data: Bytes, end_stream: bool);

    /// Trailers always end the stream.
    fn on_decode_trailers(&self, trailers: HeaderMap);
}

/// Receives stream lifecycle events.
pub trait StreamCallbacks: Send + Sync {
    fn on_reset_stream(&self, reason: StreamResetReason);

    fn on_above_write_buffer_high_watermark(&self);

    fn on_below_write_buffer_low_watermark(&self);
}

/// A single request/response exchange.
pub trait Stream {
    fn add_callbacks(&mut self, callbacks: Arc<dyn StreamCallbacks>);
}

/// Request side of a stream.
pub trait StreamEncoder: Send {
    fn stream(&mut self) -> &mut dyn Stream;

    fn encode_headers(&mut self, headers: HeaderMap, end_stream: bool);
}

/// A client connection able to carry request streams.
pub trait CodecClient: Send {
    fn new_stream(&mut self, priority: u8, decoder: Arc<dyn StreamDecoder>)
        -> Box<dyn StreamEncoder>;

    /// Close the underlying connection. Outstanding streams are reset.
    fn close(&mut self);

    /// True once the connection has ended and can carry no new stream.
    fn is_closed(&self) -> bool;
}

/// Builds codec clients over freshly created host connections.
pub trait CodecClientFactory: Send + Sync {
    fn create(&self, protocol: CodecProtocol, data: CreateConnectionData) -> Box<dyn CodecClient>;
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
