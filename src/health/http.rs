//! HTTP active health checking.
//!
//! # Responsibilities
//! - Own one host's probe connection, creating it lazily and reusing it
//! - Send a single `GET <path>` per cycle with the cluster name as host
//! - Classify the response and report it exactly once per cycle
//! - Tear the connection down on timeout, `connection: close` or reset
//!
//! # Probe Cycle
//! ```text
//! Idle ──on_interval──▶ Sent ──response complete──▶ Completed
//!                        │ ──unexpected reset──────▶ Reset
//!                        └ ──on_timeout────────────▶ TimedOut
//! ```
//!
//! # Design Decisions
//! - The transport holds per-cycle `ProbeStream` handles, not the session;
//!   events from an older cycle are ignored
//! - A reset that follows a close initiated here is expected and never reported
//! - The deadline is enforced by the scheduler, which also reports the timeout

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use hyper::body::Bytes;

use crate::config::HealthCheckConfig;
use crate::health::session::{ActiveSession, HealthChecker, OutcomeReporter};
use crate::health::state::FailureType;
use crate::stream::{
    header_value, CodecClient, CodecClientFactory, CodecProtocol, HeaderMap, StreamCallbacks,
    StreamDecoder, StreamResetReason, HEADER_HOST, HEADER_METHOD, HEADER_PATH, HEADER_STATUS,
};
use crate::upstream::{ClusterInfo, CreateConnectionData, Host};

/// HTTP health checker for one cluster.
pub struct HttpHealthChecker {
    cluster: Arc<ClusterInfo>,
    check_path: String,
    service_name: Option<String>,
    protocol: CodecProtocol,
    codecs: Arc<dyn CodecClientFactory>,
}

impl HttpHealthChecker {
    pub fn new(
        cluster: Arc<ClusterInfo>,
        config: &HealthCheckConfig,
        codecs: Arc<dyn CodecClientFactory>,
    ) -> Self {
        Self {
            cluster,
            check_path: config.path.clone(),
            service_name: config.service_name.clone().filter(|s| !s.is_empty()),
            protocol: config.protocol,
            codecs,
        }
    }

    pub fn check_path(&self) -> &str {
        &self.check_path
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    fn create_codec_client(&self, data: CreateConnectionData) -> Box<dyn CodecClient> {
        self.codecs.create(self.protocol, data)
    }

    fn probe_headers(&self) -> HeaderMap {
        HeaderMap::from([
            (HEADER_METHOD.to_string(), "GET".to_string()),
            (HEADER_HOST.to_string(), self.cluster.name().to_string()),
            (HEADER_PATH.to_string(), self.check_path.clone()),
        ])
    }
}

impl HealthChecker for HttpHealthChecker {
    fn new_session(
        self: Arc<Self>,
        host: Arc<dyn Host>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Arc<dyn ActiveSession> {
        HttpHealthCheckSession::new(self, host, reporter)
    }
}

/// Success unless a status header is present and parses to a number other
/// than 200. An unparsable status is treated as success.
fn is_health_check_succeeded(headers: Option<&HeaderMap>) -> bool {
    match headers.and_then(|h| h.get(HEADER_STATUS)) {
        Some(status) => status.parse::<i64>().map_or(true, |code| code == 200),
        None => true,
    }
}

fn wants_connection_close(headers: Option<&HeaderMap>) -> bool {
    headers
        .and_then(|h| header_value(h, "connection"))
        .is_some_and(|v| v.eq_ignore_ascii_case("close"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbePhase {
    Idle,
    Sent,
    Completed,
    Reset,
    TimedOut,
}

struct ProbeState {
    client: Option<Box<dyn CodecClient>>,
    response_headers: Option<HeaderMap>,
    /// Set when this session closed the connection itself.
    expect_reset: bool,
    /// A close was requested while `on_interval` had the client checked out.
    close_pending: bool,
    cycle: u64,
    phase: ProbePhase,
}

/// Probe session for a single host.
pub struct HttpHealthCheckSession {
    checker: Arc<HttpHealthChecker>,
    host: Arc<dyn Host>,
    reporter: Arc<dyn OutcomeReporter>,
    state: Mutex<ProbeState>,
    me: Weak<HttpHealthCheckSession>,
}

impl HttpHealthCheckSession {
    pub fn new(
        checker: Arc<HttpHealthChecker>,
        host: Arc<dyn Host>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            checker,
            host,
            reporter,
            state: Mutex::new(ProbeState {
                client: None,
                response_headers: None,
                expect_reset: false,
                close_pending: false,
                cycle: 0,
                phase: ProbePhase::Idle,
            }),
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a connection is held for reuse.
    pub fn has_connection(&self) -> bool {
        self.lock().client.is_some()
    }

    /// Send the probe for a new cycle.
    ///
    /// The caller must not invoke this while a previous probe is still in
    /// flight; the scheduler waits for an outcome or calls `on_timeout` first.
    pub fn on_interval(&self) {
        let (mut client, cycle, stale) = {
            let mut state = self.lock();
            if state.phase == ProbePhase::Sent {
                tracing::warn!(
                    host = %self.host.address(),
                    cycle = state.cycle,
                    "Probe still in flight at next interval, abandoning it"
                );
            }

            // A connection the peer closed while idle counts as absent.
            let (reusable, stale) = match state.client.take() {
                Some(client) if client.is_closed() => (None, Some(client)),
                held => (held, None),
            };
            let client = match reusable {
                Some(client) => client,
                None => {
                    let data = self.host.create_connection();
                    state.expect_reset = false;
                    self.checker.create_codec_client(data)
                }
            };
            state.cycle += 1;
            state.phase = ProbePhase::Sent;
            state.response_headers = None;
            state.close_pending = false;
            (client, state.cycle, stale)
        };

        if let Some(mut stale) = stale {
            tracing::debug!(
                host = %self.host.address(),
                "Held connection was closed, reconnecting"
            );
            stale.close();
        }

        let probe = Arc::new(ProbeStream {
            session: self.me.clone(),
            cycle,
        });
        let mut encoder = client.new_stream(0, probe.clone());
        encoder.stream().add_callbacks(probe);
        encoder.encode_headers(self.checker.probe_headers(), true);
        drop(encoder);

        tracing::debug!(
            host = %self.host.address(),
            cluster = %self.checker.cluster.name(),
            path = %self.checker.check_path,
            cycle,
            "Health check probe sent"
        );
        crate::observability::metrics::record_attempt(self.checker.cluster.name());

        let mut state = self.lock();
        if state.close_pending {
            state.close_pending = false;
            state.expect_reset = true;
            drop(state);
            client.close();
        } else {
            state.client = Some(client);
        }
    }

    /// Tear down the connection of a probe that missed its deadline.
    ///
    /// Reports nothing; the scheduler accounts for the timeout. Returns false,
    /// leaving the connection alone, when the cycle already ended with a
    /// reported outcome.
    pub fn on_timeout(&self) -> bool {
        let client = {
            let mut state = self.lock();
            if state.phase != ProbePhase::Sent {
                return false;
            }
            state.phase = ProbePhase::TimedOut;
            state.response_headers = None;
            Self::take_for_close(&mut state)
        };

        tracing::debug!(host = %self.host.address(), "Closing connection after probe timeout");
        if let Some(mut client) = client {
            client.close();
        }
        true
    }

    /// Close the held connection, if any, without affecting the cycle.
    pub fn close(&self) {
        let client = {
            let mut state = self.lock();
            state.expect_reset = true;
            state.client.take()
        };
        if let Some(mut client) = client {
            client.close();
        }
    }

    fn in_flight(&self, state: &ProbeState, cycle: u64) -> bool {
        if state.cycle == cycle && state.phase == ProbePhase::Sent {
            return true;
        }
        tracing::debug!(
            host = %self.host.address(),
            cycle,
            current = state.cycle,
            phase = ?state.phase,
            "Ignoring event for a probe that is no longer in flight"
        );
        false
    }

    /// Take the client for closing, or mark the close pending if it is checked out.
    fn take_for_close(state: &mut ProbeState) -> Option<Box<dyn CodecClient>> {
        state.expect_reset = true;
        match state.client.take() {
            Some(client) => Some(client),
            None => {
                state.close_pending = true;
                None
            }
        }
    }

    fn on_decode_headers(&self, cycle: u64, headers: HeaderMap, end_stream: bool) {
        {
            let mut state = self.lock();
            if !self.in_flight(&state, cycle) {
                return;
            }
            state.response_headers = Some(headers);
        }
        if end_stream {
            self.on_response_complete(cycle);
        }
    }

    fn on_decode_data(&self, cycle: u64, end_stream: bool) {
        if end_stream {
            self.on_response_complete(cycle);
        }
    }

    fn on_decode_trailers(&self, cycle: u64) {
        self.on_response_complete(cycle);
    }

    fn on_response_complete(&self, cycle: u64) {
        let (succeeded, status, to_close) = {
            let mut state = self.lock();
            if !self.in_flight(&state, cycle) {
                return;
            }
            state.phase = ProbePhase::Completed;

            let headers = state.response_headers.take();
            let succeeded = is_health_check_succeeded(headers.as_ref());
            let status = headers
                .as_ref()
                .and_then(|h| h.get(HEADER_STATUS))
                .cloned();
            let to_close = if wants_connection_close(headers.as_ref()) {
                Self::take_for_close(&mut state)
            } else {
                None
            };
            (succeeded, status, to_close)
        };

        tracing::debug!(
            host = %self.host.address(),
            cycle,
            status = status.as_deref().unwrap_or("-"),
            succeeded,
            "Health check response complete"
        );

        if succeeded {
            self.reporter.handle_success();
        } else {
            self.reporter.handle_failure(FailureType::Active);
        }

        if let Some(mut client) = to_close {
            tracing::debug!(host = %self.host.address(), "Upstream asked to close the connection");
            client.close();
        }
    }

    fn on_reset_stream(&self, cycle: u64, reason: StreamResetReason) {
        let to_close = {
            let mut state = self.lock();
            if state.expect_reset {
                tracing::debug!(
                    host = %self.host.address(),
                    reason = %reason,
                    "Ignoring reset of a connection closed by the health checker"
                );
                return;
            }
            if !self.in_flight(&state, cycle) {
                return;
            }
            state.phase = ProbePhase::Reset;
            state.response_headers = None;
            Self::take_for_close(&mut state)
        };

        tracing::debug!(host = %self.host.address(), cycle, reason = %reason, "Probe stream reset");
        self.reporter.handle_failure(FailureType::Network);

        if let Some(mut client) = to_close {
            client.close();
        }
    }
}

impl ActiveSession for HttpHealthCheckSession {
    fn on_interval(&self) {
        HttpHealthCheckSession::on_interval(self)
    }

    fn on_timeout(&self) -> bool {
        HttpHealthCheckSession::on_timeout(self)
    }

    fn close(&self) {
        HttpHealthCheckSession::close(self)
    }
}

/// Callback target registered with the transport for one probe cycle.
struct ProbeStream {
    session: Weak<HttpHealthCheckSession>,
    cycle: u64,
}

impl StreamDecoder for ProbeStream {
    fn on_decode_headers(&self, headers: HeaderMap, end_stream: bool) {
        if let Some(session) = self.session.upgrade() {
            session.on_decode_headers(self.cycle, headers, end_stream);
        }
    }

    fn on_decode_data(&self, _data: Bytes, end_stream: bool) {
        if let Some(session) = self.session.upgrade() {
            session.on_decode_data(self.cycle, end_stream);
        }
    }

    fn on_decode_trailers(&self, _trailers: HeaderMap) {
        if let Some(session) = self.session.upgrade() {
            session.on_decode_trailers(self.cycle);
        }
    }
}

impl StreamCallbacks for ProbeStream {
    fn on_reset_stream(&self, reason: StreamResetReason) {
        if let Some(session) = self.session.upgrade() {
            session.on_reset_stream(self.cycle, reason);
        }
    }

    fn on_above_write_buffer_high_watermark(&self) {}

    fn on_below_write_buffer_low_watermark(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::session::ProbeOutcome;
    use crate::stream::{Stream, StreamEncoder};
    use crate::upstream::UpstreamHost;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordedStream {
        connection: usize,
        headers: HeaderMap,
        end_stream: bool,
        decoder: Arc<dyn StreamDecoder>,
        callbacks: Vec<Arc<dyn StreamCallbacks>>,
    }

    /// In-memory transport recording every stream and close.
    #[derive(Default)]
    struct Transport {
        connections: AtomicUsize,
        closes: AtomicUsize,
        reset_on_close: AtomicBool,
        /// Connections the peer has hung up on.
        peer_closed: Mutex<Vec<usize>>,
        streams: Mutex<Vec<RecordedStream>>,
    }

    impl Transport {
        fn stream(&self, index: usize) -> (Arc<dyn StreamDecoder>, Arc<dyn StreamCallbacks>) {
            let streams = self.streams.lock().unwrap();
            let s = &streams[index];
            (s.decoder.clone(), s.callbacks[0].clone())
        }

        fn last(&self) -> (Arc<dyn StreamDecoder>, Arc<dyn StreamCallbacks>) {
            let len = self.streams.lock().unwrap().len();
            self.stream(len - 1)
        }

        fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        fn last_connection(&self) -> usize {
            self.streams.lock().unwrap().last().map_or(usize::MAX, |s| s.connection)
        }

        fn hang_up(&self, connection: usize) {
            self.peer_closed.lock().unwrap().push(connection);
        }
    }

    struct MockFactory(Arc<Transport>);

    impl CodecClientFactory for MockFactory {
        fn create(
            &self,
            _protocol: CodecProtocol,
            data: CreateConnectionData,
        ) -> Box<dyn CodecClient> {
            let id = self.0.connections.fetch_add(1, Ordering::SeqCst);
            Box::new(MockClient {
                id,
                transport: self.0.clone(),
                _data: data,
            })
        }
    }

    struct MockClient {
        id: usize,
        transport: Arc<Transport>,
        _data: CreateConnectionData,
    }

    impl CodecClient for MockClient {
        fn new_stream(
            &mut self,
            _priority: u8,
            decoder: Arc<dyn StreamDecoder>,
        ) -> Box<dyn StreamEncoder> {
            Box::new(MockEncoder {
                connection: self.id,
                transport: self.transport.clone(),
                decoder,
                stream: MockStream::default(),
            })
        }

        fn close(&mut self) {
            self.transport.closes.fetch_add(1, Ordering::SeqCst);
            if self.transport.reset_on_close.load(Ordering::SeqCst) {
                let callbacks: Vec<_> = self
                    .transport
                    .streams
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|s| s.connection == self.id)
                    .flat_map(|s| s.callbacks.clone())
                    .collect();
                for cb in callbacks {
                    cb.on_reset_stream(StreamResetReason::ConnectionTermination);
                }
            }
        }

        fn is_closed(&self) -> bool {
            self.transport.peer_closed.lock().unwrap().contains(&self.id)
        }
    }

    #[derive(Default)]
    struct MockStream {
        callbacks: Vec<Arc<dyn StreamCallbacks>>,
    }

    impl Stream for MockStream {
        fn add_callbacks(&mut self, callbacks: Arc<dyn StreamCallbacks>) {
            self.callbacks.push(callbacks);
        }
    }

    struct MockEncoder {
        connection: usize,
        transport: Arc<Transport>,
        decoder: Arc<dyn StreamDecoder>,
        stream: MockStream,
    }

    impl StreamEncoder for MockEncoder {
        fn stream(&mut self) -> &mut dyn Stream {
            &mut self.stream
        }

        fn encode_headers(&mut self, headers: HeaderMap, end_stream: bool) {
            self.transport.streams.lock().unwrap().push(RecordedStream {
                connection: self.connection,
                headers,
                end_stream,
                decoder: self.decoder.clone(),
                callbacks: std::mem::take(&mut self.stream.callbacks),
            });
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        outcomes: Mutex<Vec<ProbeOutcome>>,
    }

    impl RecordingReporter {
        fn outcomes(&self) -> Vec<ProbeOutcome> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    impl OutcomeReporter for RecordingReporter {
        fn handle_success(&self) {
            self.outcomes.lock().unwrap().push(ProbeOutcome::Success);
        }

        fn handle_failure(&self, reason: FailureType) {
            self.outcomes.lock().unwrap().push(ProbeOutcome::Failure(reason));
        }
    }

    struct Harness {
        transport: Arc<Transport>,
        host: Arc<UpstreamHost>,
        reporter: Arc<RecordingReporter>,
        session: Arc<HttpHealthCheckSession>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(Transport::default());
        let cluster = Arc::new(ClusterInfo::new("web"));
        let checker = Arc::new(HttpHealthChecker::new(
            cluster.clone(),
            &HealthCheckConfig::default(),
            Arc::new(MockFactory(transport.clone())),
        ));
        let host = Arc::new(UpstreamHost::new(
            "127.0.0.1:3000".parse().unwrap(),
            cluster,
            Duration::from_secs(1),
        ));
        let reporter = Arc::new(RecordingReporter::default());
        let session = HttpHealthCheckSession::new(checker, host.clone(), reporter.clone());
        Harness {
            transport,
            host,
            reporter,
            session,
        }
    }

    fn response(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const OK: &[(&str, &str)] = &[(":status", "200")];

    #[test]
    fn probe_is_a_bodyless_get_to_the_check_path() {
        let h = harness();
        h.session.on_interval();

        let streams = h.transport.streams.lock().unwrap();
        assert_eq!(streams.len(), 1);
        assert!(streams[0].end_stream);
        assert_eq!(streams[0].headers[HEADER_METHOD], "GET");
        assert_eq!(streams[0].headers[HEADER_HOST], "web");
        assert_eq!(streams[0].headers[HEADER_PATH], "/health");
        assert_eq!(streams[0].callbacks.len(), 1);
        assert_eq!(h.transport.connections(), 1);
        assert_eq!(h.host.open_connections(), 1);
    }

    #[test]
    fn status_200_succeeds_and_keeps_connection() {
        let h = harness();
        h.session.on_interval();
        let (decoder, _) = h.transport.last();
        decoder.on_decode_headers(response(OK), true);

        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
        assert!(h.session.has_connection());
        assert_eq!(h.transport.closes(), 0);

        h.session.on_interval();
        assert_eq!(h.transport.connections(), 1, "connection is reused");
        assert_eq!(h.transport.streams.lock().unwrap()[1].connection, 0);
    }

    #[test]
    fn non_200_with_connection_close_fails_and_drops_connection() {
        let h = harness();
        h.session.on_interval();
        h.transport.last().0.on_decode_headers(response(OK), true);

        h.session.on_interval();
        h.transport
            .last()
            .0
            .on_decode_headers(response(&[(":status", "503"), ("connection", "close")]), true);

        assert_eq!(
            h.reporter.outcomes(),
            vec![ProbeOutcome::Success, ProbeOutcome::Failure(FailureType::Active)]
        );
        assert!(!h.session.has_connection());
        assert_eq!(h.transport.closes(), 1);
        assert_eq!(h.host.open_connections(), 0);

        h.session.on_interval();
        assert_eq!(h.transport.connections(), 2, "next interval dials again");
    }

    #[test]
    fn missing_status_counts_as_success() {
        let h = harness();
        h.session.on_interval();
        h.transport.last().0.on_decode_headers(HeaderMap::new(), true);

        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
    }

    #[test]
    fn unparsable_status_counts_as_success() {
        // Only a status that parses to a number other than 200 is a failure.
        let h = harness();
        h.session.on_interval();
        h.transport
            .last()
            .0
            .on_decode_headers(response(&[(":status", "2OO")]), true);

        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
    }

    #[test]
    fn other_2xx_is_an_active_failure() {
        let h = harness();
        h.session.on_interval();
        h.transport
            .last()
            .0
            .on_decode_headers(response(&[(":status", "204")]), true);

        assert_eq!(
            h.reporter.outcomes(),
            vec![ProbeOutcome::Failure(FailureType::Active)]
        );
        assert!(h.session.has_connection());
    }

    #[test]
    fn connection_close_matches_any_case() {
        let h = harness();
        h.session.on_interval();
        h.transport
            .last()
            .0
            .on_decode_headers(response(&[(":status", "200"), ("Connection", "CLOSE")]), true);

        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
        assert!(!h.session.has_connection());
    }

    #[test]
    fn keep_alive_connection_is_retained() {
        let h = harness();
        h.session.on_interval();
        h.transport
            .last()
            .0
            .on_decode_headers(response(&[(":status", "200"), ("connection", "keep-alive")]), true);

        assert!(h.session.has_connection());
        assert_eq!(h.transport.closes(), 0);
    }

    #[test]
    fn body_completes_on_final_data_frame() {
        let h = harness();
        h.session.on_interval();
        let (decoder, _) = h.transport.last();

        decoder.on_decode_headers(response(&[(":status", "500")]), false);
        decoder.on_decode_data(Bytes::from_static(b"down"), false);
        assert!(h.reporter.outcomes().is_empty());

        decoder.on_decode_data(Bytes::new(), true);
        assert_eq!(
            h.reporter.outcomes(),
            vec![ProbeOutcome::Failure(FailureType::Active)]
        );
    }

    #[test]
    fn trailers_complete_the_response() {
        let h = harness();
        h.session.on_interval();
        let (decoder, _) = h.transport.last();

        decoder.on_decode_headers(response(OK), false);
        decoder.on_decode_data(Bytes::from_static(b"ok"), false);
        decoder.on_decode_trailers(response(&[("grpc-status", "0")]));

        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
    }

    #[test]
    fn exactly_one_report_per_cycle() {
        let h = harness();
        h.session.on_interval();
        let (decoder, callbacks) = h.transport.last();

        decoder.on_decode_headers(response(OK), true);
        decoder.on_decode_data(Bytes::new(), true);
        decoder.on_decode_trailers(HeaderMap::new());
        callbacks.on_reset_stream(StreamResetReason::RemoteReset);

        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
    }

    #[test]
    fn reset_after_timeout_is_swallowed() {
        let h = harness();
        h.session.on_interval();
        let (_, callbacks) = h.transport.last();

        h.session.on_timeout();
        assert_eq!(h.transport.closes(), 1);
        assert!(!h.session.has_connection());
        assert_eq!(h.host.open_connections(), 0);

        callbacks.on_reset_stream(StreamResetReason::ConnectionTermination);
        assert!(h.reporter.outcomes().is_empty());
    }

    #[test]
    fn timeout_reports_whether_the_cycle_was_in_flight() {
        let h = harness();
        h.session.on_interval();
        assert!(h.session.on_timeout());
        assert!(!h.session.on_timeout());
        assert_eq!(h.transport.closes(), 1);
    }

    #[test]
    fn timeout_after_response_leaves_connection_alone() {
        let h = harness();
        h.session.on_interval();
        h.transport.last().0.on_decode_headers(response(OK), true);

        assert!(!h.session.on_timeout());
        assert!(h.session.has_connection());
        assert_eq!(h.transport.closes(), 0);
        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
    }

    #[test]
    fn connection_closed_while_idle_is_replaced() {
        let h = harness();
        h.session.on_interval();
        h.transport.last().0.on_decode_headers(response(OK), true);

        h.transport.hang_up(0);
        h.session.on_interval();
        assert_eq!(h.transport.connections(), 2);
        assert_eq!(h.transport.closes(), 1);
        assert_eq!(h.transport.last_connection(), 1);

        h.transport.last().0.on_decode_headers(response(OK), true);
        assert_eq!(
            h.reporter.outcomes(),
            vec![ProbeOutcome::Success, ProbeOutcome::Success]
        );
        assert_eq!(h.host.open_connections(), 1);
    }

    #[test]
    fn late_events_from_a_timed_out_cycle_are_ignored() {
        let h = harness();
        h.session.on_interval();
        let (old_decoder, old_callbacks) = h.transport.last();
        h.session.on_timeout();

        h.session.on_interval();
        assert_eq!(h.transport.connections(), 2);

        old_decoder.on_decode_headers(response(OK), true);
        old_callbacks.on_reset_stream(StreamResetReason::ConnectionTermination);
        assert!(h.reporter.outcomes().is_empty());

        h.transport
            .last()
            .1
            .on_reset_stream(StreamResetReason::RemoteReset);
        assert_eq!(
            h.reporter.outcomes(),
            vec![ProbeOutcome::Failure(FailureType::Network)]
        );
    }

    #[test]
    fn unexpected_reset_is_one_network_failure() {
        let h = harness();
        h.session.on_interval();
        let (_, callbacks) = h.transport.last();

        callbacks.on_reset_stream(StreamResetReason::RemoteReset);
        callbacks.on_reset_stream(StreamResetReason::RemoteReset);

        assert_eq!(
            h.reporter.outcomes(),
            vec![ProbeOutcome::Failure(FailureType::Network)]
        );
        assert!(!h.session.has_connection());
        assert_eq!(h.transport.closes(), 1);

        h.session.on_interval();
        assert_eq!(h.transport.connections(), 2);
    }

    #[test]
    fn synchronous_reset_during_close_is_swallowed() {
        let h = harness();
        h.transport.reset_on_close.store(true, Ordering::SeqCst);

        h.session.on_interval();
        h.session.on_timeout();
        assert!(h.reporter.outcomes().is_empty());

        h.session.on_interval();
        h.transport
            .last()
            .0
            .on_decode_headers(response(&[(":status", "200"), ("connection", "close")]), true);
        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
        assert_eq!(h.transport.closes(), 2);
    }

    #[test]
    fn watermark_callbacks_do_nothing() {
        let h = harness();
        h.session.on_interval();
        let (_, callbacks) = h.transport.last();

        callbacks.on_above_write_buffer_high_watermark();
        callbacks.on_below_write_buffer_low_watermark();
        assert!(h.reporter.outcomes().is_empty());
        assert!(h.session.has_connection());
    }

    #[test]
    fn callbacks_after_session_drop_are_harmless() {
        let h = harness();
        h.session.on_interval();
        let (decoder, callbacks) = h.transport.last();
        drop(h.session);

        decoder.on_decode_headers(response(OK), true);
        callbacks.on_reset_stream(StreamResetReason::RemoteReset);
        assert!(h.reporter.outcomes().is_empty());
    }

    #[test]
    fn close_releases_connection_without_reporting() {
        let h = harness();
        h.session.on_interval();
        h.transport.last().0.on_decode_headers(response(OK), true);

        h.session.close();
        assert!(!h.session.has_connection());
        assert_eq!(h.host.open_connections(), 0);
        assert_eq!(h.reporter.outcomes(), vec![ProbeOutcome::Success]);
    }

    #[test]
    fn empty_service_name_is_ignored() {
        let mut config = HealthCheckConfig::default();
        config.service_name = Some(String::new());
        let checker = HttpHealthChecker::new(
            Arc::new(ClusterInfo::new("web")),
            &config,
            Arc::new(MockFactory(Arc::default())),
        );
        assert_eq!(checker.service_name(), None);
        assert_eq!(checker.check_path(), "/health");
    }
}
