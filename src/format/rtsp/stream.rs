//! The pull-mode RTSP stream engine.
//!
//! `RtspcStream` drives the whole session: connect, DESCRIBE/SETUP/PLAY
//! negotiation, the steady-state poll step that demultiplexes control
//! messages from interleaved media, and frame emission with normalized
//! timestamps.

use super::connection::{RtspConnection, DEFAULT_RTSP_PORT};
use super::demuxer::RtspDemuxer;
use super::message::{Method, RtspMessage, RtspRequest, RtspResponse, SessionHeader};
use super::sdp::SessionDescription;
use super::subscription::ResponseSubscriptions;
use crate::av::{CodecId, Frame, FrameSink, MediaType, Timebase, Track};
use crate::codec::Depacketizer;
use crate::error::RtspcError;
use crate::format::rtp::{AccessUnit, RtpSession};
use crate::Result;
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use url::Url;

/// Size of the receive buffer for one socket read
const RECEIVE_BUFFER_SIZE: usize = 65535;

/// Lifecycle of one stream instance. `Error` is terminal; rebuilding the
/// stream is the surrounding framework's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connected,
    Described,
    Playing,
    Stopping,
    Stopped,
    Error,
}

/// Outcome of one externally scheduled media-processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMediaResult {
    /// Items were consumed and the queues are drained
    Success,
    /// Nothing available right now; invoke again later
    TryAgain,
    /// The stream is broken and will not recover
    Failure,
}

/// Per-stream timeouts. The defaults match the 3000 ms the engine uses for
/// connect and for each handshake receive.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            response_timeout: Duration::from_millis(3000),
        }
    }
}

impl StreamConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Startup timing published when PLAY succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupMetrics {
    /// Time to establish the TCP connection
    pub origin_request_time: Duration,
    /// Time from connect to the last successful handshake response
    pub origin_response_time: Duration,
}

#[derive(Debug)]
struct TimestampState {
    last_raw: u32,
    accumulated: u64,
}

pub struct RtspcStream {
    state: State,
    config: StreamConfig,
    url_list: Vec<Url>,
    url: Url,
    content_base: Option<String>,
    session_id: Option<String>,
    cseq: u32,
    setup_complete: bool,
    connection: Option<RtspConnection>,
    demuxer: RtspDemuxer,
    subscriptions: ResponseSubscriptions,
    rtp_session: RtpSession,
    tracks: HashMap<u8, Track>,
    depacketizers: HashMap<u8, Depacketizer>,
    timestamps: HashMap<u8, TimestampState>,
    sink: Box<dyn FrameSink>,
    metrics: Option<StartupMetrics>,
    recv_buffer: Vec<u8>,
}

impl RtspcStream {
    /// Builds an idle stream from a candidate URL list. The first parseable
    /// URL becomes the current one for the life of the instance.
    pub fn new(urls: &[String], sink: Box<dyn FrameSink>) -> Result<Self> {
        Self::with_config(urls, sink, StreamConfig::default())
    }

    pub fn with_config(
        urls: &[String],
        sink: Box<dyn FrameSink>,
        config: StreamConfig,
    ) -> Result<Self> {
        let url_list: Vec<Url> = urls
            .iter()
            .filter_map(|u| match Url::parse(u) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Skipping unparsable url '{}': {}", u, e);
                    None
                }
            })
            .collect();

        let url = url_list
            .first()
            .cloned()
            .ok_or_else(|| RtspcError::Connection("no usable url in candidate list".into()))?;

        Ok(Self {
            state: State::Idle,
            config,
            url_list,
            url,
            content_base: None,
            session_id: None,
            cseq: 0,
            setup_complete: false,
            connection: None,
            demuxer: RtspDemuxer::new(),
            subscriptions: ResponseSubscriptions::new(),
            rtp_session: RtpSession::new(),
            tracks: HashMap::new(),
            depacketizers: HashMap::new(),
            timestamps: HashMap::new(),
            sink,
            metrics: None,
            recv_buffer: vec![0u8; RECEIVE_BUFFER_SIZE],
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn candidate_urls(&self) -> &[Url] {
        &self.url_list
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn tracks(&self) -> &HashMap<u8, Track> {
        &self.tracks
    }

    /// Available once `start()` succeeded; published (logged) on PLAY.
    pub fn startup_metrics(&self) -> Option<StartupMetrics> {
        self.metrics
    }

    /// Runs connect, DESCRIBE and every SETUP synchronously. Succeeds only
    /// if every step succeeds; any failure is terminal for this instance.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != State::Idle {
            return Err(RtspcError::Protocol(format!(
                "cannot start from state {:?}",
                self.state
            )));
        }

        let result = self.run_handshake().await;
        if result.is_err() {
            self.state = State::Error;
        }
        result
    }

    async fn run_handshake(&mut self) -> Result<()> {
        let started = Instant::now();
        self.connect().await?;
        let origin_request_time = started.elapsed();

        let handshake_started = Instant::now();
        self.request_describe().await?;
        self.request_setup().await?;
        let origin_response_time = handshake_started.elapsed();

        self.metrics = Some(StartupMetrics {
            origin_request_time,
            origin_response_time,
        });

        Ok(())
    }

    /// Issues PLAY and publishes the startup metrics. Valid only after
    /// every SETUP succeeded.
    pub async fn play(&mut self) -> Result<()> {
        let result = self.request_play().await;
        if result.is_err() {
            self.state = State::Error;
        }
        result
    }

    /// Idempotent. A no-op unless currently playing; when playing, one
    /// best-effort TEARDOWN whose failure is tolerated. Always converges on
    /// `Stopped`.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == State::Playing {
            if let Err(e) = self.request_teardown().await {
                warn!("TEARDOWN failed, terminating anyway: {}", e);
                self.state = State::Error;
            }
        }

        self.state = State::Stopped;
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        if self.url.scheme() != "rtsp" {
            return Err(RtspcError::Connection(format!(
                "the scheme is not rtsp: {}",
                self.url.scheme()
            )));
        }

        let host = self
            .url
            .host_str()
            .ok_or_else(|| RtspcError::Connection("no host in url".into()))?;
        let port = self.url.port().unwrap_or(DEFAULT_RTSP_PORT);

        info!("Connecting to rtsp origin {}:{}", host, port);
        let connection = RtspConnection::connect(host, port, self.config.connect_timeout).await?;
        self.connection = Some(connection);
        self.state = State::Connected;
        Ok(())
    }

    async fn request_describe(&mut self) -> Result<()> {
        if self.state != State::Connected {
            return Err(RtspcError::Protocol(format!(
                "DESCRIBE is not valid in state {:?}",
                self.state
            )));
        }

        let request = self
            .build_request(Method::Describe, self.url.as_str().to_string())
            .header("Accept", "application/sdp");
        let reply = self.send_and_receive(request).await?;

        self.content_base = reply
            .header("Content-Base")
            .map(|v| v.trim().to_string());

        let session = reply.header("Session").ok_or_else(|| {
            RtspcError::Protocol("no Session field in the DESCRIBE reply".into())
        })?;
        let session = SessionHeader::parse(session)?;
        // The session timeout is parsed but not yet acted upon.
        self.session_id = Some(session.id);

        if reply.body.is_empty() {
            return Err(RtspcError::Protocol("no SDP in the DESCRIBE reply".into()));
        }

        let body = std::str::from_utf8(&reply.body)
            .map_err(|_| RtspcError::Sdp("SDP body is not valid UTF-8".into()))?;
        let sdp = SessionDescription::parse(body)?;

        for media in &sdp.media {
            match media.media_type.as_str() {
                "video" => self.add_video_track(media).await?,
                "audio" => {
                    // Audio negotiation is not wired up yet.
                    debug!("Ignoring audio media section (format {})", media.format);
                }
                other => debug!("Ignoring media section of type '{}'", other),
            }
        }

        if self.tracks.is_empty() {
            // Audio-only origins still negotiate; the track set stays empty.
            debug!("No video track in SDP; continuing without media tracks");
        }

        self.state = State::Described;
        Ok(())
    }

    async fn add_video_track(&mut self, media: &super::sdp::MediaDescription) -> Result<()> {
        let rtpmap = media.rtpmap()?;

        let declared = media.payload_type()?;
        if declared != rtpmap.payload_type {
            return Err(RtspcError::Sdp(format!(
                "rtpmap payload type {} does not match media format {}",
                rtpmap.payload_type, declared
            )));
        }

        let codec = match rtpmap.encoding.to_ascii_uppercase().as_str() {
            "H264" => CodecId::H264,
            "VP8" => CodecId::Vp8,
            other => {
                return Err(RtspcError::Sdp(format!(
                    "unsupported video codec: {}",
                    other
                )));
            }
        };

        let control = media.control().ok_or_else(|| {
            RtspcError::Sdp(format!(
                "no control attribute in video section (format {})",
                media.format
            ))
        })?;
        let control_url = self.resolve_control_url(control);

        let payload_type = rtpmap.payload_type;
        if self.tracks.contains_key(&payload_type) {
            return Err(RtspcError::Sdp(format!(
                "duplicate payload type {} in SDP",
                payload_type
            )));
        }

        let track = Track {
            id: payload_type,
            media_type: MediaType::Video,
            codec,
            timebase: Timebase::new(1, rtpmap.clock_rate),
            control_url,
        };

        info!(
            "Adding video track: payload_type({}) codec({:?}) clock_rate({})",
            payload_type, codec, rtpmap.clock_rate
        );

        self.depacketizers
            .insert(payload_type, Depacketizer::new(codec));
        self.tracks.insert(payload_type, track.clone());
        self.sink.on_track(track).await;

        Ok(())
    }

    async fn request_setup(&mut self) -> Result<()> {
        if self.state != State::Described {
            return Err(RtspcError::Protocol(format!(
                "SETUP is not valid in state {:?}",
                self.state
            )));
        }

        // One SETUP per track, each at the track's own control url. The
        // channel pair is requested for protocol compliance; demultiplexing
        // keys on payload type, so the numbers are not recorded.
        let mut interleaved_channel = 0u16;

        let mut track_ids: Vec<u8> = self.tracks.keys().copied().collect();
        track_ids.sort_unstable();

        for id in track_ids {
            let control_url = self.tracks[&id].control_url.clone();
            let transport = format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                interleaved_channel,
                interleaved_channel + 1
            );
            interleaved_channel += 2;

            let request = self
                .build_request(Method::Setup, control_url)
                .header("Transport", &transport);
            self.send_and_receive(request).await?;
        }

        self.setup_complete = true;
        Ok(())
    }

    async fn request_play(&mut self) -> Result<()> {
        if self.state != State::Described || !self.setup_complete {
            return Err(RtspcError::Protocol(format!(
                "PLAY is not valid before setup completes (state {:?})",
                self.state
            )));
        }

        let request = self.build_request(Method::Play, self.url.as_str().to_string());
        self.send_and_receive(request).await?;

        self.state = State::Playing;

        if let Some(metrics) = self.metrics {
            info!(
                "Stream is playing: origin_request({} ms) origin_response({} ms)",
                metrics.origin_request_time.as_millis(),
                metrics.origin_response_time.as_millis()
            );
        }

        Ok(())
    }

    async fn request_teardown(&mut self) -> Result<()> {
        let request = self.build_request(Method::Teardown, self.url.as_str().to_string());
        self.send_and_receive(request).await?;
        self.state = State::Stopping;
        Ok(())
    }

    /// One externally scheduled media-processing step: a single non-blocking
    /// read, then a full drain of decoded messages and data blocks.
    pub async fn process_media(&mut self) -> ProcessMediaResult {
        match self.poll_and_drain().await {
            Ok(true) => ProcessMediaResult::Success,
            Ok(false) => ProcessMediaResult::TryAgain,
            Err(e) => {
                error!("Fatal error while processing media: {}", e);
                let _ = self.stop().await;
                self.state = State::Error;
                ProcessMediaResult::Failure
            }
        }
    }

    async fn poll_and_drain(&mut self) -> Result<bool> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| RtspcError::Connection("not connected".into()))?;

        if let Some(read) = connection.try_recv(&mut self.recv_buffer)? {
            self.demuxer.append(&self.recv_buffer[..read])?;
        }

        let mut progressed = false;
        loop {
            if let Some(message) = self.demuxer.pop_message() {
                progressed = true;
                self.route_message(message);
            } else if let Some(data) = self.demuxer.pop_data() {
                progressed = true;
                self.route_data(data.payload).await;
            } else {
                return Ok(progressed);
            }
        }
    }

    fn route_message(&mut self, message: RtspMessage) {
        match message {
            RtspMessage::Response(response) => {
                if !self.subscriptions.fulfill(response) {
                    // Probably a reply whose waiter already timed out.
                    warn!("Discarding response with no pending request");
                }
            }
            RtspMessage::Request { method, uri, .. } => {
                // No responder implemented for server-initiated requests.
                info!("Server request received: {} {}", method, uri);
            }
        }
    }

    async fn route_data(&mut self, payload: Bytes) {
        match self.rtp_session.on_data_received(&payload) {
            Ok(units) => {
                for unit in units {
                    self.on_rtp_frame_received(unit).await;
                }
            }
            Err(e) => warn!("Dropping undecodable interleaved payload: {}", e),
        }
    }

    async fn on_rtp_frame_received(&mut self, packets: AccessUnit) {
        let Some(first) = packets.first() else {
            return;
        };
        let payload_type = first.payload_type;
        let raw_timestamp = first.timestamp;

        let Some(track) = self.tracks.get(&payload_type) else {
            warn!("Could not find track: payload_type({})", payload_type);
            return;
        };
        let (track_id, media_type, timebase) = (track.id, track.media_type, track.timebase);

        let Some(depacketizer) = self.depacketizers.get_mut(&payload_type) else {
            warn!("Could not find depacketizer: payload_type({})", payload_type);
            return;
        };

        let payloads: Vec<Bytes> = packets.iter().map(|p| p.payload.clone()).collect();
        let bitstream = match depacketizer.depacketize(&payloads) {
            Ok(bitstream) => bitstream,
            Err(e) => {
                warn!(
                    "Could not depacketize frame: payload_type({}): {}",
                    payload_type, e
                );
                return;
            }
        };
        let format = depacketizer.bitstream_format();

        let timestamp = self.adjust_timestamp(payload_type, raw_timestamp);
        debug!(
            "Frame: payload_type({}) raw({}) adjusted({}) seconds({})",
            payload_type,
            raw_timestamp,
            timestamp,
            timestamp as f64 * timebase.expr()
        );

        let frame = Frame::new(track_id, media_type, bitstream, timestamp, format);
        self.sink.on_frame(frame).await;
    }

    /// Per-payload-type timestamp normalization. The first packet maps to 0;
    /// afterwards the unsigned 32-bit difference to the previous raw
    /// timestamp is accumulated into 64 bits. Regressions of more than half
    /// the 32-bit range are indistinguishable from forward jumps.
    fn adjust_timestamp(&mut self, payload_type: u8, raw: u32) -> u64 {
        match self.timestamps.get_mut(&payload_type) {
            None => {
                self.timestamps.insert(
                    payload_type,
                    TimestampState {
                        last_raw: raw,
                        accumulated: 0,
                    },
                );
                0
            }
            Some(state) => {
                let delta = raw.wrapping_sub(state.last_raw) as u64;
                state.last_raw = raw;
                state.accumulated += delta;
                state.accumulated
            }
        }
    }

    fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    fn build_request(&mut self, method: Method, uri: String) -> RtspRequest {
        let mut request = RtspRequest::new(method, self.next_cseq(), &uri);
        if method != Method::Describe {
            if let Some(session) = &self.session_id {
                request = request.header("Session", session);
            }
        }
        request
    }

    async fn send_and_receive(&mut self, request: RtspRequest) -> Result<RtspResponse> {
        let cseq = request.cseq();
        let method = request.method();

        // Register before transmitting so a fast reply cannot arrive
        // unroutable.
        let rx = self.subscriptions.subscribe(&request);

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| RtspcError::Connection("not connected".into()))?;
        connection.send(&request.to_bytes()).await?;

        let response = self
            .receive_response(cseq, rx, self.config.response_timeout)
            .await?;

        if response.status != 200 {
            return Err(RtspcError::Protocol(format!(
                "server rejected {} request: {}({})",
                method.as_str(),
                response.status,
                response.reason
            )));
        }

        Ok(response)
    }

    /// Awaits the reply for `cseq`. While playing, the reply arrives through
    /// the pending entry's completion channel, fed by the poll step; before
    /// playing, this caller owns the socket and reads directly, where any
    /// CSeq mismatch is a hard protocol error.
    async fn receive_response(
        &mut self,
        cseq: u32,
        mut rx: oneshot::Receiver<RtspResponse>,
        timeout: Duration,
    ) -> Result<RtspResponse> {
        let deadline = Instant::now() + timeout;

        if self.state == State::Playing {
            loop {
                match rx.try_recv() {
                    Ok(response) => return Ok(response),
                    Err(oneshot::error::TryRecvError::Empty) => {}
                    Err(oneshot::error::TryRecvError::Closed) => {
                        return Err(RtspcError::Protocol(format!(
                            "pending entry for CSeq {} vanished",
                            cseq
                        )));
                    }
                }

                if Instant::now() >= deadline {
                    self.subscriptions.unsubscribe(cseq);
                    return Err(RtspcError::Connection(format!(
                        "no response received (CSeq {})",
                        cseq
                    )));
                }

                // Drive one poll step ourselves; when an external scheduler
                // owns the socket this read simply sees no bytes and the
                // completion channel is filled from there.
                if !self.poll_and_drain().await? {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        } else {
            // This caller owns the socket; consume our own pending entry.
            self.subscriptions.unsubscribe(cseq);

            loop {
                if let Some(message) = self.demuxer.pop_message() {
                    return match message {
                        RtspMessage::Response(response) if response.cseq() == Some(cseq) => {
                            Ok(response)
                        }
                        RtspMessage::Response(response) => Err(RtspcError::Protocol(format!(
                            "unexpected CSeq {:?} (expected {})",
                            response.cseq(),
                            cseq
                        ))),
                        RtspMessage::Request { method, .. } => Err(RtspcError::Protocol(format!(
                            "unexpected {} request during handshake",
                            method
                        ))),
                    };
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(RtspcError::Connection(format!(
                        "no response received (CSeq {})",
                        cseq
                    )));
                }

                let connection = self
                    .connection
                    .as_mut()
                    .ok_or_else(|| RtspcError::Connection("not connected".into()))?;
                let read = connection
                    .recv_timeout(&mut self.recv_buffer, deadline - now)
                    .await?;
                self.demuxer.append(&self.recv_buffer[..read])?;
            }
        }
    }

    /// Resolves an SDP control attribute to an absolute URL: used as-is when
    /// it already carries the rtsp scheme, else joined with Content-Base,
    /// else joined with the request URL's path, carrying the query string.
    fn resolve_control_url(&self, control: &str) -> String {
        if control.len() >= 7 && control[..7].eq_ignore_ascii_case("rtsp://") {
            return control.to_string();
        }

        if let Some(base) = &self.content_base {
            return format!("{}/{}", base.trim_end_matches('/'), control);
        }

        let mut base = self.url.clone();
        base.set_query(None);
        let mut resolved = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            control
        );
        if let Some(query) = self.url.query() {
            resolved.push('?');
            resolved.push_str(query);
        }
        resolved
    }
}
