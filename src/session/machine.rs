//! Per-connection RTMP session
//!
//! A [`Session`] consumes socket reads in order: handshake bytes first,
//! then the chunk stream. Reassembled messages are dispatched to the
//! command, data and media handlers below. Everything the session writes
//! goes through its own bounded outbound queue; media for other sessions
//! goes through the registry's fan-out targets.

use std::time::Instant;

use bytes::Bytes;

use crate::amf::AmfValue;
use crate::error::{Error, Result};
use crate::protocol::chunk::{to_bytes, ChunkMessage};
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakePhase};
use crate::protocol::message::{self, Command, RtmpMessage};
use crate::protocol::ChunkCodec;
use crate::registry::FanoutTarget;
use crate::server::handler::{AuthResult, Event};

use super::context::SessionContext;
use super::state::{original_stream_path, stream_path, PlayStatus, SessionPhase, SessionState};
use super::stream::StreamCache;

/// Offset of the message stream id in a serialized fmt 0 chunk with a
/// one-byte basic header
const STREAM_ID_OFFSET: usize = 8;

/// One connection's protocol state machine
#[derive(Debug)]
pub struct Session {
    ctx: SessionContext,
    state: SessionState,
    handshake: Handshake,
    codec: ChunkCodec,
    cache: StreamCache,
    ping_started: bool,
}

impl Session {
    pub fn new(ctx: SessionContext) -> Self {
        let state = SessionState::new(ctx.session_id, ctx.peer_addr);
        Self {
            ctx,
            state,
            handshake: Handshake::new(),
            codec: ChunkCodec::new(),
            cache: StreamCache::default(),
            ping_started: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    /// True once C2 has been received
    pub fn handshake_done(&self) -> bool {
        self.handshake.is_done()
    }

    /// Process one socket read
    pub async fn feed(&mut self, data: &[u8]) -> Result<()> {
        if self.state.phase == SessionPhase::Closed {
            return Err(Error::ConnectionClosed);
        }

        let mut data = data;
        if !self.handshake.is_done() {
            let progress = self.handshake.process(data)?;
            if let Some(response) = progress.response {
                self.write(response).await?;
            }
            self.state.phase = match self.handshake.phase() {
                HandshakePhase::None => SessionPhase::None,
                HandshakePhase::S0 => SessionPhase::HandshakeS0,
                HandshakePhase::S1 => SessionPhase::HandshakeS1,
                HandshakePhase::S2 => SessionPhase::HandshakeS2,
            };
            if self.handshake.is_done() {
                tracing::debug!(
                    session_id = self.state.id,
                    version = self.handshake.client_version(),
                    "Handshake complete"
                );
            }

            data = &data[progress.consumed..];
            if data.is_empty() {
                return Ok(());
            }
        }

        self.read_chunks(data).await
    }

    async fn read_chunks(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        loop {
            let outcome = self.codec.read(data, offset, data.len() - offset);
            self.dispatch_ready().await?;

            match outcome.resume_offset {
                Some(next) if !outcome.done => offset = next,
                _ => break,
            }
        }
        if self.state.phase == SessionPhase::Closed {
            return Ok(());
        }

        if let Some(sequence) = self.state.add_bytes_received(data.len()) {
            self.send(message::acknowledgement(sequence)).await?;
        }
        self.codec.clear_dispatched_duplicates();
        Ok(())
    }

    async fn dispatch_ready(&mut self) -> Result<()> {
        for chunk in self.codec.take_ready() {
            match self.state.phase {
                SessionPhase::Closed => break,
                SessionPhase::HandshakeS2 => self.state.phase = SessionPhase::Streaming,
                _ => {}
            }

            let message = match RtmpMessage::from_chunk(&chunk) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(session_id = self.state.id, error = %e, "Skipping malformed message");
                    continue;
                }
            };

            match message {
                RtmpMessage::SetChunkSize(size) => {
                    tracing::debug!(session_id = self.state.id, size = size, "Peer chunk size");
                    self.codec.set_in_chunk_size(size);
                }
                RtmpMessage::Abort { csid } => self.codec.abort(csid),
                RtmpMessage::WindowAckSize(size) => self.state.set_window_ack_size(size),
                RtmpMessage::Acknowledgement { .. }
                | RtmpMessage::UserControl(_)
                | RtmpMessage::SetPeerBandwidth { .. } => {}
                RtmpMessage::Command(cmd) => self.handle_command(cmd).await?,
                RtmpMessage::Data(values) => self.handle_data(values).await?,
                RtmpMessage::Audio(payload) => self.handle_audio(payload, chunk.timer).await?,
                RtmpMessage::Video(payload) => self.handle_video(payload, chunk.timer).await?,
                RtmpMessage::Unknown { type_id } => {
                    tracing::trace!(session_id = self.state.id, type_id = type_id, "Skipping message");
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        tracing::debug!(session_id = self.state.id, command = %cmd.name, "Command");

        match cmd.name.as_str() {
            CMD_CONNECT => self.on_connect(&cmd).await,
            CMD_CREATE_STREAM => self.send(message::create_stream_result(cmd.transaction_id, 1)).await,
            CMD_PUBLISH => self.on_publish(&cmd).await,
            CMD_PLAY => self.on_play(&cmd).await,
            CMD_PAUSE => self.on_pause(&cmd).await,
            CMD_DELETE_STREAM => {
                let stream_id = cmd.arg(0).and_then(|v| v.as_number()).unwrap_or(0.0) as u32;
                self.on_delete_stream(stream_id).await
            }
            CMD_CLOSE_STREAM => self.on_delete_stream(self.state.publish.stream_id).await,
            // releaseStream, FCPublish and anything unknown
            _ => Ok(()),
        }
    }

    async fn on_connect(&mut self, cmd: &Command) -> Result<()> {
        let app = cmd.command_object.get_string("app").unwrap_or_default().to_string();
        self.ctx.notify(Event::ConnectAttempt {
            session_id: self.state.id,
            app: app.clone(),
        });

        self.state.app = app.clone();
        self.state.object_encoding = cmd.command_object.get_number("objectEncoding").unwrap_or(0.0);
        self.state.connect_started_at = Some(Instant::now());

        let config = &self.ctx.config;
        let (window, bandwidth, chunk_size) = (config.window_ack_size, config.peer_bandwidth, config.chunk_size);
        self.send(message::window_ack_size(window)).await?;
        self.send(message::set_peer_bandwidth(bandwidth, BANDWIDTH_LIMIT_DYNAMIC)).await?;
        self.send(message::set_chunk_size(chunk_size)).await?;
        self.codec.set_out_chunk_size(chunk_size);
        self.send(message::connect_result(cmd.transaction_id, self.state.object_encoding))
            .await?;

        self.start_ping().await;

        tracing::info!(session_id = self.state.id, app = %app, peer = %self.state.peer_addr, "Client connected");
        self.ctx.notify(Event::ConnectSuccess {
            session_id: self.state.id,
            app,
        });
        Ok(())
    }

    async fn start_ping(&mut self) {
        if self.ping_started {
            return;
        }
        self.ping_started = true;

        let interval = self.ctx.config.ping_interval;
        if interval.is_zero() {
            return;
        }
        let outbound = self.ctx.outbound.clone();
        let chunk_size = self.codec.out_chunk_size();
        let started = self.state.connect_started_at.unwrap_or_else(Instant::now);
        let session_id = self.state.id;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let elapsed = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
                let bytes = match to_bytes(&message::ping_request(elapsed), chunk_size) {
                    Ok(bytes) => bytes,
                    Err(_) => break,
                };
                if outbound.send(bytes).await.is_err() {
                    break;
                }
                tracing::trace!(session_id = session_id, elapsed = elapsed, "Ping sent");
            }
        });

        self.ctx.registry.attach_task(session_id, task.abort_handle()).await;
    }

    async fn on_publish(&mut self, cmd: &Command) -> Result<()> {
        let name = cmd.arg_str(0).unwrap_or_default();
        let (path, args) = stream_path(&self.state.app, name);
        let original = original_stream_path(&self.state.app, name);
        let stream_id = cmd.stream_id;

        self.ctx.notify(Event::PublishAttempt {
            session_id: self.state.id,
            path: path.clone(),
            args: args.clone(),
            stream_id,
        });

        // one publish per session
        if self.state.publish.active {
            let description = format!("Already publishing {}.", self.state.publish.original_path);
            return self
                .send_status(stream_id, "error", NS_PUBLISH_BAD_NAME, &description)
                .await;
        }

        if self.ctx.registry.set_publisher(self.state.id, &path).await.is_err() {
            let description = format!("Connection to {} is already established.", original);
            return self
                .send_status(stream_id, "error", NS_PUBLISH_BAD_NAME, &description)
                .await;
        }

        if let Some(authorizer) = self.ctx.authorizer.clone() {
            if let AuthResult::Reject(reason) = authorizer.publish(&path).await {
                tracing::info!(session_id = self.state.id, path = %path, reason = %reason, "Publish rejected");
                self.ctx.registry.release_publisher(self.state.id, &path).await;
                let description = format!("Authentication to {} failed.", original);
                return self
                    .send_status(stream_id, "error", NS_PUBLISH_UNAUTHORIZED, &description)
                    .await;
            }
        }

        self.state.publish.path = path.clone();
        self.state.publish.original_path = original.clone();
        self.state.publish.args = args.clone();
        self.state.publish.stream_id = stream_id;
        self.state.publish.active = true;
        self.cache = StreamCache::default();

        let description = format!("You're now publishing to {}.", original);
        self.send_status(stream_id, "status", NS_PUBLISH_START, &description).await?;

        let promoted = self.ctx.registry.promote_waiting(&path).await;
        tracing::info!(session_id = self.state.id, path = %path, waiting = promoted, "Publishing");

        self.ctx.notify(Event::PublishSuccess {
            session_id: self.state.id,
            path,
            args,
            stream_id,
        });
        Ok(())
    }

    async fn on_play(&mut self, cmd: &Command) -> Result<()> {
        let name = cmd.arg_str(0).unwrap_or_default();
        let (path, args) = stream_path(&self.state.app, name);
        let original = original_stream_path(&self.state.app, name);
        let stream_id = cmd.stream_id;

        self.ctx.notify(Event::PlayAttempt {
            session_id: self.state.id,
            path: path.clone(),
            args: args.clone(),
            stream_id,
        });

        self.refresh_play_status().await;
        if self.state.play.status != PlayStatus::None {
            let description = format!("Already playing {}.", self.state.play.original_path);
            return self.send_status(stream_id, "error", NS_PLAY_FAILED, &description).await;
        }

        if self.ctx.registry.set_subscriber(self.state.id, &path).await.is_err() {
            let description = format!("Connection to {} is already established.", original);
            return self.send_status(stream_id, "error", NS_PLAY_FAILED, &description).await;
        }

        if let Some(authorizer) = self.ctx.authorizer.clone() {
            if let AuthResult::Reject(reason) = authorizer.play(&path).await {
                tracing::info!(session_id = self.state.id, path = %path, reason = %reason, "Play rejected");
                self.ctx.registry.release_subscriber(self.state.id, &path).await;
                let description = format!("Authentication to {} failed.", original);
                return self
                    .send_status(stream_id, "error", NS_PLAY_UNAUTHORIZED, &description)
                    .await;
            }
        }

        self.state.play.path = path.clone();
        self.state.play.original_path = original.clone();
        self.state.play.args = args.clone();
        self.state.play.stream_id = stream_id;

        self.send(message::stream_status(UC_STREAM_BEGIN, stream_id)).await?;
        let description = format!("You're now playing {}.", original);
        self.send_status(stream_id, "status", NS_PLAY_START, &description).await?;
        self.send(message::sample_access(stream_id)).await?;

        self.set_play_status(PlayStatus::Idle).await;
        self.start_playback().await?;

        tracing::info!(
            session_id = self.state.id,
            path = %path,
            status = ?self.state.play.status,
            "Playing"
        );
        self.ctx.notify(Event::PlaySuccess {
            session_id: self.state.id,
            path,
            args,
            stream_id,
        });
        Ok(())
    }

    /// Send the publisher's cached metadata and codec configs, then switch
    /// to Play; stays Idle when nobody publishes yet
    async fn start_playback(&mut self) -> Result<()> {
        let frames = self
            .ctx
            .registry
            .bootstrap_frames(&self.state.play.path, self.state.play.stream_id)
            .await;

        if let Some(frames) = frames {
            for frame in frames {
                self.send(frame).await?;
            }
            self.set_play_status(PlayStatus::Play).await;
        }
        Ok(())
    }

    async fn on_pause(&mut self, cmd: &Command) -> Result<()> {
        self.refresh_play_status().await;
        if self.state.play.status == PlayStatus::None {
            return Ok(());
        }

        let pause = cmd.arg(0).and_then(|v| v.as_bool()).unwrap_or(false);
        let stream_id = self.state.play.stream_id;
        let original = self.state.play.original_path.clone();

        if pause {
            self.set_play_status(PlayStatus::Pause).await;
            self.send(message::stream_status(UC_STREAM_EOF, stream_id)).await?;
            let description = format!("Playback of {} has been paused.", original);
            self.send_status(stream_id, "info", NS_PAUSE_NOTIFY, &description).await
        } else {
            self.set_play_status(PlayStatus::Play).await;
            self.start_playback().await?;
            let description = format!("Playback of {} has been resumed.", original);
            self.send_status(stream_id, "info", NS_UNPAUSE_NOTIFY, &description).await
        }
    }

    async fn on_delete_stream(&mut self, stream_id: u32) -> Result<()> {
        if !self.state.play.path.is_empty() && self.state.play.stream_id == stream_id {
            self.ctx.notify(Event::PlayDone {
                session_id: self.state.id,
                path: self.state.play.path.clone(),
                args: self.state.play.args.clone(),
                stream_id,
            });
            let description = format!("Playback of {} has been stopped.", self.state.play.original_path);
            self.send_status(stream_id, "error", NS_PLAY_STOP, &description).await?;
        }

        if self.state.publish.active && self.state.publish.stream_id == stream_id {
            self.ctx.notify(Event::PublishDone {
                session_id: self.state.id,
                path: self.state.publish.path.clone(),
                args: self.state.publish.args.clone(),
                stream_id,
            });
            let description = format!("Connection to {} has been closed.", self.state.publish.original_path);
            self.send_status(stream_id, "error", NS_UNPUBLISH_SUCCESS, &description).await?;

            let subscribers = self.ctx.registry.subscriber_targets(&self.state.publish.path).await;
            for target in &subscribers {
                let eof = message::stream_status(UC_STREAM_EOF, target.stream_id);
                if let Ok(bytes) = to_bytes(&eof, self.ctx.config.chunk_size) {
                    target.try_deliver(bytes);
                }
            }
            self.state.publish.active = false;
        }

        self.ctx.registry.destroy(self.state.id).await;
        self.state.close();
        Ok(())
    }

    // ========================================================================
    // Data and media
    // ========================================================================

    async fn handle_data(&mut self, values: Vec<AmfValue>) -> Result<()> {
        if values.first().and_then(|v| v.as_str()) != Some(CMD_SET_DATA_FRAME) {
            return Ok(());
        }
        if !self.state.publish.active {
            return Ok(());
        }

        let properties = values.get(2).cloned().unwrap_or(AmfValue::Null);
        let payload = self.cache.apply_metadata(&properties);
        self.ctx.registry.update_cache(self.state.id, self.cache.clone()).await;

        tracing::debug!(session_id = self.state.id, path = %self.state.publish.path, "Metadata updated");
        let message = ChunkMessage::new(CSID_DATA, MSG_DATA_AMF0, 0, 0, payload);
        self.fan_out(&message).await
    }

    async fn handle_audio(&mut self, payload: Bytes, timer: u32) -> Result<()> {
        if payload.is_empty() || !self.state.publish.active {
            return Ok(());
        }
        if self.cache.observe_audio(&payload) {
            self.ctx.registry.update_cache(self.state.id, self.cache.clone()).await;
        }
        let message = ChunkMessage::new(CSID_AUDIO, MSG_AUDIO, 0, timer, payload);
        self.fan_out(&message).await
    }

    async fn handle_video(&mut self, payload: Bytes, timer: u32) -> Result<()> {
        if payload.is_empty() || !self.state.publish.active {
            return Ok(());
        }
        if self.cache.observe_video(&payload) {
            self.ctx.registry.update_cache(self.state.id, self.cache.clone()).await;
        }
        let message = ChunkMessage::new(CSID_VIDEO, MSG_VIDEO, 0, timer, payload);
        self.fan_out(&message).await
    }

    /// Serialize once, then address a copy to each playing subscriber
    async fn fan_out(&self, message: &ChunkMessage) -> Result<()> {
        let targets = self.ctx.registry.playing_targets(&self.state.publish.path).await;
        if targets.is_empty() {
            return Ok(());
        }

        let wire = to_bytes(message, self.ctx.config.chunk_size)?;
        for target in &targets {
            deliver(target, &wire);
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn refresh_play_status(&mut self) {
        self.state.play.status = self.ctx.registry.play_status(self.state.id).await;
    }

    async fn set_play_status(&mut self, status: PlayStatus) {
        self.state.play.status = status;
        self.ctx
            .registry
            .set_play_state(self.state.id, self.state.play.stream_id, status)
            .await;
    }

    async fn send_status(&mut self, stream_id: u32, level: &str, code: &str, description: &str) -> Result<()> {
        self.send(message::on_status(stream_id, level, code, description)).await
    }

    async fn send(&mut self, message: ChunkMessage) -> Result<()> {
        let bytes = self.codec.encode(&message)?;
        self.write(bytes).await
    }

    async fn write(&self, bytes: Bytes) -> Result<()> {
        self.ctx
            .outbound
            .send(bytes)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

fn deliver(target: &FanoutTarget, wire: &Bytes) {
    let mut copy = wire.to_vec();
    copy[STREAM_ID_OFFSET..STREAM_ID_OFFSET + 4].copy_from_slice(&target.stream_id.to_le_bytes());
    target.try_deliver(Bytes::from(copy));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::{mpsc, watch};

    use crate::amf::amf0;
    use crate::protocol::handshake::generate_client_signature;
    use crate::protocol::HandshakeFormat;
    use crate::registry::{SessionHandle, SessionRegistry};
    use crate::server::config::ServerConfig;
    use crate::server::handler::{Authorizer, NotificationSink};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl NotificationSink for Recorder {
        fn notify(&self, event: Event) {
            self.0.lock().unwrap().push(event.name());
        }
    }

    struct DenyAll;

    #[async_trait::async_trait]
    impl Authorizer for DenyAll {
        async fn publish(&self, _path: &str) -> AuthResult {
            AuthResult::Reject("denied".into())
        }
        async fn play(&self, _path: &str) -> AuthResult {
            AuthResult::Reject("denied".into())
        }
    }

    struct Harness {
        session: Session,
        rx: mpsc::Receiver<Bytes>,
        decoder: ChunkCodec,
        events: Arc<Recorder>,
    }

    impl Harness {
        /// Drain queued output and decode it as server-to-client chunks
        fn drain(&mut self) -> Vec<ChunkMessage> {
            let mut out = Vec::new();
            while let Ok(bytes) = self.rx.try_recv() {
                let mut offset = 0;
                loop {
                    let outcome = self.decoder.read(&bytes, offset, bytes.len() - offset);
                    for msg in self.decoder.take_ready() {
                        if msg.header.message_type == MSG_SET_CHUNK_SIZE {
                            let size = u32::from_be_bytes([msg.payload[0], msg.payload[1], msg.payload[2], msg.payload[3]]);
                            self.decoder.set_in_chunk_size(size);
                        }
                        out.push(msg);
                    }
                    match outcome.resume_offset {
                        Some(next) if !outcome.done => offset = next,
                        _ => break,
                    }
                }
                self.decoder.clear_dispatched_duplicates();
            }
            out
        }

        async fn command(&mut self, stream_id: u32, values: &[AmfValue]) {
            let wire = to_bytes(&message::invoke(stream_id, values), DEFAULT_CHUNK_SIZE).unwrap();
            self.session.feed(&wire).await.unwrap();
        }

        async fn publish(&mut self, name: &str) {
            self.command(1, &[AmfValue::from("publish"), AmfValue::Number(5.0), AmfValue::Null, AmfValue::from(name)])
                .await;
        }

        async fn play(&mut self, stream_id: u32, name: &str) {
            self.command(
                stream_id,
                &[AmfValue::from("play"), AmfValue::Number(4.0), AmfValue::Null, AmfValue::from(name)],
            )
            .await;
        }

        async fn pause(&mut self, pause: bool) {
            self.command(0, &[AmfValue::from("pause"), AmfValue::Number(0.0), AmfValue::Null, AmfValue::Boolean(pause)])
                .await;
        }

        async fn video(&mut self, payload: &'static [u8]) {
            let frame = ChunkMessage::new(CSID_VIDEO, MSG_VIDEO, 1, 40, Bytes::from_static(payload));
            let wire = to_bytes(&frame, DEFAULT_CHUNK_SIZE).unwrap();
            self.session.feed(&wire).await.unwrap();
        }
    }

    async fn harness(registry: &Arc<SessionRegistry>, authorizer: Option<Arc<dyn Authorizer>>) -> Harness {
        let (tx, rx) = mpsc::channel(64);
        let (shutdown, _) = watch::channel(false);
        let id = registry.register(SessionHandle::new(tx.clone(), shutdown)).await;
        let events = Arc::new(Recorder::default());
        let ctx = SessionContext::new(
            id,
            SocketAddr::from(([127, 0, 0, 1], 50000)),
            Arc::new(ServerConfig::default()),
            Arc::clone(registry),
            authorizer,
            events.clone(),
            tx,
        );
        Harness {
            session: Session::new(ctx),
            rx,
            decoder: ChunkCodec::new(),
            events,
        }
    }

    async fn complete_handshake(h: &mut Harness) {
        let mut c0c1 = vec![RTMP_VERSION];
        c0c1.extend_from_slice(&[0u8; HANDSHAKE_SIZE]);
        h.session.feed(&c0c1).await.unwrap();
        h.session.feed(&[0u8; HANDSHAKE_SIZE]).await.unwrap();
        // S0S1S2
        h.rx.try_recv().unwrap();
    }

    async fn connected(registry: &Arc<SessionRegistry>) -> Harness {
        let mut h = harness(registry, None).await;
        complete_handshake(&mut h).await;
        h.command(
            0,
            &[
                AmfValue::from("connect"),
                AmfValue::Number(1.0),
                AmfValue::object([("app", AmfValue::from("live"))]),
            ],
        )
        .await;
        h.drain();
        h
    }

    fn status_code(msg: &ChunkMessage) -> Option<String> {
        let values = amf0::decode_all(&msg.payload);
        values.get(3)?.get_string("code").map(str::to_string)
    }

    #[tokio::test]
    async fn test_handshake_then_chunks() {
        let registry = Arc::new(SessionRegistry::new());
        let mut h = harness(&registry, None).await;

        let c1 = generate_client_signature(HandshakeFormat::DigestV1).unwrap();
        let mut c0c1 = vec![RTMP_VERSION];
        c0c1.extend_from_slice(&c1);
        h.session.feed(&c0c1).await.unwrap();
        assert_eq!(h.session.phase(), SessionPhase::HandshakeS1);
        let s0s1s2 = h.rx.try_recv().unwrap();
        assert_eq!(s0s1s2.len(), 1 + 2 * HANDSHAKE_SIZE);

        // C2 and the first chunk arrive in one read
        let mut read = vec![0u8; HANDSHAKE_SIZE];
        read.extend_from_slice(&to_bytes(&message::window_ack_size(2_500_000), 128).unwrap());
        h.session.feed(&read).await.unwrap();

        assert!(h.session.handshake_done());
        assert_eq!(h.session.phase(), SessionPhase::Streaming);
        assert_eq!(h.session.state().window_ack_size, 2_500_000);
    }

    #[tokio::test]
    async fn test_connect_replies_in_order() {
        let registry = Arc::new(SessionRegistry::new());
        let mut h = harness(&registry, None).await;
        complete_handshake(&mut h).await;

        h.command(
            0,
            &[
                AmfValue::from("connect"),
                AmfValue::Number(1.0),
                AmfValue::object([("app", AmfValue::from("live")), ("objectEncoding", AmfValue::Number(0.0))]),
            ],
        )
        .await;

        let replies = h.drain();
        let types: Vec<u8> = replies.iter().map(|m| m.header.message_type).collect();
        assert_eq!(
            types,
            vec![MSG_WINDOW_ACK_SIZE, MSG_SET_PEER_BANDWIDTH, MSG_SET_CHUNK_SIZE, MSG_COMMAND_AMF0]
        );
        assert_eq!(&replies[0].payload[..], &50_000u32.to_be_bytes());
        assert_eq!(status_code(&replies[3]).as_deref(), Some(NC_CONNECT_SUCCESS));
        assert!(h.session.state().is_connected());
        assert_eq!(
            *h.events.0.lock().unwrap(),
            vec!["client.connect.attempt", "client.connect.success"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_publish_is_bad_name() {
        let registry = Arc::new(SessionRegistry::new());
        let mut first = connected(&registry).await;
        let mut second = connected(&registry).await;

        let publish = [AmfValue::from("publish"), AmfValue::Number(5.0), AmfValue::Null, AmfValue::from("cam")];
        first.command(1, &publish).await;
        second.command(1, &publish).await;

        let first_replies = first.drain();
        assert_eq!(status_code(&first_replies[0]).as_deref(), Some(NS_PUBLISH_START));
        let second_replies = second.drain();
        assert_eq!(status_code(&second_replies[0]).as_deref(), Some(NS_PUBLISH_BAD_NAME));

        assert_eq!(registry.publisher_of("/live/cam").await, Some(first.session.id()));
        assert_eq!(registry.publisher_count().await, 1);
    }

    #[tokio::test]
    async fn test_second_publish_keeps_first_stream() {
        let registry = Arc::new(SessionRegistry::new());
        let mut a = connected(&registry).await;
        let mut b = connected(&registry).await;
        let mut player = connected(&registry).await;
        a.publish("a").await;
        b.publish("b").await;
        player.play(1, "b").await;
        a.drain();
        player.drain();

        // path owned by someone else
        a.publish("b").await;
        assert_eq!(status_code(&a.drain()[0]).as_deref(), Some(NS_PUBLISH_BAD_NAME));
        // free path, but this session already publishes
        a.publish("x").await;
        assert_eq!(status_code(&a.drain()[0]).as_deref(), Some(NS_PUBLISH_BAD_NAME));

        assert_eq!(registry.publisher_of("/live/b").await, Some(b.session.id()));
        assert_eq!(registry.publisher_of("/live/x").await, None);
        assert_eq!(a.session.state().publish.path, "/live/a");

        a.video(&[0x27, 0x01, 0xAA, 0xAA]).await;
        assert!(player.drain().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_publish_releases_path() {
        let registry = Arc::new(SessionRegistry::new());
        let mut h = connected(&registry).await;
        h.session.ctx.authorizer = Some(Arc::new(DenyAll));

        h.command(1, &[AmfValue::from("publish"), AmfValue::Number(5.0), AmfValue::Null, AmfValue::from("cam")])
            .await;
        let replies = h.drain();
        assert_eq!(status_code(&replies[0]).as_deref(), Some(NS_PUBLISH_UNAUTHORIZED));
        assert_eq!(registry.publisher_of("/live/cam").await, None);
    }

    #[tokio::test]
    async fn test_play_waits_for_publisher() {
        let registry = Arc::new(SessionRegistry::new());
        let mut player = connected(&registry).await;
        player
            .command(1, &[AmfValue::from("play"), AmfValue::Number(4.0), AmfValue::Null, AmfValue::from("cam")])
            .await;

        let replies = player.drain();
        assert_eq!(replies[0].header.message_type, MSG_USER_CONTROL);
        assert_eq!(status_code(&replies[1]).as_deref(), Some(NS_PLAY_START));
        assert_eq!(replies[2].header.message_type, MSG_DATA_AMF0);
        assert_eq!(registry.play_status(player.session.id()).await, PlayStatus::Idle);

        let mut publisher = connected(&registry).await;
        publisher
            .command(1, &[AmfValue::from("publish"), AmfValue::Number(5.0), AmfValue::Null, AmfValue::from("cam")])
            .await;
        assert_eq!(registry.play_status(player.session.id()).await, PlayStatus::Play);
    }

    #[tokio::test]
    async fn test_second_play_is_refused() {
        let registry = Arc::new(SessionRegistry::new());
        let mut first = connected(&registry).await;
        let mut second = connected(&registry).await;
        first.publish("a").await;
        second.publish("b").await;

        let mut player = connected(&registry).await;
        player.play(1, "a").await;
        player.drain();

        player.play(1, "b").await;
        let replies = player.drain();
        assert_eq!(replies.len(), 1);
        assert_eq!(status_code(&replies[0]).as_deref(), Some(NS_PLAY_FAILED));
        assert!(registry.subscribers_of("/live/b").await.is_empty());
        assert_eq!(player.session.state().play.path, "/live/a");

        second.video(&[0x27, 0x01, 0xBB]).await;
        assert!(player.drain().is_empty());
        first.video(&[0x27, 0x01, 0xAA]).await;
        assert_eq!(player.drain().len(), 1);

        registry.destroy(player.session.id()).await;
        assert!(registry.subscribers_of("/live/a").await.is_empty());
        assert!(registry.subscribers_of("/live/b").await.is_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let registry = Arc::new(SessionRegistry::new());
        let mut publisher = connected(&registry).await;
        publisher.publish("cam").await;
        publisher.video(&[0x17, 0x00, 0x01]).await;

        let mut player = connected(&registry).await;
        player.play(1, "cam").await;
        player.drain();

        player.pause(true).await;
        let replies = player.drain();
        assert_eq!(replies[0].header.message_type, MSG_USER_CONTROL);
        assert_eq!(&replies[0].payload[..], &[0, 1, 0, 0, 0, 1]);
        assert_eq!(status_code(&replies[1]).as_deref(), Some(NS_PAUSE_NOTIFY));
        assert_eq!(registry.play_status(player.session.id()).await, PlayStatus::Pause);

        publisher.video(&[0x27, 0x01, 0xAA]).await;
        assert!(player.drain().is_empty());

        player.pause(false).await;
        let replies = player.drain();
        // config frame from the bootstrap, then the notification
        assert_eq!(replies[0].header.message_type, MSG_VIDEO);
        assert_eq!(&replies[0].payload[..], &[0x17, 0x00, 0x01]);
        assert_eq!(status_code(&replies[1]).as_deref(), Some(NS_UNPAUSE_NOTIFY));
        assert_eq!(registry.play_status(player.session.id()).await, PlayStatus::Play);

        publisher.video(&[0x27, 0x01, 0xBB]).await;
        let frames = player.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], &[0x27, 0x01, 0xBB]);
    }

    #[tokio::test]
    async fn test_pause_ignored_without_play() {
        let registry = Arc::new(SessionRegistry::new());
        let mut h = connected(&registry).await;
        h.command(0, &[AmfValue::from("pause"), AmfValue::Number(0.0), AmfValue::Null, AmfValue::Boolean(true)])
            .await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_close_stream_notifies_subscribers() {
        let registry = Arc::new(SessionRegistry::new());
        let mut publisher = connected(&registry).await;
        publisher
            .command(1, &[AmfValue::from("publish"), AmfValue::Number(5.0), AmfValue::Null, AmfValue::from("cam")])
            .await;
        let mut player = connected(&registry).await;
        player
            .command(1, &[AmfValue::from("play"), AmfValue::Number(4.0), AmfValue::Null, AmfValue::from("cam")])
            .await;
        player.drain();
        publisher.drain();

        publisher.command(0, &[AmfValue::from("closeStream"), AmfValue::Number(0.0), AmfValue::Null]).await;

        let replies = publisher.drain();
        assert_eq!(status_code(&replies[0]).as_deref(), Some(NS_UNPUBLISH_SUCCESS));
        assert_eq!(publisher.session.phase(), SessionPhase::Closed);
        assert!(!registry.is_registered(publisher.session.id()).await);

        let eof = player.drain();
        assert_eq!(&eof[0].payload[..], &[0, 1, 0, 0, 0, 1]);
        assert!(registry.is_registered(player.session.id()).await);
        assert_eq!(registry.play_status(player.session.id()).await, PlayStatus::None);
        assert!(publisher
            .events
            .0
            .lock()
            .unwrap()
            .contains(&"client.publish.done"));
    }

    #[tokio::test]
    async fn test_media_patched_per_subscriber() {
        let registry = Arc::new(SessionRegistry::new());
        let mut publisher = connected(&registry).await;
        publisher
            .command(1, &[AmfValue::from("publish"), AmfValue::Number(5.0), AmfValue::Null, AmfValue::from("cam")])
            .await;
        let mut a = connected(&registry).await;
        a.command(1, &[AmfValue::from("play"), AmfValue::Number(4.0), AmfValue::Null, AmfValue::from("cam")])
            .await;
        let mut b = connected(&registry).await;
        b.command(3, &[AmfValue::from("play"), AmfValue::Number(4.0), AmfValue::Null, AmfValue::from("cam")])
            .await;
        a.drain();
        b.drain();

        let frame = ChunkMessage::new(CSID_VIDEO, MSG_VIDEO, 1, 40, Bytes::from_static(&[0x27, 0x01, 9, 9]));
        let wire = to_bytes(&frame, DEFAULT_CHUNK_SIZE).unwrap();
        publisher.session.feed(&wire).await.unwrap();

        let got_a = a.drain();
        let got_b = b.drain();
        assert_eq!(got_a[0].header.stream_id, 1);
        assert_eq!(got_b[0].header.stream_id, 3);
        assert_eq!(got_a[0].timer, 40);
        assert_eq!(&got_b[0].payload[..], &[0x27, 0x01, 9, 9]);
    }

    #[tokio::test]
    async fn test_one_ack_per_window() {
        let registry = Arc::new(SessionRegistry::new());
        let mut h = connected(&registry).await;
        let window = to_bytes(&message::window_ack_size(1000), DEFAULT_CHUNK_SIZE).unwrap();
        h.session.feed(&window).await.unwrap();

        let filler = ChunkMessage::new(CSID_AUDIO, MSG_AUDIO, 1, 0, Bytes::from(vec![0xAFu8; 600]));
        let wire = to_bytes(&filler, DEFAULT_CHUNK_SIZE).unwrap();
        h.session.feed(&wire).await.unwrap();
        h.session.feed(&wire).await.unwrap();

        let acks: Vec<_> = h
            .drain()
            .into_iter()
            .filter(|m| m.header.message_type == MSG_ACKNOWLEDGEMENT)
            .collect();
        assert_eq!(acks.len(), 1);
    }

    #[tokio::test]
    async fn test_ping_aborted_on_destroy() {
        let registry = Arc::new(SessionRegistry::new());
        let mut h = connected(&registry).await;
        h.session.ctx.config = Arc::new(ServerConfig::default().ping_interval(Duration::from_millis(10)));
        h.session.ping_started = false;
        h.session.start_ping().await;

        tokio::time::sleep(Duration::from_millis(35)).await;
        let pings = h
            .drain()
            .into_iter()
            .filter(|m| m.header.message_type == MSG_USER_CONTROL)
            .count();
        assert!(pings >= 1);

        registry.destroy(h.session.id()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        while h.rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(h.rx.try_recv().is_err());
    }
}
