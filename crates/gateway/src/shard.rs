//! The per-connection state machine.

use parking_lot::Mutex;
use shardline_core::{RateWindowSpec, SessionState, ShardIdentity};
use shardline_ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::command::GatewayCommand;
use crate::config::ShardConfig;
use crate::error::GatewayError;
use crate::events::{EventKind, ShardEvent};
use crate::heartbeat::{Beat, HeartbeatMonitor, first_beat_delay};
use crate::identify::IdentifyGate;
use crate::protocol::{GatewayFrame, Hello, OutboundFrame, Ready, close_code, gateway_url, opcode};
use crate::state::{ShardState, ShardStatus};
use crate::transport::{Connection, Transport, TransportEvent, TransportMessage};

/// Collaborators a shard runs with
#[derive(Clone)]
pub struct ShardDeps {
    pub transport: Arc<dyn Transport>,
    /// Paces outbound frames under `gateway:commands:{shard id}`
    pub limiter: RateLimiter,
    pub gate: Arc<dyn IdentifyGate>,
    pub events: broadcast::Sender<ShardEvent>,
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// Caller asked to close
    Shutdown,
    /// We are dropping a live connection
    Reconnect(&'static str),
    /// The connection is already gone
    Lost(&'static str),
}

enum FrameOutcome {
    Continue,
    Handshaken { interval: Duration },
    End(Disconnect),
}

/// One gateway shard, running as its own task
pub struct Shard {
    identity: ShardIdentity,
    config: Arc<ShardConfig>,
    deps: ShardDeps,
    commands: mpsc::Receiver<GatewayCommand>,
    status: watch::Sender<ShardStatus>,
    shutdown: watch::Receiver<bool>,
    session: Option<SessionState>,
    /// Last dispatch sequence of the current connection's session
    sequence: Option<u64>,
    resume_url: Option<String>,
    heartbeat: HeartbeatMonitor,
}

impl Shard {
    /// Start a shard and return its handle
    pub fn spawn(identity: ShardIdentity, config: Arc<ShardConfig>, deps: ShardDeps) -> ShardHandle {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(ShardStatus::new(identity));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shard = Shard {
            identity,
            config,
            deps,
            commands: commands_rx,
            status: status_tx,
            shutdown: shutdown_rx,
            session: None,
            sequence: None,
            resume_url: None,
            heartbeat: HeartbeatMonitor::new(),
        };
        let span = info_span!("shard", id = identity.id, count = identity.count);
        let task = tokio::spawn(shard.run().instrument(span));

        ShardHandle {
            identity,
            commands: commands_tx,
            status: status_rx,
            shutdown: Arc::new(shutdown_tx),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(mut self) {
        info!("Shard started");
        let mut backoff = self.config.reconnect_backoff;

        loop {
            self.set_state(ShardState::Connecting);
            let connected = match self.connect_url() {
                Ok(url) => {
                    tokio::select! {
                        result = self.deps.transport.connect(&url) => result,
                        _ = shutdown_requested(&mut self.shutdown) => break,
                    }
                }
                Err(e) => Err(e),
            };

            let conn = match connected {
                Ok(conn) => {
                    backoff = self.config.reconnect_backoff;
                    conn
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "Connection failed");
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = shutdown_requested(&mut self.shutdown) => break,
                    }
                    backoff = (backoff * 2).min(self.config.max_reconnect_backoff);
                    continue;
                }
            };

            match self.drive(conn).await {
                Disconnect::Shutdown => break,
                Disconnect::Reconnect(reason) | Disconnect::Lost(reason) => {
                    info!(reason, resumable = self.session.is_some(), "Reconnecting");
                    self.set_state(ShardState::Reconnecting);
                }
            }
        }

        self.set_state(ShardState::Closed);
        info!("Shard closed");
    }

    /// Run one connection until it ends
    async fn drive(&mut self, mut conn: Connection) -> Disconnect {
        self.set_state(ShardState::AwaitingHello);

        let (frames_tx, frames_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let writer = tokio::spawn(write_paced(
            frames_rx,
            conn.sender(),
            self.deps.limiter.clone(),
            self.command_spec(),
        ));

        let mut connected = false;
        let mut interval = Duration::ZERO;
        let mut next_beat: Option<Instant> = None;

        let outcome = loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break Disconnect::Shutdown,

                _ = sleep_until(next_beat.unwrap_or_else(Instant::now)), if next_beat.is_some() => {
                    match self.heartbeat.on_beat_due() {
                        Beat::Send => {
                            self.send_frame(&frames_tx, OutboundFrame::heartbeat(self.sequence)).await;
                            next_beat = Some(Instant::now() + interval);
                        }
                        Beat::Zombie => {
                            warn!(outstanding = self.heartbeat.diff(), "Heartbeat not acknowledged");
                            break Disconnect::Reconnect("missed heartbeat ack");
                        }
                    }
                }

                command = self.commands.recv(), if connected => match command {
                    Some(command) => self.send_frame(&frames_tx, command.into_frame()).await,
                    // Every handle is gone
                    None => break Disconnect::Shutdown,
                },

                event = conn.recv() => match event {
                    Some(TransportEvent::Frame(text)) => {
                        match self.on_frame(&text, &frames_tx).await {
                            FrameOutcome::Continue => {}
                            FrameOutcome::Handshaken { interval: every } => {
                                connected = true;
                                interval = every;
                                next_beat = Some(Instant::now() + first_beat_delay(every));
                            }
                            FrameOutcome::End(disconnect) => break disconnect,
                        }
                    }
                    Some(TransportEvent::Closed { code }) => {
                        self.on_close(code);
                        break Disconnect::Lost("closed by server");
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!(error = %e, "Transport error");
                        break Disconnect::Lost("transport error");
                    }
                    None => break Disconnect::Lost("transport closed"),
                },
            }
        };

        writer.abort();
        match outcome {
            Disconnect::Shutdown => {
                conn.close(close_code::NORMAL, self.config.close_timeout).await;
            }
            Disconnect::Reconnect(_) => {
                conn.close(close_code::RECONNECT, self.config.close_timeout).await;
            }
            Disconnect::Lost(_) => {}
        }
        outcome
    }

    async fn on_frame(&mut self, text: &str, frames: &mpsc::Sender<String>) -> FrameOutcome {
        let frame: GatewayFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed frame");
                return FrameOutcome::Continue;
            }
        };

        match frame.op {
            opcode::HELLO => {
                let hello: Hello = match serde_json::from_value(frame.d) {
                    Ok(hello) => hello,
                    Err(e) => {
                        warn!(error = %e, "Malformed hello");
                        return FrameOutcome::End(Disconnect::Reconnect("malformed hello"));
                    }
                };
                self.heartbeat.reset();
                match self.handshake(frames).await {
                    Ok(()) => FrameOutcome::Handshaken {
                        interval: Duration::from_millis(hello.heartbeat_interval),
                    },
                    Err(disconnect) => FrameOutcome::End(disconnect),
                }
            }
            opcode::HEARTBEAT_ACK => {
                self.heartbeat.on_ack();
                self.publish();
                FrameOutcome::Continue
            }
            opcode::HEARTBEAT => {
                // Server-requested beats do not count toward the outstanding acks
                self.send_frame(frames, OutboundFrame::heartbeat(self.sequence))
                    .await;
                FrameOutcome::Continue
            }
            opcode::RECONNECT => FrameOutcome::End(Disconnect::Reconnect("requested by server")),
            opcode::INVALID_SESSION => {
                let resumable = frame.d.as_bool().unwrap_or(false);
                if !resumable {
                    self.clear_session();
                }
                info!(resumable, "Session invalidated");
                FrameOutcome::End(Disconnect::Reconnect("invalid session"))
            }
            opcode::DISPATCH => {
                self.on_dispatch(frame);
                FrameOutcome::Continue
            }
            op => {
                debug!(op, "Ignoring unknown opcode");
                FrameOutcome::Continue
            }
        }
    }

    /// Identify or resume, once the gate lets this shard through
    async fn handshake(&mut self, frames: &mpsc::Sender<String>) -> Result<(), Disconnect> {
        let resuming = self.session.is_some();
        self.set_state(if resuming {
            ShardState::Resuming
        } else {
            ShardState::Identifying
        });

        tokio::select! {
            _ = self.deps.gate.wait_turn(self.identity) => {}
            _ = shutdown_requested(&mut self.shutdown) => return Err(Disconnect::Shutdown),
        }

        let frame = match &self.session {
            Some(session) => OutboundFrame::resume(&self.config.token, session),
            None => {
                self.sequence = None;
                OutboundFrame::identify(&self.config, self.identity)
            }
        };
        let frame = frame.map_err(|e| {
            error!(error = %e, "Failed to encode handshake");
            Disconnect::Reconnect("handshake encoding")
        })?;

        debug!(resuming, "Sending handshake");
        self.send_frame(frames, frame).await;
        self.set_state(ShardState::Connected);
        Ok(())
    }

    fn on_dispatch(&mut self, frame: GatewayFrame) {
        if let Some(seq) = frame.s {
            self.sequence = Some(self.sequence.map_or(seq, |last| last.max(seq)));
            if let Some(session) = self.session.as_mut() {
                session.observe(seq);
                self.publish();
            }
        }

        let name = frame.t.unwrap_or_default();
        let kind = EventKind::from_name(&name);
        match kind {
            EventKind::Ready => match serde_json::from_value::<Ready>(frame.d.clone()) {
                Ok(ready) => {
                    info!(session_id = %ready.session_id, "Ready");
                    self.session = Some(SessionState::new(
                        ready.session_id,
                        self.sequence.unwrap_or(0),
                    ));
                    self.resume_url = ready.resume_gateway_url;
                    self.publish();
                }
                Err(e) => warn!(error = %e, "Malformed READY"),
            },
            EventKind::Resumed => info!("Resumed"),
            _ => {}
        }

        // No subscribers is not an error
        let _ = self.deps.events.send(ShardEvent::Dispatch {
            shard: self.identity,
            kind,
            name,
            sequence: frame.s,
            data: frame.d,
        });
    }

    fn on_close(&mut self, code: Option<u16>) {
        let Some(code) = code else {
            return;
        };
        if close_code::is_fatal(code) {
            error!(code, "Gateway rejected the connection; check token, intents and shard count");
        }
        if close_code::clears_session(code) {
            info!(code, "Session cannot be resumed");
            self.clear_session();
        }
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.sequence = None;
        self.resume_url = None;
        self.publish();
    }

    async fn send_frame(&self, frames: &mpsc::Sender<String>, frame: OutboundFrame) {
        match frame.to_json() {
            Ok(json) => {
                // A closed writer surfaces as a transport event shortly after
                let _ = frames.send(json).await;
            }
            Err(e) => warn!(op = frame.op, error = %e, "Failed to encode frame"),
        }
    }

    fn connect_url(&self) -> Result<String, crate::error::TransportError> {
        let base = match (&self.session, &self.resume_url) {
            (Some(_), Some(resume_url)) => resume_url.as_str(),
            _ => self.config.gateway_url.as_str(),
        };
        gateway_url(base)
    }

    fn command_spec(&self) -> RateWindowSpec {
        RateWindowSpec::new(
            format!("gateway:commands:{}", self.identity.id),
            self.config.command_window,
            self.config.command_limit,
        )
    }

    fn set_state(&self, state: ShardState) {
        let changed = self.status.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            status.state = state;
            true
        });
        if changed {
            debug!(%state, "State changed");
            let _ = self.deps.events.send(ShardEvent::StateChanged {
                shard: self.identity,
                state,
            });
        }
    }

    fn publish(&self) {
        let latency = self.heartbeat.latency();
        let session = self.session.clone();
        self.status.send_modify(|status| {
            status.latency = latency;
            status.session = session;
        });
    }
}

/// Resolves once a close was requested or every handle is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closing| *closing).await;
}

/// Forward frames to the transport, each after its command slot is due
async fn write_paced(
    mut frames: mpsc::Receiver<String>,
    outbound: mpsc::Sender<TransportMessage>,
    limiter: RateLimiter,
    spec: RateWindowSpec,
) {
    while let Some(frame) = frames.recv().await {
        limiter.acquire(&spec).await;
        if outbound.send(TransportMessage::Text(frame)).await.is_err() {
            break;
        }
    }
}

/// Handle to a running shard
#[derive(Clone)]
pub struct ShardHandle {
    identity: ShardIdentity,
    commands: mpsc::Sender<GatewayCommand>,
    status: watch::Receiver<ShardStatus>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ShardHandle {
    pub fn identity(&self) -> ShardIdentity {
        self.identity
    }

    /// Queue a command; it is sent once the shard is connected
    pub async fn send(&self, command: GatewayCommand) -> Result<(), GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| GatewayError::Closed)
    }

    pub fn status(&self) -> ShardStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ShardState {
        self.status.borrow().state
    }

    pub fn latency(&self) -> Option<Duration> {
        self.status.borrow().latency
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ShardState::Closed
    }

    /// A receiver that observes every status change
    pub fn watch(&self) -> watch::Receiver<ShardStatus> {
        self.status.clone()
    }

    /// Wait until the shard reaches `state`
    pub async fn wait_for_state(&self, state: ShardState) -> ShardStatus {
        let mut status = self.status.clone();
        match status.wait_for(|s| s.state == state).await {
            Ok(reached) => reached.clone(),
            Err(_) => self.status(),
        }
    }

    /// Stop the shard: heartbeats and the writer stop, the transport is
    /// closed and queued commands are dropped. Returns once the task ended.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardHandle")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}
