//! The call session manager
//!
//! # Concurrency model
//!
//! All session state (the lifecycle state machine, the local track set,
//! the participant table) is owned by one event-loop task. Commands from
//! the UI arrive on an mpsc channel and are applied in FIFO order; the
//! unbounded-latency operations (device acquisition, transport join,
//! rejoin attempts, the reconnect grace timer) run in spawned sub-tasks
//! that only touch the injected capabilities and report back over a
//! completion channel into the same loop. Every completion and timer
//! carries the session epoch; the loop discards anything stamped with a
//! previous epoch, so a stale grace timer can never retire a session
//! that already recovered.
//!
//! Commands get a synchronous validation reply (contract violations such
//! as `AlreadySessionActive` are returned from the call itself); actual
//! completion or failure of the driven transition is always delivered
//! through the event feed.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telecare_call_core::{
//!     CallConfig, CallManager, DeviceProber, MediaAcquirer, TransportClient,
//! };
//!
//! # async fn example(
//! #     prober: Arc<dyn DeviceProber>,
//! #     acquirer: Arc<dyn MediaAcquirer>,
//! #     transport: Arc<dyn TransportClient>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = CallManager::new(CallConfig::default(), prober, acquirer, transport);
//! manager.start().await?;
//!
//! let mut events = manager.subscribe();
//! let handle = manager.start_session("room-42").await?;
//! println!("session {} starting", handle.id);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("event: {:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::call::{CallId, CallSnapshot, Participant, SessionState, SessionStats};
use crate::error::{AcquireError, CallError, CallResult, JoinError, TransportError};
use crate::events::{SessionEvent, SessionEventHandler, StateChangeInfo};
use crate::media::{LocalTrackSet, MediaAcquirer, MediaKind, TrackHandle};
use crate::probe::{DeviceProber, SystemStatus};
use crate::session::config::CallConfig;
use crate::transport::{DisconnectReason, QualityLevel, TransportClient, TransportEvent};

/// Handle returned by [`CallManager::start_session`]
///
/// Identifies the accepted session attempt; progress and failure arrive
/// through the event feed, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Session identifier, generated at acceptance
    pub id: CallId,
    /// Channel the session targets
    pub channel_id: String,
}

/// Commands accepted by the session event loop
enum Command {
    Start {
        channel_id: String,
        reply: oneshot::Sender<CallResult<SessionHandle>>,
    },
    End {
        reply: oneshot::Sender<CallResult<()>>,
    },
    Toggle {
        kind: MediaKind,
        reply: oneshot::Sender<CallResult<bool>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Completions reported back into the loop by spawned sub-tasks
enum Completion {
    AcquireDone {
        epoch: u64,
        audio: Result<TrackHandle, AcquireError>,
        video: Option<Result<TrackHandle, AcquireError>>,
    },
    JoinDone {
        epoch: u64,
        outcome: JoinOutcome,
    },
    RejoinDone {
        epoch: u64,
        attempt: u32,
        result: Result<(), JoinError>,
    },
    GraceElapsed {
        epoch: u64,
    },
}

impl Completion {
    fn epoch(&self) -> u64 {
        match self {
            Completion::AcquireDone { epoch, .. }
            | Completion::JoinDone { epoch, .. }
            | Completion::RejoinDone { epoch, .. }
            | Completion::GraceElapsed { epoch } => *epoch,
        }
    }
}

enum JoinOutcome {
    Complete,
    JoinFailed(JoinError),
    PublishFailed(TransportError),
}

/// The live session aggregate, private to the event loop
struct ActiveSession {
    id: CallId,
    channel_id: String,
    state: SessionState,
    tracks: LocalTrackSet,
    started_at: chrono::DateTime<Utc>,
    connected_at: Option<chrono::DateTime<Utc>>,
    ended_at: Option<chrono::DateTime<Utc>>,
    last_error: Option<CallError>,
    cancel_requested: bool,
    last_quality: Option<QualityLevel>,
}

impl ActiveSession {
    fn new(id: CallId, channel_id: String) -> Self {
        Self {
            id,
            channel_id,
            state: SessionState::Idle,
            tracks: LocalTrackSet::empty(),
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            last_error: None,
            cancel_requested: false,
            last_quality: None,
        }
    }

    fn to_snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            id: self.id,
            channel_id: self.channel_id.clone(),
            state: self.state,
            audio_enabled: self.tracks.audio_enabled,
            video_enabled: self.tracks.video_enabled,
            has_local_audio: self.tracks.has_audio(),
            has_local_video: self.tracks.has_video(),
            started_at: self.started_at,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Orchestrates the call session lifecycle
///
/// Owns the single non-terminal session per client, the participant
/// table, and the event feed. Device probing, media acquisition, and the
/// transport are injected capabilities; the manager never constructs
/// them. Cheap to share behind an `Arc`; all methods take `&self`.
pub struct CallManager {
    config: CallConfig,
    prober: Arc<dyn DeviceProber>,
    acquirer: Arc<dyn MediaAcquirer>,
    transport: Arc<dyn TransportClient>,
    is_running: Arc<RwLock<bool>>,
    cmd_tx: RwLock<Option<mpsc::UnboundedSender<Command>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    handler: Arc<RwLock<Option<Arc<dyn SessionEventHandler>>>>,
    snapshot: Arc<RwLock<Option<CallSnapshot>>>,
    participants: Arc<DashMap<String, Participant>>,
    stats: Arc<Mutex<SessionStats>>,
}

impl CallManager {
    /// Create a manager with the given configuration and capabilities
    ///
    /// The manager is created stopped; call [`CallManager::start`] to
    /// spawn the session event loop before issuing commands.
    pub fn new(
        config: CallConfig,
        prober: Arc<dyn DeviceProber>,
        acquirer: Arc<dyn MediaAcquirer>,
        transport: Arc<dyn TransportClient>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            prober,
            acquirer,
            transport,
            is_running: Arc::new(RwLock::new(false)),
            cmd_tx: RwLock::new(None),
            event_tx,
            handler: Arc::new(RwLock::new(None)),
            snapshot: Arc::new(RwLock::new(None)),
            participants: Arc::new(DashMap::new()),
            stats: Arc::new(Mutex::new(SessionStats::default())),
        }
    }

    /// Spawn the session event loop and the handler dispatch task
    ///
    /// Idempotent: starting a running manager is a no-op.
    pub async fn start(&self) -> CallResult<()> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (handler_tx, mut handler_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let transport_rx = self.transport.subscribe();
        *self.cmd_tx.write().await = Some(cmd_tx);

        // Handler dispatch runs on its own task so a slow handler can
        // never stall the session loop, while still seeing events in
        // loop-processing order.
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            while let Some(event) = handler_rx.recv().await {
                let current = handler.read().await.clone();
                if let Some(h) = current {
                    h.on_session_event(event).await;
                }
            }
        });

        let event_loop = EventLoop {
            config: self.config.clone(),
            acquirer: Arc::clone(&self.acquirer),
            transport: Arc::clone(&self.transport),
            cmd_rx,
            completion_tx,
            completion_rx,
            transport_rx,
            event_tx: self.event_tx.clone(),
            handler_tx,
            snapshot: Arc::clone(&self.snapshot),
            participants: Arc::clone(&self.participants),
            stats: Arc::clone(&self.stats),
            session: None,
            epoch: 0,
            cmd_open: true,
            transport_open: true,
            shutdown_requested: false,
            pending_shutdown: None,
            should_exit: false,
        };
        tokio::spawn(event_loop.run());

        info!("call manager started");
        Ok(())
    }

    /// Stop the manager, ending any active session first
    ///
    /// A session still setting up is cancelled and unwound; a connected
    /// session is torn down through the normal `Ending → Ended` path.
    /// Blocks until the loop has retired the session and exited.
    pub async fn stop(&self) -> CallResult<()> {
        let tx = self.cmd_tx.write().await.take();
        let Some(tx) = tx else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(Command::Shutdown { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
        *self.is_running.write().await = false;
        info!("call manager stopped");
        Ok(())
    }

    /// Whether the event loop is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Probe local hardware and network capability
    ///
    /// Pure point-in-time read; works whether or not a session is
    /// active and never gates `start_session`.
    pub async fn probe_system_status(&self) -> SystemStatus {
        self.prober.probe().await
    }

    /// Start a call session on the given channel
    ///
    /// Returns as soon as the command is validated: `Ok(handle)` means
    /// the session was accepted and is acquiring media; reaching
    /// `Connected` (or failing) is reported through the event feed.
    ///
    /// # Errors
    ///
    /// * [`CallError::AlreadySessionActive`] - a non-terminal session exists
    /// * [`CallError::NotRunning`] - the manager was not started
    pub async fn start_session(&self, channel_id: impl Into<String>) -> CallResult<SessionHandle> {
        let channel_id = channel_id.into();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Start {
            channel_id,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| CallError::internal("session loop dropped the start reply"))?
    }

    /// End the active session
    ///
    /// From `Connected`/`Reconnecting` this runs the full teardown to
    /// `Ended`. During setup (`AcquiringMedia`/`Joining`) it cancels the
    /// attempt, which unwinds to `Failed(Cancelled)`. With no active
    /// session it is an accepted no-op, which is what makes `end`
    /// idempotent.
    pub async fn end_session(&self) -> CallResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::End { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| CallError::internal("session loop dropped the end reply"))?
    }

    /// Toggle the local audio track's publish state
    ///
    /// Valid in `Connected`/`Reconnecting`. Returns the new enabled
    /// flag. A session without an audio track treats this as a no-op
    /// and returns the unchanged flag.
    pub async fn toggle_audio(&self) -> CallResult<bool> {
        self.toggle(MediaKind::Audio).await
    }

    /// Toggle the local video track's publish state
    ///
    /// Same contract as [`CallManager::toggle_audio`]; audio-only
    /// sessions (no video track acquired) no-op and return `false`.
    pub async fn toggle_video(&self) -> CallResult<bool> {
        self.toggle(MediaKind::Video).await
    }

    async fn toggle(&self, kind: MediaKind) -> CallResult<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Toggle {
            kind,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| CallError::internal("session loop dropped the toggle reply"))?
    }

    /// Subscribe to the session event feed
    ///
    /// Events arrive in the order the session loop processed them. The
    /// receiver lags (dropping oldest) if the subscriber falls more than
    /// the configured buffer behind.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register the event handler
    ///
    /// Replaces any previous handler. Handler methods run on a dedicated
    /// dispatch task, in event order.
    pub async fn set_event_handler(&self, handler: Arc<dyn SessionEventHandler>) {
        *self.handler.write().await = Some(handler);
    }

    /// Current session lifecycle state
    ///
    /// `Idle` when no session was ever started; after a session retires
    /// this reports the terminal state until the next `start_session`.
    pub async fn current_state(&self) -> SessionState {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// Immutable snapshot of the most recent session, if any
    pub async fn snapshot(&self) -> Option<CallSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Remote participants currently in the call, oldest first
    pub fn participants(&self) -> Vec<Participant> {
        let mut participants: Vec<Participant> =
            self.participants.iter().map(|e| e.value().clone()).collect();
        participants.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        participants
    }

    /// Aggregate session counters since the manager was created
    pub async fn stats(&self) -> SessionStats {
        self.stats.lock().await.clone()
    }

    async fn send_command(&self, command: Command) -> CallResult<()> {
        let guard = self.cmd_tx.read().await;
        let tx = guard.as_ref().ok_or(CallError::NotRunning)?;
        tx.send(command).map_err(|_| CallError::NotRunning)
    }
}

/// The single-writer session event loop
struct EventLoop {
    config: CallConfig,
    acquirer: Arc<dyn MediaAcquirer>,
    transport: Arc<dyn TransportClient>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    event_tx: broadcast::Sender<SessionEvent>,
    handler_tx: mpsc::UnboundedSender<SessionEvent>,
    snapshot: Arc<RwLock<Option<CallSnapshot>>>,
    participants: Arc<DashMap<String, Participant>>,
    stats: Arc<Mutex<SessionStats>>,
    session: Option<ActiveSession>,
    /// Current session attempt; stale completions carry an older value
    epoch: u64,
    cmd_open: bool,
    transport_open: bool,
    shutdown_requested: bool,
    pending_shutdown: Option<oneshot::Sender<()>>,
    should_exit: bool,
}

impl EventLoop {
    async fn run(mut self) {
        debug!("session event loop running");
        loop {
            tokio::select! {
                biased;
                maybe_cmd = self.cmd_rx.recv(), if self.cmd_open => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => self.handle_commands_closed().await,
                    }
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion).await;
                }
                maybe_event = self.transport_rx.recv(), if self.transport_open => {
                    match maybe_event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => self.handle_transport_closed().await,
                    }
                }
            }
            if self.should_exit {
                break;
            }
        }
        debug!("session event loop exited");
    }

    // ===== COMMANDS =====

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { channel_id, reply } => {
                self.handle_start(channel_id, reply).await;
            }
            Command::End { reply } => {
                self.handle_end(reply).await;
            }
            Command::Toggle { kind, reply } => {
                self.handle_toggle(kind, reply).await;
            }
            Command::Shutdown { reply } => {
                self.handle_shutdown(reply).await;
            }
        }
    }

    async fn handle_start(
        &mut self,
        channel_id: String,
        reply: oneshot::Sender<CallResult<SessionHandle>>,
    ) {
        if let Some(session) = &self.session {
            let _ = reply.send(Err(CallError::AlreadySessionActive {
                state: session.state,
            }));
            return;
        }
        if self.shutdown_requested {
            let _ = reply.send(Err(CallError::NotRunning));
            return;
        }

        self.epoch += 1;
        let id = CallId::new_v4();
        self.session = Some(ActiveSession::new(id, channel_id.clone()));
        self.stats.lock().await.total_sessions += 1;
        let _ = reply.send(Ok(SessionHandle {
            id,
            channel_id: channel_id.clone(),
        }));

        info!(session_id = %id, channel_id = %channel_id, "starting call session");
        self.transition(SessionState::AcquiringMedia, Some("start accepted".into()))
            .await;
        self.spawn_acquire();
    }

    async fn handle_end(&mut self, reply: oneshot::Sender<CallResult<()>>) {
        let state = self.session.as_ref().map(|s| s.state);
        match state {
            Some(state) if state.is_setting_up() => {
                if let Some(session) = self.session.as_mut() {
                    info!(session_id = %session.id, %state, "cancelling session during setup");
                    session.cancel_requested = true;
                }
                let _ = reply.send(Ok(()));
            }
            Some(state) if state.is_in_call() => {
                let _ = reply.send(Ok(()));
                self.finish_ended().await;
            }
            // no session, or teardown already under way: idempotent no-op
            _ => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn handle_toggle(&mut self, kind: MediaKind, reply: oneshot::Sender<CallResult<bool>>) {
        let state = self
            .session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle);
        if !state.is_in_call() {
            let operation = match kind {
                MediaKind::Audio => "toggle_audio",
                MediaKind::Video => "toggle_video",
            };
            let _ = reply.send(Err(CallError::InvalidState { operation, state }));
            return;
        }

        let Some((has_track, enabled)) = self.session.as_ref().map(|session| match kind {
            MediaKind::Audio => (session.tracks.has_audio(), session.tracks.audio_enabled),
            MediaKind::Video => (session.tracks.has_video(), session.tracks.video_enabled),
        }) else {
            let _ = reply.send(Err(CallError::InvalidState {
                operation: "toggle",
                state: SessionState::Idle,
            }));
            return;
        };
        if !has_track {
            // nothing to toggle; not an error
            debug!(%kind, "toggle ignored, no local track of that kind");
            let _ = reply.send(Ok(enabled));
            return;
        }

        let target = !enabled;
        // While Reconnecting the transport is down; the flag flips
        // locally and is applied by the re-publish on rejoin.
        if state == SessionState::Connected {
            let result = if target {
                self.transport.publish(&[kind]).await
            } else {
                self.transport.unpublish(&[kind]).await
            };
            if let Err(e) = result {
                warn!(%kind, error = %e, "transport toggle failed");
                let _ = reply.send(Err(CallError::Publish(e)));
                return;
            }
        }

        if let Some(session) = self.session.as_mut() {
            match kind {
                MediaKind::Audio => session.tracks.audio_enabled = target,
                MediaKind::Video => session.tracks.video_enabled = target,
            }
        }
        debug!(%kind, enabled = target, "local track toggled");
        self.publish_snapshot().await;
        let _ = reply.send(Ok(target));
    }

    async fn handle_shutdown(&mut self, reply: oneshot::Sender<()>) {
        self.shutdown_requested = true;
        let state = self.session.as_ref().map(|s| s.state);
        match state {
            Some(state) if state.is_setting_up() => {
                if let Some(session) = self.session.as_mut() {
                    session.cancel_requested = true;
                }
                // exits once the in-flight setup completion unwinds
                self.pending_shutdown = Some(reply);
            }
            Some(_) => {
                self.finish_ended().await;
                let _ = reply.send(());
                self.should_exit = true;
            }
            None => {
                let _ = reply.send(());
                self.should_exit = true;
            }
        }
    }

    async fn handle_commands_closed(&mut self) {
        // The manager was dropped; unwind like a shutdown with no reply.
        self.cmd_open = false;
        self.shutdown_requested = true;
        let state = self.session.as_ref().map(|s| s.state);
        match state {
            Some(state) if state.is_setting_up() => {
                if let Some(session) = self.session.as_mut() {
                    session.cancel_requested = true;
                }
            }
            Some(_) => self.finish_ended().await,
            None => self.should_exit = true,
        }
    }

    // ===== COMPLETIONS =====

    async fn handle_completion(&mut self, completion: Completion) {
        if completion.epoch() != self.epoch || self.session.is_none() {
            debug!(
                completion_epoch = completion.epoch(),
                current_epoch = self.epoch,
                "ignoring stale completion"
            );
            match completion {
                // tracks riding a stale acquire still go back to the platform
                Completion::AcquireDone { audio, video, .. } => {
                    if let Ok(track) = audio {
                        self.acquirer.release(track).await;
                    }
                    if let Some(Ok(track)) = video {
                        self.acquirer.release(track).await;
                    }
                }
                // a join that completed after its session retired, with no
                // replacement session on the channel, is followed by a leave
                Completion::JoinDone {
                    outcome: JoinOutcome::Complete,
                    ..
                } if self.session.is_none() => {
                    self.transport.leave().await;
                }
                _ => {}
            }
            return;
        }
        match completion {
            Completion::AcquireDone { audio, video, .. } => {
                self.handle_acquire_done(audio, video).await;
            }
            Completion::JoinDone { outcome, .. } => {
                self.handle_join_done(outcome).await;
            }
            Completion::RejoinDone {
                attempt, result, ..
            } => {
                self.handle_rejoin_done(attempt, result).await;
            }
            Completion::GraceElapsed { .. } => {
                self.handle_grace_elapsed().await;
            }
        }
    }

    async fn handle_acquire_done(
        &mut self,
        audio: Result<TrackHandle, AcquireError>,
        video: Option<Result<TrackHandle, AcquireError>>,
    ) {
        let state = self.session.as_ref().map(|s| s.state);
        if state != Some(SessionState::AcquiringMedia) {
            return;
        }
        let cancelled = self
            .session
            .as_ref()
            .map(|s| s.cancel_requested)
            .unwrap_or(false);

        let audio_track = match audio {
            Err(e) => {
                // audio is mandatory; a call without it is not useful
                if let Some(Ok(video_track)) = video {
                    self.acquirer.release(video_track).await;
                }
                let error = if cancelled {
                    CallError::Cancelled
                } else {
                    CallError::Acquire(e)
                };
                self.finish_failed(error, false).await;
                return;
            }
            Ok(track) => track,
        };

        if cancelled {
            self.acquirer.release(audio_track).await;
            if let Some(Ok(video_track)) = video {
                self.acquirer.release(video_track).await;
            }
            self.finish_failed(CallError::Cancelled, false).await;
            return;
        }

        let mut degraded = None;
        if let Some(session) = self.session.as_mut() {
            session.tracks.audio = Some(audio_track);
            session.tracks.audio_enabled = true;
            match video {
                Some(Ok(video_track)) => {
                    session.tracks.video = Some(video_track);
                    session.tracks.video_enabled = true;
                }
                Some(Err(e)) => {
                    // video-optional: degrade to audio-only and keep going
                    degraded = Some(format!("camera unavailable ({e}), continuing audio-only"));
                }
                None => {}
            }
        }
        if let Some(reason) = degraded {
            warn!(reason = %reason, "acquired audio only");
            self.emit(SessionEvent::Warning {
                reason,
                timestamp: Utc::now(),
            });
        }

        self.transition(SessionState::Joining, Some("local media acquired".into()))
            .await;
        let Some((channel_id, kinds)) = self
            .session
            .as_ref()
            .map(|s| (s.channel_id.clone(), s.tracks.enabled_kinds()))
        else {
            return;
        };
        self.spawn_join(channel_id, kinds);
    }

    async fn handle_join_done(&mut self, outcome: JoinOutcome) {
        let state = self.session.as_ref().map(|s| s.state);
        if state != Some(SessionState::Joining) {
            return;
        }
        let cancelled = self
            .session
            .as_ref()
            .map(|s| s.cancel_requested)
            .unwrap_or(false);

        match outcome {
            JoinOutcome::Complete => {
                if cancelled {
                    // joined and published, so unwind through the transport
                    self.finish_failed(CallError::Cancelled, true).await;
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.connected_at = Some(Utc::now());
                }
                info!("transport joined, session connected");
                self.transition(
                    SessionState::Connected,
                    Some("transport joined and tracks published".into()),
                )
                .await;
                // pick up publishes that raced the join
                self.resync_participants().await;
            }
            JoinOutcome::JoinFailed(e) => {
                let error = if cancelled {
                    CallError::Cancelled
                } else {
                    CallError::Join(e)
                };
                self.finish_failed(error, false).await;
            }
            JoinOutcome::PublishFailed(e) => {
                let error = if cancelled {
                    CallError::Cancelled
                } else {
                    CallError::Publish(e)
                };
                // the join succeeded, so leave on the way out
                self.finish_failed(error, true).await;
            }
        }
    }

    async fn handle_rejoin_done(&mut self, attempt: u32, result: Result<(), JoinError>) {
        let state = self.session.as_ref().map(|s| s.state);
        if state != Some(SessionState::Reconnecting) {
            return;
        }
        match result {
            // AlreadyJoined means the transport recovered on its own
            Ok(()) | Err(JoinError::AlreadyJoined) => {
                let kinds = self
                    .session
                    .as_ref()
                    .map(|s| s.tracks.enabled_kinds())
                    .unwrap_or_default();
                if !kinds.is_empty() {
                    if let Err(e) = self.transport.publish(&kinds).await {
                        warn!(attempt, error = %e, "republish after rejoin failed, retrying");
                        self.schedule_rejoin(attempt + 1);
                        return;
                    }
                }
                // cancels the grace timer and any stale attempt
                self.epoch += 1;
                info!(attempt, "rejoin succeeded");
                self.transition(SessionState::Connected, Some("rejoin succeeded".into()))
                    .await;
                self.resync_participants().await;
            }
            Err(e) => {
                debug!(attempt, error = %e, "rejoin attempt failed");
                self.schedule_rejoin(attempt + 1);
            }
        }
    }

    async fn handle_grace_elapsed(&mut self) {
        let state = self.session.as_ref().map(|s| s.state);
        if state != Some(SessionState::Reconnecting) {
            return;
        }
        let grace_secs = self.config.reconnect.grace_period.as_secs();
        warn!(grace_secs, "reconnect grace period exhausted");
        self.finish_failed(CallError::ReconnectTimeout { grace_secs }, true)
            .await;
    }

    // ===== TRANSPORT EVENTS =====

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ParticipantPublished {
                participant_id,
                kinds,
            } => {
                self.handle_participant_published(participant_id, kinds);
            }
            TransportEvent::ParticipantUnpublished { participant_id } => {
                self.handle_participant_unpublished(participant_id);
            }
            TransportEvent::ConnectionQualityChanged { level } => {
                self.handle_quality_changed(level);
            }
            TransportEvent::Disconnected { reason } => {
                self.handle_disconnected(reason).await;
            }
        }
    }

    fn handle_participant_published(&mut self, participant_id: String, kinds: Vec<MediaKind>) {
        let state = self.session.as_ref().map(|s| s.state);
        if !state.map(|s| s.is_in_call()).unwrap_or(false) {
            return;
        }
        let updated = {
            if let Some(mut entry) = self.participants.get_mut(&participant_id) {
                if kinds.contains(&MediaKind::Audio) {
                    entry.has_audio = true;
                }
                if kinds.contains(&MediaKind::Video) {
                    entry.has_video = true;
                }
                true
            } else {
                false
            }
        };
        if !updated {
            let participant = Participant {
                participant_id: participant_id.clone(),
                has_audio: kinds.contains(&MediaKind::Audio),
                has_video: kinds.contains(&MediaKind::Video),
                joined_at: Utc::now(),
            };
            debug!(participant_id = %participant_id, "participant joined");
            self.participants
                .insert(participant_id, participant.clone());
            self.emit(SessionEvent::ParticipantJoined {
                participant,
                timestamp: Utc::now(),
            });
        }
    }

    fn handle_participant_unpublished(&mut self, participant_id: String) {
        let state = self.session.as_ref().map(|s| s.state);
        if !state.map(|s| s.is_in_call()).unwrap_or(false) {
            return;
        }
        if self.participants.remove(&participant_id).is_some() {
            debug!(participant_id = %participant_id, "participant left");
            self.emit(SessionEvent::ParticipantLeft {
                participant_id,
                timestamp: Utc::now(),
            });
        }
    }

    fn handle_quality_changed(&mut self, level: QualityLevel) {
        let state = self.session.as_ref().map(|s| s.state);
        if state != Some(SessionState::Connected) {
            return;
        }
        let prior = self
            .session
            .as_mut()
            .map(|s| s.last_quality.replace(level))
            .unwrap_or(None);
        if level.is_degraded() && prior != Some(level) {
            self.emit(SessionEvent::Warning {
                reason: format!("connection quality degraded to {level:?}"),
                timestamp: Utc::now(),
            });
        }
    }

    async fn handle_disconnected(&mut self, reason: DisconnectReason) {
        let state = self.session.as_ref().map(|s| s.state);
        match (state, reason) {
            (Some(SessionState::Connected), DisconnectReason::Network) => {
                warn!("transport disconnected, entering reconnect");
                if let Some(session) = self.session.as_mut() {
                    session.last_quality = None;
                }
                self.transition(SessionState::Reconnecting, Some("network disconnect".into()))
                    .await;
                self.emit(SessionEvent::Warning {
                    reason: "connection lost, attempting to reconnect".into(),
                    timestamp: Utc::now(),
                });
                self.spawn_grace_timer();
                self.schedule_rejoin(1);
            }
            (Some(SessionState::Reconnecting), DisconnectReason::Network) => {
                debug!("network disconnect while already reconnecting");
            }
            (Some(state), reason) if state.is_in_call() => {
                // kicked or channel closed: not recoverable
                self.finish_failed(
                    CallError::internal(format!("transport disconnected: {reason}")),
                    true,
                )
                .await;
            }
            _ => {
                // setup failures surface through the join result instead
                debug!(%reason, "ignoring disconnect outside an established call");
            }
        }
    }

    async fn handle_transport_closed(&mut self) {
        self.transport_open = false;
        let state = self.session.as_ref().map(|s| s.state);
        if state.map(|s| !s.is_terminal()).unwrap_or(false) {
            self.finish_failed(
                CallError::internal("transport event stream closed"),
                false,
            )
            .await;
        }
    }

    // ===== SUB-TASKS =====

    fn spawn_acquire(&self) {
        let acquirer = Arc::clone(&self.acquirer);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        let want_video = self.config.enable_video;
        tokio::spawn(async move {
            let audio = acquirer.acquire_audio().await;
            let video = match (&audio, want_video) {
                (Ok(_), true) => Some(acquirer.acquire_video().await),
                _ => None,
            };
            let _ = tx.send(Completion::AcquireDone { epoch, audio, video });
        });
    }

    fn spawn_join(&self, channel_id: String, kinds: Vec<MediaKind>) {
        let transport = Arc::clone(&self.transport);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let outcome = match transport.join(&channel_id).await {
                Ok(()) => match transport.publish(&kinds).await {
                    Ok(()) => JoinOutcome::Complete,
                    Err(e) => JoinOutcome::PublishFailed(e),
                },
                Err(e) => JoinOutcome::JoinFailed(e),
            };
            let _ = tx.send(Completion::JoinDone { epoch, outcome });
        });
    }

    fn schedule_rejoin(&self, attempt: u32) {
        let delay = self.config.reconnect.delay_for_attempt(attempt);
        let channel_id = self
            .session
            .as_ref()
            .map(|s| s.channel_id.clone())
            .unwrap_or_default();
        let transport = Arc::clone(&self.transport);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling rejoin attempt");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = transport.join(&channel_id).await;
            let _ = tx.send(Completion::RejoinDone {
                epoch,
                attempt,
                result,
            });
        });
    }

    fn spawn_grace_timer(&self) {
        let grace = self.config.reconnect.grace_period;
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Completion::GraceElapsed { epoch });
        });
    }

    // ===== STATE MAINTENANCE =====

    /// Re-synchronize the participant table against the transport roster
    ///
    /// Removals fire retroactive `ParticipantLeft` events; fresh
    /// publishers unknown locally are added with `ParticipantJoined`.
    async fn resync_participants(&mut self) {
        let roster = self.transport.remote_publishers().await;
        let fresh: std::collections::HashSet<&str> =
            roster.iter().map(|p| p.participant_id.as_str()).collect();

        let stale: Vec<String> = self
            .participants
            .iter()
            .filter(|entry| !fresh.contains(entry.key().as_str()))
            .map(|entry| entry.key().clone())
            .collect();
        for participant_id in stale {
            self.participants.remove(&participant_id);
            debug!(participant_id = %participant_id, "participant absent after resync");
            self.emit(SessionEvent::ParticipantLeft {
                participant_id,
                timestamp: Utc::now(),
            });
        }

        for publisher in roster {
            let has_audio = publisher.kinds.contains(&MediaKind::Audio);
            let has_video = publisher.kinds.contains(&MediaKind::Video);
            let known = {
                if let Some(mut entry) = self.participants.get_mut(&publisher.participant_id) {
                    entry.has_audio = has_audio;
                    entry.has_video = has_video;
                    true
                } else {
                    false
                }
            };
            if !known {
                let participant = Participant {
                    participant_id: publisher.participant_id.clone(),
                    has_audio,
                    has_video,
                    joined_at: Utc::now(),
                };
                debug!(participant_id = %participant.participant_id, "participant present after resync");
                self.participants
                    .insert(publisher.participant_id, participant.clone());
                self.emit(SessionEvent::ParticipantJoined {
                    participant,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Tear down to `Ended` after a user-initiated end
    ///
    /// Every step runs even if an earlier one errored; teardown errors
    /// are logged, never surfaced as session failure.
    async fn finish_ended(&mut self) {
        self.epoch += 1;
        self.transition(SessionState::Ending, Some("user ended call".into()))
            .await;

        let kinds = self
            .session
            .as_ref()
            .map(|s| s.tracks.enabled_kinds())
            .unwrap_or_default();
        if !kinds.is_empty() {
            if let Err(e) = self.transport.unpublish(&kinds).await {
                warn!(error = %e, "unpublish during teardown failed");
            }
        }
        self.transport.leave().await;
        self.release_tracks().await;
        self.participants.clear();
        if let Some(session) = self.session.as_mut() {
            session.ended_at = Some(Utc::now());
        }
        self.transition(SessionState::Ended, Some("teardown complete".into()))
            .await;
        info!("call session ended");
        self.stats.lock().await.completed_sessions += 1;
        self.session = None;
        self.maybe_complete_shutdown();
    }

    /// Retire the session as `Failed`, surfacing the error exactly once
    async fn finish_failed(&mut self, error: CallError, leave_transport: bool) {
        self.epoch += 1;
        if leave_transport {
            let kinds = self
                .session
                .as_ref()
                .map(|s| s.tracks.enabled_kinds())
                .unwrap_or_default();
            if !kinds.is_empty() {
                if let Err(e) = self.transport.unpublish(&kinds).await {
                    warn!(error = %e, "unpublish during teardown failed");
                }
            }
            self.transport.leave().await;
        }
        self.release_tracks().await;
        self.participants.clear();
        if let Some(session) = self.session.as_mut() {
            session.ended_at = Some(Utc::now());
            session.last_error = Some(error.clone());
        }
        self.transition(SessionState::Failed, Some(error.to_string()))
            .await;
        error!(error = %error, category = error.category(), "call session failed");
        self.emit(SessionEvent::Error {
            error,
            timestamp: Utc::now(),
        });
        self.stats.lock().await.failed_sessions += 1;
        self.session = None;
        self.maybe_complete_shutdown();
    }

    async fn release_tracks(&mut self) {
        let tracks = self
            .session
            .as_mut()
            .map(|s| s.tracks.take_all())
            .unwrap_or_default();
        for track in tracks {
            self.acquirer.release(track).await;
        }
    }

    fn maybe_complete_shutdown(&mut self) {
        if self.shutdown_requested {
            if let Some(reply) = self.pending_shutdown.take() {
                let _ = reply.send(());
            }
            self.should_exit = true;
        }
    }

    async fn transition(&mut self, new_state: SessionState, reason: Option<String>) {
        let info = match self.session.as_mut() {
            Some(session) => {
                let previous = session.state;
                session.state = new_state;
                debug!(session_id = %session.id, from = %previous, to = %new_state, "state transition");
                StateChangeInfo {
                    session_id: session.id,
                    new_state,
                    previous_state: Some(previous),
                    reason,
                    timestamp: Utc::now(),
                }
            }
            None => return,
        };
        self.publish_snapshot().await;
        self.emit(SessionEvent::StateChanged { info });
    }

    async fn publish_snapshot(&self) {
        if let Some(snap) = self.session.as_ref().map(|s| s.to_snapshot()) {
            *self.snapshot.write().await = Some(snap);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // broadcast errors only mean "no subscribers right now"
        let _ = self.event_tx.send(event.clone());
        let _ = self.handler_tx.send(event);
    }
}
