//! Shared fakes and helpers for the session lifecycle tests
//!
//! The fakes implement the three injected capabilities with programmable
//! outcomes: the acquirer can fail per kind and delay (to open a
//! cancellation window under the paused clock), the transport can queue
//! join results, flip into always-failing mode, and inject events into
//! its subscriber stream.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use telecare_call_core::{
    AcquireError, CallConfig, CallError, CallManager, DeviceProber, JoinError, MediaAcquirer,
    MediaKind, Participant, RemotePublisher, SessionEvent, SessionState, SystemStatus,
    TrackHandle, TransportClient, TransportError, TransportEvent,
};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("telecare_call_core=debug")
        .with_test_writer()
        .try_init();
}

// ===== FAKE PROBER =====

pub struct FakeProber {
    pub has_camera: bool,
    pub has_microphone: bool,
}

impl FakeProber {
    pub fn full() -> Self {
        Self {
            has_camera: true,
            has_microphone: true,
        }
    }

    pub fn no_camera() -> Self {
        Self {
            has_camera: false,
            has_microphone: true,
        }
    }
}

#[async_trait]
impl DeviceProber for FakeProber {
    async fn probe(&self) -> SystemStatus {
        SystemStatus {
            has_camera: self.has_camera,
            has_microphone: self.has_microphone,
            estimated_network_mbps: 25.0,
            transport_reachable: true,
            probed_at: Utc::now(),
        }
    }
}

// ===== FAKE ACQUIRER =====

#[derive(Default)]
pub struct FakeAcquirer {
    audio_results: Mutex<VecDeque<Result<(), AcquireError>>>,
    video_results: Mutex<VecDeque<Result<(), AcquireError>>>,
    delay: Option<Duration>,
    acquired: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl FakeAcquirer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next audio acquisition
    pub fn fail_audio(self, error: AcquireError) -> Self {
        self.audio_results.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queue a failure for the next video acquisition
    pub fn fail_video(self, error: AcquireError) -> Self {
        self.video_results.lock().unwrap().push_back(Err(error));
        self
    }

    /// Make every acquisition sleep first (opens a cancellation window)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn acquired_ids(&self) -> Vec<String> {
        self.acquired.lock().unwrap().clone()
    }

    pub fn released_ids(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    async fn acquire(&self, kind: MediaKind) -> Result<TrackHandle, AcquireError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let results = match kind {
            MediaKind::Audio => &self.audio_results,
            MediaKind::Video => &self.video_results,
        };
        let next = results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next.map(|_| {
            let track = TrackHandle::new(kind);
            self.acquired.lock().unwrap().push(track.id().to_string());
            track
        })
    }
}

#[async_trait]
impl MediaAcquirer for FakeAcquirer {
    async fn acquire_audio(&self) -> Result<TrackHandle, AcquireError> {
        self.acquire(MediaKind::Audio).await
    }

    async fn acquire_video(&self) -> Result<TrackHandle, AcquireError> {
        self.acquire(MediaKind::Video).await
    }

    async fn release(&self, track: TrackHandle) {
        self.released.lock().unwrap().push(track.id().to_string());
    }
}

// ===== FAKE TRANSPORT =====

#[derive(Default)]
pub struct FakeTransport {
    join_results: Mutex<VecDeque<Result<(), JoinError>>>,
    publish_results: Mutex<VecDeque<Result<(), TransportError>>>,
    join_delay: Mutex<Option<Duration>>,
    fail_joins: AtomicBool,
    pub join_count: AtomicUsize,
    pub leave_count: AtomicUsize,
    publish_log: Mutex<Vec<Vec<MediaKind>>>,
    unpublish_log: Mutex<Vec<Vec<MediaKind>>>,
    roster: Mutex<Vec<RemotePublisher>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next join call
    pub fn queue_join_result(&self, result: Result<(), JoinError>) {
        self.join_results.lock().unwrap().push_back(result);
    }

    /// Queue the outcome of the next publish call
    pub fn queue_publish_result(&self, result: Result<(), TransportError>) {
        self.publish_results.lock().unwrap().push_back(result);
    }

    /// Make every join fail with `NetworkTimeout` until turned off
    pub fn set_fail_joins(&self, fail: bool) {
        self.fail_joins.store(fail, Ordering::SeqCst);
    }

    /// Make every join sleep first (opens a cancellation window)
    pub fn set_join_delay(&self, delay: Duration) {
        *self.join_delay.lock().unwrap() = Some(delay);
    }

    /// Replace the roster returned by `remote_publishers`
    pub fn set_roster(&self, roster: Vec<RemotePublisher>) {
        *self.roster.lock().unwrap() = roster;
    }

    /// Inject an event into every subscriber's stream
    pub fn emit(&self, event: TransportEvent) {
        for subscriber in self.subscribers.lock().unwrap().iter() {
            let _ = subscriber.send(event.clone());
        }
    }

    pub fn joins(&self) -> usize {
        self.join_count.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leave_count.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Vec<MediaKind>> {
        self.publish_log.lock().unwrap().clone()
    }

    pub fn unpublished(&self) -> Vec<Vec<MediaKind>> {
        self.unpublish_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportClient for FakeTransport {
    async fn join(&self, _channel_id: &str) -> Result<(), JoinError> {
        let delay = *self.join_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.join_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(JoinError::NetworkTimeout);
        }
        self.join_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn leave(&self) {
        self.leave_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn publish(&self, kinds: &[MediaKind]) -> Result<(), TransportError> {
        self.publish_log.lock().unwrap().push(kinds.to_vec());
        self.publish_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn unpublish(&self, kinds: &[MediaKind]) -> Result<(), TransportError> {
        self.unpublish_log.lock().unwrap().push(kinds.to_vec());
        Ok(())
    }

    async fn remote_publishers(&self) -> Vec<RemotePublisher> {
        self.roster.lock().unwrap().clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

// ===== TEST RIG =====

pub struct TestRig {
    pub manager: CallManager,
    pub transport: std::sync::Arc<FakeTransport>,
    pub acquirer: std::sync::Arc<FakeAcquirer>,
    pub events: broadcast::Receiver<SessionEvent>,
}

pub async fn rig() -> TestRig {
    rig_with(CallConfig::default(), FakeAcquirer::new(), FakeProber::full()).await
}

pub async fn rig_with(config: CallConfig, acquirer: FakeAcquirer, prober: FakeProber) -> TestRig {
    init_logging();
    let transport = std::sync::Arc::new(FakeTransport::new());
    let acquirer = std::sync::Arc::new(acquirer);
    let manager = CallManager::new(
        config,
        std::sync::Arc::new(prober),
        acquirer.clone(),
        transport.clone(),
    );
    manager.start().await.expect("manager start");
    let events = manager.subscribe();
    TestRig {
        manager,
        transport,
        acquirer,
        events,
    }
}

// ===== EVENT ASSERTIONS =====

pub async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream closed")
}

pub async fn expect_state(
    events: &mut broadcast::Receiver<SessionEvent>,
    expected: SessionState,
) {
    let event = next_event(events).await;
    match event {
        SessionEvent::StateChanged { ref info } if info.new_state == expected => {}
        other => panic!("expected StateChanged({expected}), got {other:?}"),
    }
}

pub async fn expect_participant_joined(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> Participant {
    match next_event(events).await {
        SessionEvent::ParticipantJoined { participant, .. } => participant,
        other => panic!("expected ParticipantJoined, got {other:?}"),
    }
}

pub async fn expect_participant_left(events: &mut broadcast::Receiver<SessionEvent>) -> String {
    match next_event(events).await {
        SessionEvent::ParticipantLeft { participant_id, .. } => participant_id,
        other => panic!("expected ParticipantLeft, got {other:?}"),
    }
}

pub async fn expect_warning(events: &mut broadcast::Receiver<SessionEvent>) -> String {
    match next_event(events).await {
        SessionEvent::Warning { reason, .. } => reason,
        other => panic!("expected Warning, got {other:?}"),
    }
}

pub async fn expect_error(events: &mut broadcast::Receiver<SessionEvent>) -> CallError {
    match next_event(events).await {
        SessionEvent::Error { error, .. } => error,
        other => panic!("expected Error, got {other:?}"),
    }
}

/// Drive a fresh rig into `Connected`, asserting the setup event sequence
pub async fn connect(rig: &mut TestRig, channel_id: &str) {
    rig.manager
        .start_session(channel_id)
        .await
        .expect("start_session");
    expect_state(&mut rig.events, SessionState::AcquiringMedia).await;
    expect_state(&mut rig.events, SessionState::Joining).await;
    expect_state(&mut rig.events, SessionState::Connected).await;
}
