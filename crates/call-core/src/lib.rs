//! Call session orchestration for the telecare client
//!
//! This crate takes a clinician from "no call" to a connected
//! audio/video session with remote participants and back again. It
//! sequences local device probing, media acquisition, and an injected
//! real-time transport into one session lifecycle state machine, keeps
//! the authoritative view of local and remote track state, and narrates
//! everything to the UI through a timestamped event feed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │     UI / Application    │
//! └───────┬─────────▲───────┘
//!   commands        │ events
//! ┌───────▼─────────┴───────┐
//! │       CallManager       │ ◄── this crate
//! │  (session state machine │
//! │   + participant table)  │
//! └──┬─────────┬─────────┬──┘
//!    │         │         │
//! ┌──▼───┐ ┌───▼────┐ ┌──▼──────┐
//! │Device│ │ Media  │ │Transport│  injected capabilities
//! │Prober│ │Acquirer│ │ Client  │
//! └──────┘ └────────┘ └─────────┘
//! ```
//!
//! The three capabilities at the bottom are trait objects supplied by
//! the embedding application (platform device layers, the media SDK),
//! which is what makes the whole lifecycle testable against fakes.
//!
//! # Key Behaviors
//!
//! - **One session at a time** - `start_session` rejects while a
//!   non-terminal session exists.
//! - **Audio-mandatory, video-optional** - a session without audio
//!   fails; one without video degrades with a warning.
//! - **Serialized state** - one event-loop task owns all session state;
//!   commands apply in FIFO order.
//! - **Reconnection** - mid-call network drops enter `Reconnecting`
//!   with backoff rejoins inside a configurable grace period.
//! - **Paired acquisition and release** - local tracks are released
//!   exactly once on every exit path: user end, cancellation, failure.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telecare_call_core::{
//!     CallConfig, CallManager, DeviceProber, MediaAcquirer, SessionEvent, TransportClient,
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
//! // pre-flight check, surfaced to the user but never blocking
//! let status = manager.probe_system_status().await;
//! println!("camera: {}, mic: {}", status.has_camera, status.has_microphone);
//!
//! let mut events = manager.subscribe();
//! manager.start_session("room-1").await?;
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         SessionEvent::StateChanged { info } => println!("-> {}", info.new_state),
//!         SessionEvent::ParticipantJoined { participant, .. } => {
//!             println!("{} joined", participant.participant_id)
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod error;
pub mod events;
pub mod media;
pub mod probe;
pub mod session;
pub mod transport;

pub use call::{CallId, CallSnapshot, Participant, SessionState, SessionStats};
pub use error::{AcquireError, CallError, CallResult, JoinError, TransportError};
pub use events::{SessionEvent, SessionEventHandler, StateChangeInfo};
pub use media::{LocalTrackSet, MediaAcquirer, MediaKind, TrackHandle};
pub use probe::{DeviceProber, SystemStatus};
pub use session::{CallConfig, CallManager, ReconnectPolicy, SessionHandle};
pub use transport::{
    DisconnectReason, QualityLevel, RemotePublisher, TransportClient, TransportEvent,
};
