//! Transport client interface
//!
//! The orchestrator rides on an external real-time media transport; this
//! module is the seam. A [`TransportClient`] carries channel membership
//! (join/leave), local publish state, a roster snapshot, and an event
//! stream delivered over a channel rather than ad hoc callbacks so the
//! session event loop consumes transport activity in a deterministic
//! order.
//!
//! Ordering guarantee at this boundary: events for a given participant
//! arrive in order; there is no cross-participant ordering guarantee.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{JoinError, TransportError};
use crate::media::MediaKind;

/// Why the transport lost the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Connectivity loss; the session may recover within the grace period
    Network,
    /// The channel was closed by the far side; not recoverable
    ChannelClosed,
    /// This client was removed from the channel; not recoverable
    Kicked,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Network => write!(f, "network"),
            DisconnectReason::ChannelClosed => write!(f, "channel closed"),
            DisconnectReason::Kicked => write!(f, "kicked"),
        }
    }
}

/// Coarse connection quality as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityLevel {
    /// No perceivable degradation
    Excellent,
    /// Minor degradation, no action needed
    Good,
    /// Noticeable degradation; worth telling the user
    Poor,
    /// Barely usable
    Bad,
}

impl QualityLevel {
    /// Whether this level is worth a user-facing warning
    pub fn is_degraded(&self) -> bool {
        matches!(self, QualityLevel::Poor | QualityLevel::Bad)
    }
}

/// A remote party currently publishing, as reported by the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePublisher {
    /// Transport-assigned participant identifier
    pub participant_id: String,
    /// Media kinds the participant is publishing
    pub kinds: Vec<MediaKind>,
}

/// Events emitted by the transport while joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote participant started publishing the listed kinds
    ParticipantPublished {
        /// Transport-assigned participant identifier
        participant_id: String,
        /// Kinds now being published by that participant
        kinds: Vec<MediaKind>,
    },
    /// A remote participant stopped publishing entirely
    ParticipantUnpublished {
        /// Transport-assigned participant identifier
        participant_id: String,
    },
    /// The transport's estimate of connection quality changed
    ConnectionQualityChanged {
        /// New quality level
        level: QualityLevel,
    },
    /// The channel was lost
    Disconnected {
        /// Why the channel was lost
        reason: DisconnectReason,
    },
}

/// External real-time media transport consumed by the session manager
///
/// Injected, never constructed inside the orchestrator, so the whole
/// session lifecycle is testable against a fake.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Join the given channel
    async fn join(&self, channel_id: &str) -> Result<(), JoinError>;

    /// Leave the current channel
    ///
    /// Best-effort network notification; local state is authoritative
    /// and the call always succeeds from the caller's perspective.
    async fn leave(&self);

    /// Start publishing the given local track kinds
    async fn publish(&self, kinds: &[MediaKind]) -> Result<(), TransportError>;

    /// Stop publishing the given local track kinds
    ///
    /// The track handles stay alive; this is the mute path.
    async fn unpublish(&self, kinds: &[MediaKind]) -> Result<(), TransportError>;

    /// Snapshot of the participants currently publishing into the channel
    ///
    /// Used to synchronize local bookkeeping on connect and after a
    /// rejoin, when events may have been missed.
    async fn remote_publishers(&self) -> Vec<RemotePublisher>;

    /// Subscribe to the transport's event stream
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}
