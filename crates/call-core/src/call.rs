//! Core call types
//!
//! This module contains the session state machine enum, participant
//! bookkeeping types, and the read-model snapshot the UI consumes. The
//! live session aggregate itself is private to the manager's event loop;
//! everything here is safe to clone out to subscribers.
//!
//! # Usage Examples
//!
//! ```rust
//! use telecare_call_core::SessionState;
//!
//! let state = SessionState::Connected;
//! assert!(state.is_in_call());
//! assert!(!state.is_terminal());
//! println!("Session is {}", state);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// Unique identifier for a call session, generated at `start_session`
pub type CallId = uuid::Uuid;

/// States of the call session lifecycle
///
/// # State Transitions
///
/// ```text
/// Idle -> AcquiringMedia          on start_session(channel_id)
/// AcquiringMedia -> Joining       on acquire success
/// AcquiringMedia -> Failed        on acquire failure (audio) or cancel
/// Joining -> Connected            on transport join + publish success
/// Joining -> Failed               on join/publish failure or cancel
/// Connected -> Reconnecting       on network disconnect
/// Connected -> Ending             on end_session()
/// Reconnecting -> Connected       on rejoin within the grace period
/// Reconnecting -> Failed          on grace period exhaustion
/// Ending -> Ended                 on teardown complete
/// ```
///
/// `Ended` and `Failed` are terminal; a session that reaches either is
/// destroyed and a new `start_session` may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No session exists
    Idle,
    /// Requesting camera/microphone tracks from the platform
    AcquiringMedia,
    /// Local tracks acquired; joining the transport channel
    Joining,
    /// Joined and publishing; remote participants flow in
    Connected,
    /// Transport dropped; attempting to recover within the grace period
    Reconnecting,
    /// User-initiated teardown in progress
    Ending,
    /// Session completed normally (terminal)
    Ended,
    /// Session retired by an error or cancellation (terminal)
    Failed,
}

impl SessionState {
    /// Whether this state is terminal (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }

    /// Whether the session is established with the transport
    ///
    /// Participant bookkeeping and media toggles are only valid here.
    pub fn is_in_call(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Reconnecting)
    }

    /// Whether the setup chain (acquire or join) is still in flight
    pub fn is_setting_up(&self) -> bool {
        matches!(self, SessionState::AcquiringMedia | SessionState::Joining)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::AcquiringMedia => write!(f, "AcquiringMedia"),
            SessionState::Joining => write!(f, "Joining"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Reconnecting => write!(f, "Reconnecting"),
            SessionState::Ending => write!(f, "Ending"),
            SessionState::Ended => write!(f, "Ended"),
            SessionState::Failed => write!(f, "Failed"),
        }
    }
}

/// One remote party currently publishing into the channel
///
/// Presence in the manager's participant table is the definition of
/// "currently in the call"; there is no pending state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Transport-assigned identifier for the remote party
    pub participant_id: String,
    /// Whether the participant is publishing audio
    pub has_audio: bool,
    /// Whether the participant is publishing video
    pub has_video: bool,
    /// When the participant was first seen publishing
    pub joined_at: DateTime<Utc>,
}

/// Immutable view of the session aggregate, published after every mutation
///
/// Subscribers never see a live reference; the event loop is the only
/// writer and hands out clones of this snapshot.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    /// Session identifier generated at `start_session`
    pub id: CallId,
    /// Channel the session targets
    pub channel_id: String,
    /// Current lifecycle state
    pub state: SessionState,
    /// Whether the local audio track is currently published
    pub audio_enabled: bool,
    /// Whether the local video track is currently published
    pub video_enabled: bool,
    /// Whether a local audio track is held
    pub has_local_audio: bool,
    /// Whether a local video track is held (false in audio-only sessions)
    pub has_local_video: bool,
    /// When `start_session` accepted the command
    pub started_at: DateTime<Utc>,
    /// When the session first reached `Connected`, if it did
    pub connected_at: Option<DateTime<Utc>>,
    /// When the session reached a terminal state, if it has
    pub ended_at: Option<DateTime<Utc>>,
    /// The error that retired the session, for `Failed` sessions
    pub last_error: Option<CallError>,
}

/// Aggregate counters over the manager's lifetime
///
/// At most one of the counted sessions is ever live at a time; the
/// counters exist for status displays and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Sessions accepted by `start_session` since the manager started
    pub total_sessions: usize,
    /// Sessions that reached `Ended`
    pub completed_sessions: usize,
    /// Sessions that reached `Failed`
    pub failed_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SessionState::Ended.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        for state in [
            SessionState::Idle,
            SessionState::AcquiringMedia,
            SessionState::Joining,
            SessionState::Connected,
            SessionState::Reconnecting,
            SessionState::Ending,
        ] {
            assert!(!state.is_terminal(), "{state} must not be terminal");
        }
    }

    #[test]
    fn in_call_states() {
        assert!(SessionState::Connected.is_in_call());
        assert!(SessionState::Reconnecting.is_in_call());
        assert!(!SessionState::Joining.is_in_call());
        assert!(!SessionState::Ending.is_in_call());
    }

    #[test]
    fn display_matches_variant_names() {
        assert_eq!(SessionState::AcquiringMedia.to_string(), "AcquiringMedia");
        assert_eq!(SessionState::Reconnecting.to_string(), "Reconnecting");
    }
}
