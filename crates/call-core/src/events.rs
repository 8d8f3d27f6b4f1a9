//! Session event feed
//!
//! Everything the session manager does is narrated through
//! [`SessionEvent`]s: lifecycle transitions, participant churn,
//! non-fatal warnings, and the single terminal error of a failed
//! session. Events are timestamped and delivered in the order the
//! manager's event loop processed their causes.
//!
//! Two consumption styles are supported, both fed identically:
//! a `broadcast` stream obtained from `CallManager::subscribe`, and a
//! [`SessionEventHandler`] registered with
//! `CallManager::set_event_handler` whose methods run on a dedicated
//! dispatch task (so a slow handler can never stall the session loop).
//!
//! # Usage Examples
//!
//! ```rust
//! use telecare_call_core::{SessionEventHandler, StateChangeInfo, Participant};
//! use async_trait::async_trait;
//!
//! struct LoggingHandler;
//!
//! #[async_trait]
//! impl SessionEventHandler for LoggingHandler {
//!     async fn on_state_changed(&self, info: StateChangeInfo) {
//!         println!("session {} is now {}", info.session_id, info.new_state);
//!     }
//!
//!     async fn on_participant_joined(&self, participant: Participant) {
//!         println!("{} joined", participant.participant_id);
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::call::{CallId, Participant, SessionState};
use crate::error::CallError;

/// Details of one session state transition
#[derive(Debug, Clone)]
pub struct StateChangeInfo {
    /// Session that transitioned
    pub session_id: CallId,
    /// State after the transition
    pub new_state: SessionState,
    /// State before the transition, if there was one
    pub previous_state: Option<SessionState>,
    /// Human-readable cause (e.g. "rejoin succeeded", "user ended call")
    pub reason: Option<String>,
    /// When the transition was applied
    pub timestamp: DateTime<Utc>,
}

/// Events emitted by the call session manager
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new lifecycle state
    StateChanged {
        /// Transition details
        info: StateChangeInfo,
    },
    /// A remote participant entered the call
    ParticipantJoined {
        /// The participant as first seen
        participant: Participant,
        /// When the join was processed
        timestamp: DateTime<Utc>,
    },
    /// A remote participant left the call
    ParticipantLeft {
        /// Identifier of the departed participant
        participant_id: String,
        /// When the departure was processed
        timestamp: DateTime<Utc>,
    },
    /// A non-fatal degradation worth showing the user
    Warning {
        /// What degraded (e.g. audio-only fallback, poor connection)
        reason: String,
        /// When the warning was raised
        timestamp: DateTime<Utc>,
    },
    /// The error that retired a session attempt; fires at most once per attempt
    Error {
        /// The terminal error
        error: CallError,
        /// When the failure was processed
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// When the event was produced by the session loop
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::StateChanged { info } => info.timestamp,
            SessionEvent::ParticipantJoined { timestamp, .. } => *timestamp,
            SessionEvent::ParticipantLeft { timestamp, .. } => *timestamp,
            SessionEvent::Warning { timestamp, .. } => *timestamp,
            SessionEvent::Error { timestamp, .. } => *timestamp,
        }
    }

    /// The new state, for state-change events
    pub fn state(&self) -> Option<SessionState> {
        match self {
            SessionEvent::StateChanged { info } => Some(info.new_state),
            _ => None,
        }
    }
}

/// Handler trait for session events
///
/// State changes must be handled; the participant, warning, and error
/// methods default to no-ops. Handlers observe, they do not steer: all
/// session mutation goes through the manager's command operations.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    /// The session moved to a new lifecycle state
    async fn on_state_changed(&self, info: StateChangeInfo);

    /// A remote participant entered the call
    async fn on_participant_joined(&self, _participant: Participant) {}

    /// A remote participant left the call
    async fn on_participant_left(&self, _participant_id: String) {}

    /// A non-fatal degradation occurred
    async fn on_warning(&self, _reason: String) {}

    /// The session attempt failed terminally
    async fn on_error(&self, _error: CallError) {}

    /// Unified dispatcher; override only for custom routing
    async fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { info } => self.on_state_changed(info).await,
            SessionEvent::ParticipantJoined { participant, .. } => {
                self.on_participant_joined(participant).await
            }
            SessionEvent::ParticipantLeft { participant_id, .. } => {
                self.on_participant_left(participant_id).await
            }
            SessionEvent::Warning { reason, .. } => self.on_warning(reason).await,
            SessionEvent::Error { error, .. } => self.on_error(error).await,
        }
    }
}
