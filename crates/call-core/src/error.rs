//! Error types for call session orchestration
//!
//! The taxonomy separates capability failures (device acquisition,
//! transport join, transport operations) from session-level contract
//! violations so the UI layer can pick distinct recovery copy per kind:
//! a `PermissionDenied` wants "grant camera access", a `NetworkTimeout`
//! wants "check your connection".
//!
//! # Usage Examples
//!
//! ```rust
//! use telecare_call_core::{CallError, AcquireError};
//!
//! let err = CallError::from(AcquireError::PermissionDenied);
//! assert_eq!(err.category(), "media");
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

use crate::call::SessionState;

/// Result type for call session operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors from local media acquisition
///
/// Returned by [`crate::media::MediaAcquirer`] when camera or microphone
/// capture cannot be obtained. The acquirer owns its own timeout.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The user (or platform policy) denied access to the capture device
    #[error("permission to use the capture device was denied")]
    PermissionDenied,

    /// No usable capture device is present or it is held by another process
    #[error("no usable capture device is available")]
    DeviceUnavailable,

    /// The platform did not hand over the device within the acquire window
    #[error("device acquisition timed out")]
    Timeout,
}

/// Errors from joining a transport channel
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// The channel has reached its participant limit
    #[error("the channel is full")]
    ChannelFull,

    /// The client is not authorized to join this channel
    #[error("not authorized to join the channel")]
    Unauthorized,

    /// The transport could not be reached within the join window
    #[error("network timeout while joining the channel")]
    NetworkTimeout,

    /// The transport believes it is already joined to a channel
    #[error("already joined to a channel")]
    AlreadyJoined,
}

/// Errors from transport operations on an established connection
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The operation requires a joined channel
    #[error("transport is not joined to a channel")]
    NotJoined,

    /// The transport reported a failure it could not classify further
    #[error("transport operation failed: {reason}")]
    OperationFailed {
        /// Transport-supplied failure description
        reason: String,
    },
}

/// Unified error type for the call session orchestrator
///
/// Setup-chain failures (`Acquire`, `Join`, `Publish`) are terminal for
/// that session attempt and surfaced once through the event feed; contract
/// violations (`AlreadySessionActive`, `InvalidState`, `NotRunning`) are
/// returned synchronously from the offending call and mutate nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// A session is already active; only one non-terminal session may exist
    #[error("a session is already active (state: {state})")]
    AlreadySessionActive {
        /// State of the session that blocked the command
        state: SessionState,
    },

    /// The operation is not permitted in the session's current state
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        /// Name of the rejected operation
        operation: &'static str,
        /// Session state at the time of the call
        state: SessionState,
    },

    /// Local media acquisition failed (audio is mandatory)
    #[error("media acquisition failed: {0}")]
    Acquire(#[from] AcquireError),

    /// Joining the transport channel failed
    #[error("joining the channel failed: {0}")]
    Join(#[from] JoinError),

    /// Publishing local tracks after a successful join failed
    #[error("publishing local tracks failed: {0}")]
    Publish(#[from] TransportError),

    /// The reconnect grace period elapsed without recovering the transport
    #[error("reconnect grace period of {grace_secs}s elapsed without recovering")]
    ReconnectTimeout {
        /// Length of the grace period that was exhausted, in seconds
        grace_secs: u64,
    },

    /// The session was cancelled by the user before setup completed
    #[error("session was cancelled before setup completed")]
    Cancelled,

    /// The manager has not been started (or was stopped)
    #[error("call manager is not running")]
    NotRunning,

    /// An unrecoverable internal error retired the session
    #[error("internal error: {message}")]
    Internal {
        /// Description of what went wrong
        message: String,
    },
}

impl CallError {
    /// Create an internal error from any displayable message
    pub fn internal(message: impl Into<String>) -> Self {
        CallError::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed
    ///
    /// Only transient network conditions qualify; permission and
    /// capacity failures need user or operator action first.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CallError::Join(JoinError::NetworkTimeout) | CallError::Acquire(AcquireError::Timeout)
        )
    }

    /// Coarse classification used by the UI to pick recovery copy
    ///
    /// Returns one of `"media"`, `"transport"`, `"session"`, `"internal"`.
    pub fn category(&self) -> &'static str {
        match self {
            CallError::Acquire(_) => "media",
            CallError::Join(_)
            | CallError::Publish(_)
            | CallError::ReconnectTimeout { .. } => "transport",
            CallError::AlreadySessionActive { .. }
            | CallError::InvalidState { .. }
            | CallError::Cancelled
            | CallError::NotRunning => "session",
            CallError::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_errors_are_media_category() {
        for kind in [
            AcquireError::PermissionDenied,
            AcquireError::DeviceUnavailable,
            AcquireError::Timeout,
        ] {
            assert_eq!(CallError::from(kind).category(), "media");
        }
    }

    #[test]
    fn join_errors_are_transport_category() {
        assert_eq!(CallError::from(JoinError::ChannelFull).category(), "transport");
        assert_eq!(
            CallError::ReconnectTimeout { grace_secs: 30 }.category(),
            "transport"
        );
    }

    #[test]
    fn only_transient_network_conditions_are_recoverable() {
        assert!(CallError::from(JoinError::NetworkTimeout).is_recoverable());
        assert!(CallError::from(AcquireError::Timeout).is_recoverable());
        assert!(!CallError::from(JoinError::Unauthorized).is_recoverable());
        assert!(!CallError::from(AcquireError::PermissionDenied).is_recoverable());
        assert!(!CallError::Cancelled.is_recoverable());
    }

    #[test]
    fn messages_name_the_failing_concern() {
        let err = CallError::InvalidState {
            operation: "toggle_audio",
            state: SessionState::Idle,
        };
        assert_eq!(err.to_string(), "toggle_audio is not valid in state Idle");
    }
}
