//! Device and network probing
//!
//! A [`DeviceProber`] answers "what could a call use right now": camera
//! and microphone presence, an estimate of available bandwidth, and
//! whether the transport endpoint answers at all. Probing is a pure
//! point-in-time read with no session state; the result is advisory and
//! never gates `start_session` (that decision belongs to the caller).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of local capability
///
/// Produced fresh on every probe and never mutated in place. Unknown or
/// unavailable capabilities degrade to `false`/`0.0` rather than erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Whether a camera is present and visible to the platform
    pub has_camera: bool,
    /// Whether a microphone is present and visible to the platform
    pub has_microphone: bool,
    /// Rough estimate of available bandwidth, in megabits per second
    pub estimated_network_mbps: f64,
    /// Whether the transport endpoint responded to a reachability check
    pub transport_reachable: bool,
    /// When this snapshot was taken
    pub probed_at: DateTime<Utc>,
}

impl SystemStatus {
    /// Snapshot representing a fully degraded environment
    ///
    /// Used by probers as the fallback when the platform query itself is
    /// unavailable; probing never fails, it degrades.
    pub fn unavailable() -> Self {
        Self {
            has_camera: false,
            has_microphone: false,
            estimated_network_mbps: 0.0,
            transport_reachable: false,
            probed_at: Utc::now(),
        }
    }
}

/// Queries local hardware and network capability
///
/// Implementations wrap the platform's device enumeration and a cheap
/// reachability check. Injected into the manager so tests and platforms
/// supply their own.
#[async_trait]
pub trait DeviceProber: Send + Sync {
    /// Produce a fresh [`SystemStatus`] snapshot
    ///
    /// Must not fail; degrade unknown capabilities instead.
    async fn probe(&self) -> SystemStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_fully_degraded() {
        let status = SystemStatus::unavailable();
        assert!(!status.has_camera);
        assert!(!status.has_microphone);
        assert_eq!(status.estimated_network_mbps, 0.0);
        assert!(!status.transport_reachable);
    }
}
