//! Local media acquisition and track ownership
//!
//! A [`TrackHandle`] is an opaque, owned handle to one local capture
//! stream. Handles are not `Clone`: exactly one owner exists (the active
//! session), release goes through the [`MediaAcquirer`] that produced the
//! handle, and [`LocalTrackSet`] hands tracks out by `take` so a second
//! release pass finds nothing to do.
//!
//! The audio-mandatory / video-optional policy is NOT implemented here;
//! the session manager composes `acquire_audio`/`acquire_video` and
//! decides what a partial success means for the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AcquireError;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Microphone capture
    Audio,
    /// Camera capture
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Owned handle to a live local capture stream
///
/// Deliberately not `Clone`; ownership moves into the session on acquire
/// and back to the acquirer on release.
#[derive(Debug, PartialEq, Eq)]
pub struct TrackHandle {
    id: Uuid,
    kind: MediaKind,
}

impl TrackHandle {
    /// Create a handle for a newly captured stream
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }

    /// Stable identifier of the underlying stream
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Which capture stream this handle owns
    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// The local tracks owned by the active session
///
/// `audio`/`video` are populated between acquisition and the transition
/// into a terminal state; the enabled flags track publish state and
/// survive the handle (a muted track keeps its handle).
#[derive(Debug, Default)]
pub struct LocalTrackSet {
    /// Microphone track, if acquired
    pub audio: Option<TrackHandle>,
    /// Camera track, if acquired (absent in audio-only sessions)
    pub video: Option<TrackHandle>,
    /// Whether the audio track is published to the transport
    pub audio_enabled: bool,
    /// Whether the video track is published to the transport
    pub video_enabled: bool,
}

impl LocalTrackSet {
    /// A set holding no tracks
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether an audio track is held
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Whether a video track is held
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Kinds that are held and currently enabled, in publish order
    pub fn enabled_kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio.is_some() && self.audio_enabled {
            kinds.push(MediaKind::Audio);
        }
        if self.video.is_some() && self.video_enabled {
            kinds.push(MediaKind::Video);
        }
        kinds
    }

    /// Remove and return every held track, leaving the set empty
    ///
    /// The caller forwards the drained handles to
    /// [`MediaAcquirer::release`]. Draining twice yields nothing, which
    /// is what makes release idempotent at the set level.
    pub fn take_all(&mut self) -> Vec<TrackHandle> {
        let mut tracks = Vec::with_capacity(2);
        if let Some(track) = self.audio.take() {
            tracks.push(track);
        }
        if let Some(track) = self.video.take() {
            tracks.push(track);
        }
        self.audio_enabled = false;
        self.video_enabled = false;
        tracks
    }
}

/// Requests and releases local capture tracks from the platform
///
/// Audio and video are acquired independently; the acquirer is expected
/// to enforce its own timeout and report it as [`AcquireError::Timeout`].
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    /// Request a microphone track
    async fn acquire_audio(&self) -> Result<TrackHandle, AcquireError>;

    /// Request a camera track
    async fn acquire_video(&self) -> Result<TrackHandle, AcquireError>;

    /// Return a track to the platform
    ///
    /// Best-effort; implementations log failures rather than surface
    /// them (there is nothing a caller can do with a failed release).
    async fn release(&self, track: TrackHandle);
}
