use crate::media::{CaptureKind, TrackSource};
use meshlink_core::PeerId;
use thiserror::Error;

/// Failure reported by a capture backend when opening a device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission to capture {0} was denied")]
    PermissionDenied(CaptureKind),

    #[error("no {kind} device matches {device_id:?}")]
    DeviceNotFound {
        kind: CaptureKind,
        device_id: Option<String>,
    },

    #[error("{0}")]
    Device(String),
}

/// Local capture could not be started. Nothing acquired by the failed
/// attempt is left running.
#[derive(Debug, Error)]
pub enum MediaAccessError {
    #[error("failed to open {kind}: {source}")]
    Capture {
        kind: CaptureKind,
        #[source]
        source: CaptureError,
    },

    #[error("local media is already running")]
    AlreadyStarted,

    #[error("local media was stopped while {0} was being acquired")]
    Discarded(CaptureKind),
}

/// Device swap failed; the previous track is still active and attached.
#[derive(Debug, Error)]
pub enum DeviceSwapError {
    #[error("no active {0} track to replace")]
    NoActiveTrack(TrackSource),

    #[error("cannot open {source_kind} device {device_id}: {cause}")]
    Open {
        source_kind: TrackSource,
        device_id: String,
        #[source]
        cause: CaptureError,
    },

    #[error("replacing {source_kind} for peer {peer_id} failed: {cause}")]
    Replace {
        source_kind: TrackSource,
        peer_id: PeerId,
        #[source]
        cause: NegotiationError,
    },

    #[error("local media was stopped during the swap")]
    Discarded,
}

/// Peer-scoped handshake failure. The session moves to `Recovering` and a
/// fresh offer is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("remote description rejected: {0}")]
    RemoteDescription(String),

    #[error("local description rejected: {0}")]
    LocalDescription(String),

    #[error("could not create offer: {0}")]
    CreateOffer(String),

    #[error("could not create answer: {0}")]
    CreateAnswer(String),

    #[error("sender update failed: {0}")]
    Track(String),

    #[error("could not create connection: {0}")]
    Connection(String),

    #[error("signaling rejected message: {0}")]
    Signaling(String),

    #[error("session for this peer is gone")]
    SessionClosed,
}

/// Transport connectivity could not be restored after repeated in-place
/// restarts. Other sessions are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("peer {peer_id} unreachable after {attempts} connectivity restarts")]
pub struct ConnectivityFailure {
    pub peer_id: PeerId,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
