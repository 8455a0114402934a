mod config;
mod error;
pub mod media;
pub mod negotiation;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod vad;

pub use config::*;
pub use error::*;
pub use media::*;
pub use negotiation::*;
pub use registry::*;
pub use session::*;
pub use signaling::*;
pub use transport::*;
pub use vad::*;

pub use meshlink_core::model::{
    CandidateInit, ConnectivityConfig, IceServerConfig, OutboundSignal, PeerId, RoomUser,
    SdpType, SessionDescription, SignalMessage, TrackKind,
};
