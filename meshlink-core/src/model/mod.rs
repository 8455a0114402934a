mod connectivity;
mod media;
mod peer;
mod sdp;
mod signaling;

pub use connectivity::{ConnectivityConfig, IceServerConfig};
pub use media::TrackKind;
pub use peer::PeerId;
pub use sdp::{CandidateInit, SdpType, SessionDescription};
pub use signaling::{OutboundSignal, RoomUser, SignalMessage};
