use crate::model::peer::PeerId;
use crate::model::sdp::{CandidateInit, SessionDescription};
use serde::{Deserialize, Serialize};

/// A room participant. Older servers send a bare id string; a missing or
/// empty display name falls back to [`PeerId::short`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RoomUserWire")]
pub struct RoomUser {
    pub id: PeerId,
    pub display_name: String,
}

impl RoomUser {
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let display_name = if display_name.is_empty() {
            id.short().to_owned()
        } else {
            display_name
        };
        Self { id, display_name }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoomUserWire {
    Id(PeerId),
    User {
        id: PeerId,
        #[serde(default, rename = "displayName")]
        display_name: String,
    },
}

impl From<RoomUserWire> for RoomUser {
    fn from(wire: RoomUserWire) -> Self {
        match wire {
            RoomUserWire::Id(id) => RoomUser::new(id, ""),
            RoomUserWire::User { id, display_name } => RoomUser::new(id, display_name),
        }
    }
}

/// Messages delivered to this participant by the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer {
        from: PeerId,
        #[serde(alias = "offer")]
        sdp: SessionDescription,
    },
    Answer {
        from: PeerId,
        #[serde(alias = "answer")]
        sdp: SessionDescription,
    },
    IceCandidate {
        from: PeerId,
        candidate: CandidateInit,
    },
    #[serde(alias = "user-joined")]
    PeerJoined(RoomUser),
    PeerLeft {
        id: PeerId,
    },
    RoomUsers(Vec<RoomUser>),
}

impl SignalMessage {
    /// Remote participant the message concerns.
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::IceCandidate { from, .. } => Some(from),
            SignalMessage::PeerJoined(user) => Some(&user.id),
            SignalMessage::PeerLeft { id } => Some(id),
            SignalMessage::RoomUsers(_) => None,
        }
    }
}

/// Messages this participant hands to the signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum OutboundSignal {
    Offer {
        to: PeerId,
        sdp: SessionDescription,
    },
    Answer {
        to: PeerId,
        sdp: SessionDescription,
    },
    IceCandidate {
        to: PeerId,
        candidate: CandidateInit,
    },
}

impl OutboundSignal {
    pub fn to(&self) -> &PeerId {
        match self {
            OutboundSignal::Offer { to, .. }
            | OutboundSignal::Answer { to, .. }
            | OutboundSignal::IceCandidate { to, .. } => to,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
