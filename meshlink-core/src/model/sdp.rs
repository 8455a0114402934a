use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Browser-shaped `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }
}

/// Browser-shaped `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod rtc {
    use super::{CandidateInit, SdpType, SessionDescription};
    use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    impl From<CandidateInit> for RTCIceCandidateInit {
        fn from(c: CandidateInit) -> Self {
            Self {
                candidate: c.candidate,
                sdp_mid: c.sdp_mid,
                sdp_mline_index: c.sdp_m_line_index,
                username_fragment: c.username_fragment,
            }
        }
    }

    impl From<RTCIceCandidateInit> for CandidateInit {
        fn from(c: RTCIceCandidateInit) -> Self {
            Self {
                candidate: c.candidate,
                sdp_mid: c.sdp_mid,
                sdp_m_line_index: c.sdp_mline_index,
                username_fragment: c.username_fragment,
            }
        }
    }

    impl TryFrom<SessionDescription> for RTCSessionDescription {
        type Error = webrtc::Error;

        fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
            match desc.sdp_type {
                SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
                SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
                SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
                SdpType::Rollback => {
                    let mut rollback = RTCSessionDescription::default();
                    rollback.sdp_type = RTCSdpType::Rollback;
                    Ok(rollback)
                }
            }
        }
    }

    impl From<RTCSessionDescription> for SessionDescription {
        fn from(desc: RTCSessionDescription) -> Self {
            let sdp_type = match desc.sdp_type {
                RTCSdpType::Answer => SdpType::Answer,
                RTCSdpType::Pranswer => SdpType::Pranswer,
                RTCSdpType::Rollback => SdpType::Rollback,
                _ => SdpType::Offer,
            };
            Self {
                sdp_type,
                sdp: desc.sdp,
            }
        }
    }
}
