use crate::error::CaptureError;
use crate::media::frame::{AudioFrame, MediaFrame};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Camera,
    Microphone,
    Display,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Camera => f.write_str("camera"),
            CaptureKind::Microphone => f.write_str("microphone"),
            CaptureKind::Display => f.write_str("display"),
        }
    }
}

/// Processing hints passed to the platform when opening a microphone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u16,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            channel_count: 1,
            sample_rate: 48_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub kind: CaptureKind,
    /// Exact device to open; `None` lets the platform pick.
    pub device_id: Option<String>,
    pub audio: Option<AudioConstraints>,
}

impl CaptureRequest {
    pub fn camera(device_id: Option<String>) -> Self {
        Self {
            kind: CaptureKind::Camera,
            device_id,
            audio: None,
        }
    }

    pub fn microphone(device_id: Option<String>, constraints: AudioConstraints) -> Self {
        Self {
            kind: CaptureKind::Microphone,
            device_id,
            audio: Some(constraints),
        }
    }

    pub fn display() -> Self {
        Self {
            kind: CaptureKind::Display,
            device_id: None,
            audio: None,
        }
    }
}

/// An opened capture device. Dropping it releases the device.
#[async_trait]
pub trait CaptureDevice: Send {
    fn label(&self) -> String;

    /// Codec of the frames this device yields. Only used for video.
    fn codec(&self) -> RTCRtpCodecCapability {
        vp8_capability()
    }

    /// Next captured frame; `None` once the device has ended (unplugged, or
    /// the user stopped sharing from the OS).
    async fn next_frame(&mut self) -> Option<MediaFrame>;
}

pub trait AudioEncoder: Send {
    fn codec(&self) -> RTCRtpCodecCapability {
        opus_capability()
    }

    fn encode(&mut self, frame: &AudioFrame) -> anyhow::Result<Bytes>;
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> anyhow::Result<AudioFrame>;
}

/// Platform access to cameras, microphones and screen capture.
#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    async fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureDevice>, CaptureError>;

    fn audio_encoder(&self) -> Box<dyn AudioEncoder>;
}

pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48_000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

pub fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_owned(),
        clock_rate: 90_000,
        ..Default::default()
    }
}
