use crate::config::MeshConfig;
use crate::media::MediaSourceManager;
use crate::negotiation::MeshEvent;
use crate::signaling::SignalingOutput;
use crate::transport::ConnectionFactory;
use crate::vad::VoiceActivityMonitor;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<MeshConfig>,
    pub signaling: Arc<dyn SignalingOutput>,
    pub factory: Arc<dyn ConnectionFactory>,
    pub media: Arc<MediaSourceManager>,
    pub vad: Arc<VoiceActivityMonitor>,
    pub events: mpsc::UnboundedSender<MeshEvent>,
}
