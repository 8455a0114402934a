use crate::error::ConfigError;
use crate::vad::VadConfig;
use meshlink_core::{ConnectivityConfig, PeerId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for one participant's mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshConfig {
    /// Our own signaling id. Decides who yields when both sides offer at once.
    pub local_id: Option<PeerId>,
    pub connectivity: ConnectivityConfig,
    pub vad: VadConfig,
    /// Connectivity restarts / fresh offers tried before a peer is reported
    /// unreachable.
    pub max_recovery_attempts: u32,
    /// Period of the sender consistency pass. Zero disables it.
    pub reconcile_interval_ms: u64,
    /// How long signals from a peer that left are still dropped.
    pub departed_grace_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            local_id: None,
            connectivity: ConnectivityConfig::default(),
            vad: VadConfig::default(),
            max_recovery_attempts: 3,
            reconcile_interval_ms: 5_000,
            departed_grace_ms: 30_000,
        }
    }
}

impl MeshConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn with_local_id(mut self, id: impl Into<PeerId>) -> Self {
        self.local_id = Some(id.into());
        self
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_ms > 0).then(|| Duration::from_millis(self.reconcile_interval_ms))
    }

    pub fn departed_grace(&self) -> Duration {
        Duration::from_millis(self.departed_grace_ms)
    }

    /// The polite side rolls back its own offer on collision.
    pub(crate) fn is_polite_towards(&self, remote: &PeerId) -> bool {
        match &self.local_id {
            Some(local) => local < remote,
            None => true,
        }
    }
}
