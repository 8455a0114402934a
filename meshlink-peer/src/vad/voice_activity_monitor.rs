use crate::media::AudioFrame;
use crate::vad::speaking_detector::SpeakingDetector;
use crate::vad::spectrum_analyser::SpectrumAnalyser;
use crate::vad::vad_config::VadConfig;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use meshlink_core::PeerId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoiceSource {
    Local,
    Peer(PeerId),
}

impl fmt::Display for VoiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceSource::Local => f.write_str("local"),
            VoiceSource::Peer(id) => write!(f, "peer {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceActivityEvent {
    pub source: VoiceSource,
    pub speaking: bool,
}

/// Samples audio feeds on a fixed period and reports speaking changes.
/// Each watched source runs its own timer task.
pub struct VoiceActivityMonitor {
    config: VadConfig,
    watchers: DashMap<VoiceSource, JoinHandle<()>>,
    speaking: Arc<DashMap<VoiceSource, bool>>,
    events: mpsc::UnboundedSender<VoiceActivityEvent>,
}

impl VoiceActivityMonitor {
    pub fn new(config: VadConfig, events: mpsc::UnboundedSender<VoiceActivityEvent>) -> Self {
        Self {
            config,
            watchers: DashMap::new(),
            speaking: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Starts sampling `feed`. `gate`, when given, must be true for the
    /// source to count as speaking. Returns false if `source` is already
    /// watched.
    pub fn watch(
        &self,
        source: VoiceSource,
        feed: broadcast::Receiver<AudioFrame>,
        gate: Option<Arc<AtomicBool>>,
    ) -> bool {
        let slot = match self.watchers.entry(source.clone()) {
            Entry::Occupied(entry) if !entry.get().is_finished() => return false,
            slot => slot,
        };

        let watcher = Watcher {
            source: source.clone(),
            analyser: SpectrumAnalyser::new(self.config.fft_size, self.config.smoothing),
            fed: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
            detector: SpeakingDetector::new(self.config.threshold, self.config.min_hold()),
            gate,
            speaking: self.speaking.clone(),
            events: self.events.clone(),
        };
        let handle = tokio::spawn(watcher.run(feed, self.config.interval()));
        slot.insert(handle);

        debug!("Watching voice activity for {}", source);
        true
    }

    /// Stops sampling `source`. Once this returns no further events for it
    /// are emitted.
    pub async fn unwatch(&self, source: &VoiceSource) -> bool {
        let Some((_, handle)) = self.watchers.remove(source) else {
            return false;
        };
        handle.abort();
        let _ = handle.await;
        self.speaking.remove(source);

        debug!("Stopped watching voice activity for {}", source);
        true
    }

    pub async fn unwatch_all(&self) {
        let sources: Vec<VoiceSource> = self.watchers.iter().map(|e| e.key().clone()).collect();
        for source in sources {
            self.unwatch(&source).await;
        }
    }

    pub fn is_watching(&self, source: &VoiceSource) -> bool {
        self.watchers
            .get(source)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn is_speaking(&self, source: &VoiceSource) -> bool {
        self.speaking.get(source).is_some_and(|s| *s)
    }

    pub fn speaking_sources(&self) -> Vec<VoiceSource> {
        self.speaking
            .iter()
            .filter(|entry| *entry.value())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Drop for VoiceActivityMonitor {
    fn drop(&mut self) {
        for entry in self.watchers.iter() {
            entry.value().abort();
        }
    }
}

const DEFAULT_SAMPLE_RATE: u32 = 48_000;

struct Watcher {
    source: VoiceSource,
    analyser: SpectrumAnalyser,
    /// Whether a frame arrived since the previous tick.
    fed: bool,
    sample_rate: u32,
    detector: SpeakingDetector,
    gate: Option<Arc<AtomicBool>>,
    speaking: Arc<DashMap<VoiceSource, bool>>,
    events: mpsc::UnboundedSender<VoiceActivityEvent>,
}

impl Watcher {
    async fn run(mut self, mut feed: broadcast::Receiver<AudioFrame>, period: std::time::Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                frame = feed.recv() => match frame {
                    Ok(frame) => {
                        if frame.sample_rate > 0 {
                            self.sample_rate = frame.sample_rate;
                        }
                        self.analyser.push(&frame.samples);
                        self.fed = true;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        trace!("Voice feed for {} skipped {} frames", self.source, skipped);
                    }
                    Err(RecvError::Closed) => break,
                },

                _ = ticker.tick() => {
                    if !self.fed {
                        self.push_idle(period);
                    }
                    self.fed = false;
                    let level = self.analyser.average_level();
                    self.evaluate(level, Instant::now());
                }
            }
        }

        if self.detector.reset() {
            self.publish(false);
        }
        debug!("Voice feed for {} closed", self.source);
    }

    /// A feed that delivered nothing for a whole tick counts as silence,
    /// so stalled or DTX-suppressed audio decays like a muted source.
    fn push_idle(&mut self, period: std::time::Duration) {
        let samples = (period.as_secs_f64() * self.sample_rate as f64) as usize;
        let samples = samples.clamp(1, self.analyser.fft_size());
        self.analyser.push(&vec![0.0; samples]);
    }

    fn evaluate(&mut self, level: f32, now: Instant) {
        let gate_open = self
            .gate
            .as_ref()
            .is_none_or(|gate| gate.load(Ordering::Relaxed));

        if let Some(speaking) = self.detector.update(level, gate_open, now) {
            self.publish(speaking);
        }
    }

    fn publish(&self, speaking: bool) {
        self.speaking.insert(self.source.clone(), speaking);
        trace!("{} speaking: {}", self.source, speaking);
        let _ = self.events.send(VoiceActivityEvent {
            source: self.source.clone(),
            speaking,
        });
    }
}
