mod speaking_detector;
mod spectrum_analyser;
mod vad_config;
mod voice_activity_monitor;

pub use speaking_detector::*;
pub use spectrum_analyser::*;
pub use vad_config::*;
pub use voice_activity_monitor::*;
