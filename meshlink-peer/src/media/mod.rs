mod audio_graph;
mod capture;
mod frame;
mod local_track;
mod media_source_manager;

pub use audio_graph::*;
pub use capture::*;
pub use frame::*;
pub use local_track::*;
pub use media_source_manager::*;
