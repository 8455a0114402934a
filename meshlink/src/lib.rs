pub use meshlink_core::model::PeerId;

pub mod model {
    pub use meshlink_core::model::*;
}

#[cfg(feature = "peer")]
pub mod peer {
    pub use meshlink_peer::*;
}
