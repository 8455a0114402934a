mod connection_event;
mod media_connection;
mod rtc_connection;

pub use connection_event::*;
pub use media_connection::*;
pub use rtc_connection::*;
