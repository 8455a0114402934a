
pub use fake_capture::*;
pub use mock_connection::*;
pub use mock_signaling::*;
pub use wait_helpers::*;
