use std::fmt;

/// Handshake lifecycle of one peer session. `Closed` is only entered
/// through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    New,
    Negotiating,
    Connected,
    Recovering,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::New => f.write_str("new"),
            SessionState::Negotiating => f.write_str("negotiating"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Recovering => f.write_str("recovering"),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}
