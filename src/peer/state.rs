//! Peer session state
//!
//! Tracks where a single outbound session is in its lifecycle, from dial
//! through handshake to the request/receive loop.

/// State of one peer session, as the initiating side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// TCP connect in flight
    #[default]
    Dialing,
    /// Connected, handshake exchange in progress
    Handshaking,
    /// Handshake complete, no request outstanding
    Ready,
    /// REQUEST_CHUNK sent, waiting for the first response byte
    Requesting,
    /// Response arriving
    Receiving,
    /// Protocol violation or integrity failure
    Error,
    /// Closed by either side
    Closed,
}

impl SessionState {
    /// Whether the session can issue a chunk request
    pub fn can_request(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// Whether the session is past its handshake and usable
    pub fn is_established(&self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Requesting | SessionState::Receiving
        )
    }

    /// Whether the session is finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Dialing => "dialing",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Requesting => "requesting",
            SessionState::Receiving => "receiving",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_dialing() {
        assert_eq!(SessionState::default(), SessionState::Dialing);
    }

    #[test]
    fn test_can_request_only_when_ready() {
        assert!(SessionState::Ready.can_request());
        assert!(!SessionState::Dialing.can_request());
        assert!(!SessionState::Requesting.can_request());
        assert!(!SessionState::Closed.can_request());
    }

    #[test]
    fn test_is_established() {
        assert!(SessionState::Ready.is_established());
        assert!(SessionState::Receiving.is_established());
        assert!(!SessionState::Handshaking.is_established());
        assert!(!SessionState::Error.is_established());
    }

    #[test]
    fn test_is_terminal() {
        assert!(SessionState::Error.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Ready.is_terminal());
    }
}
