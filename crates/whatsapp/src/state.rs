use serde::Serialize;

/// Observable state of the messaging session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No attempt made yet, or an attempt is being set up.
    #[default]
    #[serde(rename = "initializing")]
    Uninitialized,
    AwaitingQr,
    AwaitingPairingCode,
    Connected,
    Disconnected,
    /// The account was unlinked. Nothing reconnects until a new session is
    /// requested.
    LoggedOut,
}

impl SessionState {
    /// Wire name used in status broadcasts and the HTTP API.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "initializing",
            Self::AwaitingQr => "awaitingQr",
            Self::AwaitingPairingCode => "awaitingPairingCode",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::LoggedOut => "loggedOut",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection closed, decoded from the backend's status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    BadSession,
    RestartRequired,
    Other(Option<u16>),
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(428) => Self::ConnectionClosed,
            Some(408) => Self::ConnectionLost,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(515) => Self::RestartRequired,
            other => Self::Other(other),
        }
    }

    pub fn is_logged_out(self) -> bool {
        self == Self::LoggedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde() {
        for state in [
            SessionState::Uninitialized,
            SessionState::AwaitingQr,
            SessionState::AwaitingPairingCode,
            SessionState::Connected,
            SessionState::Disconnected,
            SessionState::LoggedOut,
        ] {
            let json = serde_json::to_value(state).unwrap_or_default();
            assert_eq!(json, state.as_str());
        }
    }

    #[test]
    fn only_401_means_logged_out() {
        assert!(DisconnectReason::from_status_code(Some(401)).is_logged_out());
        for code in [None, Some(408), Some(428), Some(440), Some(500), Some(515), Some(503)] {
            assert!(!DisconnectReason::from_status_code(code).is_logged_out());
        }
        assert_eq!(
            DisconnectReason::from_status_code(Some(503)),
            DisconnectReason::Other(Some(503))
        );
    }
}
