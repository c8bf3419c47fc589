use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

/// Failure classification used for recovery decisions and benchmark records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectionRefused,
    Timeout,
    HttpStatus(u16),
    InvalidResponse,
}

impl ErrorKind {
    /// The server is unreachable or overloaded; waiting may help.
    pub fn is_transient(&self) -> bool {
        match self {
            ErrorKind::ConnectionRefused | ErrorKind::Timeout => true,
            ErrorKind::HttpStatus(code) => matches!(code, 502..=504),
            ErrorKind::InvalidResponse => false,
        }
    }

    /// The server answered but something inside it broke.
    pub fn is_server_fault(&self) -> bool {
        match self {
            ErrorKind::InvalidResponse => true,
            ErrorKind::HttpStatus(code) => (500..600).contains(code) && !self.is_transient(),
            _ => false,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, ErrorKind::HttpStatus(code) if (400..500).contains(code))
    }
}

impl From<&TransportError> for ErrorKind {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::ConnectionRefused(_) => ErrorKind::ConnectionRefused,
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::HttpStatus { code, .. } => ErrorKind::HttpStatus(*code),
            TransportError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ConnectionRefused => f.write_str("connection refused"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::HttpStatus(code) => write!(f, "HTTP {}", code),
            ErrorKind::InvalidResponse => f.write_str("invalid response"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    UnloadThenRetry,
    RestartServiceThenRetry,
    GiveUp,
}

/// Picks the recovery action for a failure.
///
/// `failures` counts the current failure. One restart per streak at most; any
/// failure after it gives up.
pub fn decide(
    kind: &ErrorKind,
    failures: u32,
    restart_attempted: bool,
    threshold: u32,
) -> RecoveryAction {
    if restart_attempted || kind.is_client_error() {
        return RecoveryAction::GiveUp;
    }
    let escalate = failures >= threshold;
    if kind.is_transient() {
        if escalate {
            RecoveryAction::RestartServiceThenRetry
        } else {
            RecoveryAction::Retry
        }
    } else if kind.is_server_fault() {
        if escalate {
            RecoveryAction::RestartServiceThenRetry
        } else {
            RecoveryAction::UnloadThenRetry
        }
    } else {
        RecoveryAction::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u32 = 3;

    #[test]
    fn test_transient_below_threshold_retries() {
        for kind in [
            ErrorKind::ConnectionRefused,
            ErrorKind::Timeout,
            ErrorKind::HttpStatus(502),
            ErrorKind::HttpStatus(503),
            ErrorKind::HttpStatus(504),
        ] {
            for n in 1..T {
                assert_eq!(decide(&kind, n, false, T), RecoveryAction::Retry, "{} n={}", kind, n);
            }
            assert_eq!(decide(&kind, T, false, T), RecoveryAction::RestartServiceThenRetry);
        }
    }

    #[test]
    fn test_server_faults_unload_then_escalate() {
        for kind in [ErrorKind::HttpStatus(500), ErrorKind::HttpStatus(507), ErrorKind::InvalidResponse] {
            assert_eq!(decide(&kind, 1, false, T), RecoveryAction::UnloadThenRetry);
            assert_eq!(decide(&kind, 2, false, T), RecoveryAction::UnloadThenRetry);
            assert_eq!(decide(&kind, 3, false, T), RecoveryAction::RestartServiceThenRetry);
        }
    }

    #[test]
    fn test_client_errors_give_up() {
        assert_eq!(decide(&ErrorKind::HttpStatus(404), 1, false, T), RecoveryAction::GiveUp);
        assert_eq!(decide(&ErrorKind::HttpStatus(400), 5, false, T), RecoveryAction::GiveUp);
    }

    #[test]
    fn test_nothing_after_a_restart() {
        assert_eq!(decide(&ErrorKind::Timeout, 1, true, T), RecoveryAction::GiveUp);
        assert_eq!(decide(&ErrorKind::HttpStatus(500), 4, true, T), RecoveryAction::GiveUp);
    }

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::HttpStatus { code: 503, body: String::new() };
        assert_eq!(ErrorKind::from(&err), ErrorKind::HttpStatus(503));
        assert_eq!(ErrorKind::from(&TransportError::Timeout("x".into())), ErrorKind::Timeout);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ErrorKind::ConnectionRefused).unwrap(), "\"connection_refused\"");
        assert_eq!(serde_json::to_string(&ErrorKind::HttpStatus(500)).unwrap(), "{\"http_status\":500}");
    }
}
