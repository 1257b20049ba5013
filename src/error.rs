use std::fmt;
use std::net::SocketAddr;

use crate::RouterId;

/// Which unit, and which of its states, an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ServerJoining,
    ServerForwarding,
    ServerTerminating,
    RouterConnecting,
    RouterConverging,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ServerJoining => "server/joining",
            Phase::ServerForwarding => "server/forwarding",
            Phase::ServerTerminating => "server/terminating",
            Phase::RouterConnecting => "router/connecting",
            Phase::RouterConverging => "router/converging",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{phase}: failed to bind {addr}: {source}")]
    Bind {
        phase: Phase,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase}: {operation} failed: {source}")]
    Transport {
        phase: Phase,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase}: malformed datagram from {from}: {source}")]
    Decode {
        phase: Phase,
        from: SocketAddr,
        #[source]
        source: serde_json::Error,
    },

    #[error("{phase}: failed to encode message: {source}")]
    Encode {
        phase: Phase,
        #[source]
        source: serde_json::Error,
    },

    #[error("{phase}: encoded message is {size} bytes, datagram limit is {limit}")]
    Oversized { phase: Phase, size: usize, limit: usize },

    #[error("{phase}: protocol violation: {detail}")]
    Protocol { phase: Phase, detail: String },

    #[error("{phase}: no reply within {waited_ms} ms")]
    Timeout { phase: Phase, waited_ms: u128 },

    #[error("{phase}: cancelled before completion")]
    Cancelled { phase: Phase },

    #[error("topology references unknown router {0}")]
    UnknownRouter(RouterId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task for {unit} did not complete: {detail}")]
    Task { unit: String, detail: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Bind { phase, .. }
            | Error::Transport { phase, .. }
            | Error::Decode { phase, .. }
            | Error::Encode { phase, .. }
            | Error::Oversized { phase, .. }
            | Error::Protocol { phase, .. }
            | Error::Timeout { phase, .. }
            | Error::Cancelled { phase } => Some(*phase),
            Error::UnknownRouter(_) | Error::Config(_) | Error::Task { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_phase_and_operation() {
        let err = Error::Transport {
            phase: Phase::ServerForwarding,
            operation: "recv_from",
            source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        };
        assert_eq!(err.to_string(), "server/forwarding: recv_from failed: boom");
        assert_eq!(err.phase(), Some(Phase::ServerForwarding));
    }

    #[test]
    fn config_errors_have_no_phase() {
        assert_eq!(Error::Config("bad".into()).phase(), None);
        assert_eq!(Error::UnknownRouter("q".into()).phase(), None);
    }
}
