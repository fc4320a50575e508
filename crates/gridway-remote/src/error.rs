//! Classified connectivity errors.
//!
//! The client never auto-retries; callers decide. Every class carries a
//! remediation hint for the operator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection to {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },

    #[error("authentication denied for {user}@{host}")]
    AuthDenied { host: String, user: String },

    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("command failed on {host} (exit {code:?}): {stderr}")]
    Exec {
        host: String,
        code: Option<u32>,
        stderr: String,
    },

    #[error("ssh protocol error on {host}: {source}")]
    Protocol {
        host: String,
        #[source]
        source: russh::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Human-readable remediation hint for the operator.
    pub fn remediation(&self) -> &'static str {
        match self {
            RemoteError::Timeout { .. } => {
                "check that the host is powered on and the network path allows port 22"
            }
            RemoteError::AuthDenied { .. } => {
                "verify the SSH user and that the configured key is in authorized_keys"
            }
            RemoteError::Unreachable { .. } => {
                "check DNS resolution and firewall rules for the host address"
            }
            RemoteError::Exec { .. } => {
                "inspect the command's stderr; the shell environment may be incomplete"
            }
            RemoteError::Protocol { .. } => {
                "the SSH server may be misconfigured or an incompatible version"
            }
            RemoteError::Io(_) => "check local file paths and permissions",
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_has_a_hint() {
        let errors = [
            RemoteError::Timeout { host: "h".into(), secs: 30 },
            RemoteError::AuthDenied { host: "h".into(), user: "u".into() },
            RemoteError::Unreachable { host: "h".into(), reason: "r".into() },
            RemoteError::Exec { host: "h".into(), code: Some(1), stderr: "e".into() },
        ];
        for err in errors {
            assert!(!err.remediation().is_empty());
        }
    }
}
