use thiserror::Error;

/// Every failure the sync layer can surface. None of them are fatal: callers
/// retry by refreshing or re-committing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// The dispatcher answered `{success: false, error}`.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    /// The dispatcher could not be reached or raised instead of answering.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The reply did not have the shape the action promises.
    #[error("malformed reply for {action}: {message}")]
    MalformedReply { action: String, message: String },

    /// A newer refresh was initiated before this one resolved; its result was dropped.
    #[error("refresh generation {generation} superseded by {newer}")]
    Superseded { generation: u64, newer: u64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn malformed(action: &str, message: impl Into<String>) -> Self {
        SyncError::MalformedReply {
            action: action.to_string(),
            message: message.into(),
        }
    }

    /// Stable wire code, used in sidecar error envelopes.
    pub fn code(&self) -> &str {
        match self {
            SyncError::Remote { code, .. } => code,
            SyncError::Transport(_) => "transport_failed",
            SyncError::MalformedReply { .. } => "malformed_reply",
            SyncError::Superseded { .. } => "superseded",
            SyncError::InvalidConfig(_) => "invalid_config",
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, SyncError::Superseded { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_keep_the_dispatcher_code() {
        let e = SyncError::remote("not_found", "class not found");
        assert_eq!(e.code(), "not_found");
        assert_eq!(e.to_string(), "not_found: class not found");
    }

    #[test]
    fn local_errors_map_to_fixed_codes() {
        assert_eq!(SyncError::Transport("eof".into()).code(), "transport_failed");
        assert_eq!(
            SyncError::malformed("stats.class", "missing stat").code(),
            "malformed_reply"
        );
        let stale = SyncError::Superseded {
            generation: 1,
            newer: 2,
        };
        assert!(stale.is_superseded());
        assert_eq!(stale.code(), "superseded");
    }
}
