use std::time::Duration;

/// Errors shared across the Confidant crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    /// The named credential pool has no entries.
    #[error("no credential available in pool '{0}'")]
    CredentialMissing(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("upstream error: status={status}, body={body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Raised when an inbound attachment cannot be decoded. The message is
    /// user-facing and is returned as reply content.
    #[error("{0}")]
    AttachmentDecode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_display_includes_code() {
        let err = Error::UpstreamStatus {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "upstream error: status=503, body=overloaded");
    }

    #[test]
    fn attachment_decode_displays_bare_message() {
        let err = Error::AttachmentDecode("Could not read the attached file.".to_string());
        assert_eq!(err.to_string(), "Could not read the attached file.");
    }
}
