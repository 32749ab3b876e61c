use saathi_auth::TokenError;
use thiserror::Error;

/// Failures on the realtime channel. Each one is reported to the affected
/// connection only.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or rejected credential. Closes the connection.
    #[error(transparent)]
    Auth(#[from] TokenError),
    #[error("{0}")]
    Validation(String),
    #[error("User not found or not in a group")]
    Lookup,
    #[error("{message}: {source}")]
    Persistence {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("connection is no longer writable")]
    Transport,
}

impl RelayError {
    pub fn persistence(message: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| RelayError::Persistence { message, source }
    }

    /// Text placed in the `error` frame sent back to the client.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Persistence { message, .. } => message.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayError::Auth(_) | RelayError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn client_messages_hide_store_detail() {
        let err = RelayError::persistence("Failed to update location")(anyhow::anyhow!(
            "database is locked"
        ));
        assert_equal!(err.client_message(), "Failed to update location");
        assert!(err.to_string().contains("database is locked"));
        assert!(!err.is_terminal());
    }

    #[test]
    fn auth_failures_are_terminal() {
        let err = RelayError::from(TokenError::Missing);
        assert_equal!(err.client_message(), "Token required");
        assert!(err.is_terminal());
        assert_equal!(
            RelayError::Lookup.client_message(),
            "User not found or not in a group"
        );
    }
}
