//! Error types for `OAuth2` operations.

/// Result type alias for `OAuth2` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request error (connection, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error returned by the token endpoint.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// No refresh token available.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The token endpoint answered with something that is not a token.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an OAuth error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns true if the grant itself was rejected and the user must
    /// authorize again (as opposed to a network hiccup).
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            Self::NoRefreshToken => true,
            Self::OAuth { error, .. } => matches!(
                error.as_str(),
                "invalid_grant" | "invalid_client" | "unauthorized_client" | "invalid_scope"
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_reauthorization() {
        assert!(Error::NoRefreshToken.requires_reauthorization());
        assert!(Error::oauth_error("invalid_grant", "revoked").requires_reauthorization());
        assert!(!Error::oauth_error("temporarily_unavailable", "").requires_reauthorization());
        assert!(!Error::InvalidResponse("html".into()).requires_reauthorization());
    }
}
