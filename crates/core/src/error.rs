#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Agent profile '{0}' not found")]
    AgentNotFound(String),

    #[error("Agent profile '{0}' is disabled")]
    AgentDisabled(String),

    #[error("Missing provider credential: no active secret for '{0}'")]
    MissingProviderCredential(String),

    #[error("Missing queue endpoint: no active secret for '{0}'")]
    MissingEndpoint(String),

    #[error("Unsupported provider '{0}'")]
    UnsupportedProvider(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
