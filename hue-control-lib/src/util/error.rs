/// Errors produced while searching for a bridge.
///
/// The variants fall into two classes. Developer errors ([`Self::InvalidMethod`],
/// [`Self::InvalidArgument`]) mean the library was called incorrectly and are always
/// handed back to the caller. Every other variant is an operational failure, which
/// [`crate::util::discovery::Discovery::search`] absorbs into an empty result.
///
/// The type is `Clone` because one search result is shared by every caller that
/// joined the same search session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("`{0}` is not a valid search method.")]
    InvalidMethod(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request error: {0}")]
    Request(String),

    #[error("no bridges found")]
    NoResults,

    #[error("search was cancelled")]
    Cancelled,

    #[error("search task failed: {0}")]
    Task(String),
}

impl DiscoveryError {
    /// Whether this error indicates misuse of the library rather than a network condition.
    pub fn is_developer_error(&self) -> bool {
        matches!(
            self,
            DiscoveryError::InvalidMethod(_) | DiscoveryError::InvalidArgument(_)
        )
    }
}

impl From<std::io::Error> for DiscoveryError {
    fn from(err: std::io::Error) -> Self {
        DiscoveryError::Network(err.to_string())
    }
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(err: reqwest::Error) -> Self {
        DiscoveryError::Request(err.to_string())
    }
}
