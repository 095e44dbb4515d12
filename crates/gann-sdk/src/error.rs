use thiserror::Error;

/// Errors surfaced by the SDK.
#[derive(Debug, Error)]
pub enum Error {
    /// An identifier was empty, a channel was used after close, or an offer
    /// was ill-formed.
    #[error("validation error: {0}")]
    Validation(String),
    /// The signaling channel closed underneath a wait.
    #[error("signaling channel terminated (code: {code:?}, reason: {reason:?})")]
    ChannelTerminated {
        /// Close code from the socket, when one was supplied.
        code: Option<u16>,
        /// Close reason from the socket, when one was supplied.
        reason: Option<String>,
    },
    /// A timed negotiation wait elapsed. The message names the wait.
    #[error("{0}")]
    NegotiationTimeout(String),
    /// The directory failed to mint a signaling token.
    #[error("token error: {0}")]
    Token(String),
    /// Propagated from the native transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// A timeout error whose message names the elapsed wait.
    #[must_use]
    pub fn timeout(label: &str) -> Self {
        Self::NegotiationTimeout(format!("Timed out waiting for {label}"))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn transport(msg: impl ToString) -> Self {
        Self::Transport(msg.to_string())
    }
}

/// Result alias used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;
