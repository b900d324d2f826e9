use crate::instrument::InstrumentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `lvtrade-feed`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum FeedError {
    #[error("failed to build feed url: {0}")]
    Url(String),

    #[error("failed to connect feed for {instrument}: {reason}")]
    Connect {
        instrument: InstrumentId,
        reason: String,
    },

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("history fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("chart rejected update: {0}")]
    Chart(#[from] ChartError),

    #[error("history consistency failure: {0}")]
    Consistency(#[from] PrependError),

    #[error("session closed")]
    SessionClosed,
}

impl FeedError {
    /// Determine if an error ends the owning feed session.
    ///
    /// Reconnection is the job of whatever supervises the session, so a terminal
    /// error only ever moves the connection to `Disconnected`.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            FeedError::Url(_) | FeedError::Connect { .. } | FeedError::SessionClosed => true,
            FeedError::Socket(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("connectionclosed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("sendafterclosing")
                    || error_lower.contains("io(")
            }
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(format!("{value:?}"))
    }
}

/// Failure of the history fetch collaborator.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum FetchError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode history payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// The charting widget refused an incremental update (eg/ stale timestamp).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
#[error("{0}")]
pub struct ChartError(pub String);

/// Older bars handed to [`HistoryBuffer::prepend`](crate::history::HistoryBuffer::prepend)
/// would break the ascending, duplicate free bucket ordering.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum PrependError {
    #[error("prepended bars are not strictly ascending at index {index}")]
    Unordered { index: usize },

    #[error("newest prepended bar {newest} is not older than current oldest bar {oldest}")]
    Overlap { newest: i64, oldest: i64 },
}
