//! Error taxonomy shared by the engine, the specialists and the collaborators.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OutbreakError>;

#[derive(Error, Debug)]
pub enum OutbreakError {
    /// Malformed request or unusable input; never retried
    #[error("invalid input: {0}")]
    Input(String),

    /// Trend windows could not be formed
    #[error("insufficient data: need {needed} points, have {available}")]
    InsufficientData { needed: usize, available: usize },

    /// External collaborator unavailable or slow; retried once
    #[error("collaborator unavailable: {0}")]
    Transient(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// No intent could be resolved, even after keyword fallback
    #[error("routing failed: {0}")]
    FatalRouting(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Collaborator answered, but with something unusable
    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OutbreakError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::Collaborator(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stable label recorded in failed sub-results.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
            Self::FatalRouting(_) => "fatal_routing",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Collaborator(_) => "collaborator",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for OutbreakError {
    fn from(err: reqwest::Error) -> Self {
        let server_side = err.status().map(|s| s.is_server_error()).unwrap_or(false);
        if err.is_timeout() || err.is_connect() || server_side {
            Self::Transient(err.to_string())
        } else {
            Self::Collaborator(err.to_string())
        }
    }
}

impl From<sqlx::Error> for OutbreakError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Transient(err.to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<csv::Error> for OutbreakError {
    fn from(err: csv::Error) -> Self {
        Self::Input(format!("csv: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(OutbreakError::transient("down").is_transient());
        assert!(!OutbreakError::input("bad").is_transient());
        assert!(!OutbreakError::Timeout("slow".into()).is_transient());
        assert!(!OutbreakError::InsufficientData { needed: 14, available: 3 }.is_transient());
    }

    #[test]
    fn classes_are_stable_labels() {
        assert_eq!(OutbreakError::Timeout("x".into()).class(), "timeout");
        assert_eq!(
            OutbreakError::InsufficientData { needed: 14, available: 0 }.class(),
            "insufficient_data"
        );
        assert_eq!(OutbreakError::FatalRouting("x".into()).class(), "fatal_routing");
    }

    #[test]
    fn malformed_requests_are_not_retried() {
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        let err = OutbreakError::from(err);
        assert!(!err.is_transient());
        assert_eq!(err.class(), "collaborator");
    }

    #[tokio::test]
    async fn refused_connections_are_transient() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{port}/"))
            .send()
            .await
            .unwrap_err();
        assert!(OutbreakError::from(err).is_transient());
    }
}
