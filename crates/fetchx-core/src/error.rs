use crate::request::{Headers, Response};
use thiserror::Error;

/// A failure reported by the transport adapter.
///
/// `status` is present when the server answered; a missing status means the
/// request never got a response (connection refused, reset, DNS, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub message: String,
    pub headers: Headers,
}

impl TransportFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            headers: Headers::new(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Failure of a logical request.
///
/// `Clone` because one settled outcome is handed to every deduplicated caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network failure: {message}")]
    Network { message: String },
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("request cancelled")]
    Cancelled,
    #[error("server responded {status}: {message}")]
    Server {
        status: u16,
        message: String,
        headers: Headers,
    },
}

impl FetchError {
    /// Builds a server failure from a non-2xx response.
    pub fn from_response(response: &Response) -> Self {
        let message = match response.text() {
            Some(text) if !text.is_empty() && text.len() <= 256 => text.to_string(),
            _ => format!("HTTP status {}", response.status),
        };
        FetchError::Server {
            status: response.status,
            message,
            headers: response.headers.clone(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Headers of the response that caused the failure, if there was one.
    pub fn headers(&self) -> Option<&Headers> {
        match self {
            FetchError::Server { headers, .. } => Some(headers),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<TransportFailure> for FetchError {
    fn from(failure: TransportFailure) -> Self {
        match failure.status {
            Some(status) => FetchError::Server {
                status,
                message: failure.message,
                headers: failure.headers,
            },
            None => FetchError::Network {
                message: failure.message,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
