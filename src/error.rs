use thiserror::Error;

use crate::event::DeliveryToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("client request failed: {0}")]
    Client(String),
    #[error("request not accepted within {0} ms")]
    Timeout(u64),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("failed to connect to broker: {0}")]
    ConnectFailure(TransportError),
    #[error("failed to reconnect after {attempts} attempts, last error: {last}")]
    ReconnectExhausted { attempts: u32, last: TransportError },
    #[error("delivery of token {token} not confirmed within {timeout_millis} ms")]
    PublishTimeout {
        token: DeliveryToken,
        timeout_millis: u64,
    },
    #[error("malformed payload on {topic}: {payload:?}")]
    MalformedPayload { topic: String, payload: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid settings: {0}")]
    Settings(String),
}

impl LoopError {
    /// Whether this error ends the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LoopError::ConnectFailure(_)
                | LoopError::ReconnectExhausted { .. }
                | LoopError::Settings(_)
        )
    }
}

impl From<config::ConfigError> for LoopError {
    fn from(e: config::ConfigError) -> Self {
        LoopError::Settings(e.to_string())
    }
}

pub type LoopResult<T> = Result<T, LoopError>;
