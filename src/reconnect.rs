//! Bounded connect/reconnect loop shared by every role.

use std::time::Duration;

use crate::error::{LoopError, LoopResult, TransportError};
use crate::settings::ReconnectSettings;
use crate::transport::Transport;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Init,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_retries: u32,
    retries_remaining: u32,
    retry_delay: Duration,
    state: ConnectionState,
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        ReconnectPolicy {
            max_retries,
            retries_remaining: max_retries,
            retry_delay,
            state: ConnectionState::Init,
        }
    }

    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        ReconnectPolicy::new(
            settings.max_retries,
            Duration::from_millis(settings.retry_delay_millis),
        )
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Single attempt at startup; a refusal here is not retried.
    pub async fn connect<T: Transport>(&mut self, transport: &mut T) -> LoopResult<()> {
        self.state = ConnectionState::Connecting;
        match transport.connect().await {
            Ok(()) => {
                info!("connected to broker");
                self.state = ConnectionState::Connected;
                self.retries_remaining = self.max_retries;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(LoopError::ConnectFailure(e))
            }
        }
    }

    /// Called after a loss signal. Makes up to `max_retries` attempts.
    pub async fn reconnect<T: Transport>(&mut self, transport: &mut T) -> LoopResult<()> {
        self.state = ConnectionState::Connecting;
        let mut last = TransportError::Closed;
        while self.retries_remaining > 0 {
            self.retries_remaining -= 1;
            let attempt = self.max_retries - self.retries_remaining;
            match transport.connect().await {
                Ok(()) => {
                    info!("reconnected after {attempt} attempt(s)");
                    self.state = ConnectionState::Connected;
                    self.retries_remaining = self.max_retries;
                    return Ok(());
                }
                Err(e) => {
                    warn!("reconnect attempt {attempt}/{} failed: {e}", self.max_retries);
                    last = e;
                    if self.retries_remaining > 0 && !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        self.state = ConnectionState::Failed;
        Err(LoopError::ReconnectExhausted {
            attempts: self.max_retries,
            last,
        })
    }
}
