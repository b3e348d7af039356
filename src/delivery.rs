use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::error::LoopError;
use crate::event::DeliveryToken;

/// Publishes waiting for their delivery confirmation.
#[derive(Debug)]
pub struct DeliveryTracker {
    pending: BTreeMap<DeliveryToken, Instant>,
    timeout: Duration,
}

impl DeliveryTracker {
    pub fn new(timeout: Duration) -> Self {
        DeliveryTracker {
            pending: BTreeMap::new(),
            timeout,
        }
    }

    pub fn track(&mut self, token: DeliveryToken, sent_at: Instant) {
        self.pending.insert(token, sent_at);
    }

    /// Returns how long the delivery took, or `None` for unknown or expired tokens.
    pub fn confirm(&mut self, token: DeliveryToken, now: Instant) -> Option<Duration> {
        self.pending
            .remove(&token)
            .map(|sent_at| now.saturating_duration_since(sent_at))
    }

    pub fn expire(&mut self, now: Instant) -> Vec<LoopError> {
        let expired: Vec<DeliveryToken> = self
            .pending
            .iter()
            .filter(|(_, sent_at)| now.saturating_duration_since(**sent_at) >= self.timeout)
            .map(|(token, _)| *token)
            .collect();
        expired
            .into_iter()
            .map(|token| {
                self.pending.remove(&token);
                LoopError::PublishTimeout {
                    token,
                    timeout_millis: self.timeout.as_millis() as u64,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_tokens_do_not_expire() {
        let start = Instant::now();
        let mut tracker = DeliveryTracker::new(Duration::from_secs(10));
        tracker.track(DeliveryToken(1), start);
        tracker.track(DeliveryToken(2), start);
        let took = tracker.confirm(DeliveryToken(1), start + Duration::from_millis(40));
        assert_eq!(took, Some(Duration::from_millis(40)));
        assert_eq!(tracker.confirm(DeliveryToken(1), start), None);

        let errors = tracker.expire(start + Duration::from_secs(10));
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            LoopError::PublishTimeout {
                token: DeliveryToken(2),
                timeout_millis: 10_000
            }
        ));
        assert!(!errors[0].is_fatal());
        assert!(tracker.is_empty());
    }

    #[test]
    fn young_tokens_survive_sweep() {
        let start = Instant::now();
        let mut tracker = DeliveryTracker::new(Duration::from_secs(10));
        tracker.track(DeliveryToken(7), start);
        assert!(tracker.expire(start + Duration::from_secs(9)).is_empty());
        assert_eq!(tracker.len(), 1);
    }
}
