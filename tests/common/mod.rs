use pressureloop::{DeliveryToken, Event, Transport, TransportError};
use rumqttc::QoS;
use std::collections::VecDeque;

/// In-memory transport replaying a fixed script of events.
#[derive(Default)]
pub struct ScriptedTransport {
    pub connect_outcomes: VecDeque<Result<(), TransportError>>,
    pub events: VecDeque<Event>,
    pub connects: u32,
    pub subscriptions: Vec<(String, QoS)>,
    pub published: Vec<(String, String)>,
    pub disconnected: bool,
    pub fail_publishes: bool,
    /// Reflects publishes on subscribed topics back as messages.
    pub echo: bool,
    /// Keeps `next_event` pending instead of closing once the script runs out.
    pub hold_open: bool,
    pub next_token: u64,
}

impl ScriptedTransport {
    pub fn with_events(events: Vec<Event>) -> Self {
        ScriptedTransport {
            events: events.into(),
            ..Default::default()
        }
    }

    pub fn connect_script(mut self, outcomes: Vec<Result<(), TransportError>>) -> Self {
        self.connect_outcomes = outcomes.into();
        self
    }

    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

pub fn refused() -> Result<(), TransportError> {
    Err(TransportError::Connection("connection refused".into()))
}

impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connects += 1;
        self.connect_outcomes.pop_front().unwrap_or(Ok(()))
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QoS,
    ) -> Result<DeliveryToken, TransportError> {
        if self.fail_publishes {
            return Err(TransportError::Timeout(10_000));
        }
        self.next_token += 1;
        let text = String::from_utf8_lossy(&payload).into_owned();
        self.published.push((topic.to_string(), text));
        if self.echo && self.subscriptions.iter().any(|(t, _)| t == topic) {
            self.events.push_back(Event::message(topic, payload));
        }
        Ok(DeliveryToken(self.next_token))
    }

    async fn next_event(&mut self) -> Option<Event> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }

    async fn disconnect(&mut self) {
        self.disconnected = true;
    }
}
