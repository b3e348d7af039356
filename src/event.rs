use rumqttc::QoS;
use std::fmt;

/// Handle returned by a publish, echoed back once the broker side confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryToken(pub u64);

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the dispatch loop reacts to, one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Tick,
    Message { topic: String, payload: Vec<u8> },
    ConnectionLost { reason: String },
    DeliveryConfirmed(DeliveryToken),
}

impl Event {
    pub fn message(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Event::Message {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
}

impl Outbound {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: QoS) -> Self {
        Outbound {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        }
    }
}
