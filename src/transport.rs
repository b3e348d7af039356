use rumqttc::{AsyncClient, ConnectReturnCode, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::consts::*;
use crate::error::{LoopResult, TransportError};
use crate::event::{DeliveryToken, Event};
use crate::settings::Settings;

/// Message transport consumed by the dispatch loop.
///
/// `next_event` is raced against timers, so implementations must make it
/// cancel safe. `None` means the transport is gone for good.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn connect(&mut self) -> Result<(), TransportError>;
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<DeliveryToken, TransportError>;
    async fn next_event(&mut self) -> Option<Event>;
    async fn disconnect(&mut self);
}

type ConnectReply = oneshot::Sender<Result<(), TransportError>>;
type InFlight = Arc<Mutex<VecDeque<DeliveryToken>>>;

/// `Transport` over a rumqttc client. The event loop lives in a pump task
/// that hands notifications to the dispatch loop over a single channel.
pub struct MqttTransport {
    client: AsyncClient,
    events: mpsc::Receiver<Event>,
    connect_requests: mpsc::Sender<ConnectReply>,
    in_flight: InFlight,
    next_token: u64,
    request_timeout: Duration,
}

impl MqttTransport {
    /// Spawns the pump, so this has to run inside the tokio runtime.
    pub fn new(settings: &Settings) -> LoopResult<Self> {
        let mut options = MqttOptions::new(
            settings.client_id(),
            settings.broker.host.clone(),
            settings.broker.port,
        );
        options
            .set_keep_alive(Duration::from_secs(settings.broker.keep_alive_secs))
            .set_clean_session(settings.broker.clean_session);

        let (client, eventloop) = AsyncClient::new(options, MQTT_THREAD_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(MPSC_BUFFER_SIZE);
        let (connect_tx, connect_rx) = mpsc::channel(1);
        let in_flight: InFlight = Arc::new(Mutex::new(VecDeque::new()));

        let pump = Pump {
            eventloop,
            events: event_tx,
            connect_requests: connect_rx,
            in_flight: in_flight.clone(),
            confirm_level: settings.role_qos()?,
        };
        tokio::spawn(pump.run());

        Ok(MqttTransport {
            client,
            events: event_rx,
            connect_requests: connect_tx,
            in_flight,
            next_token: 0,
            request_timeout: settings.publish_timeout(),
        })
    }

    fn forget(&self, token: DeliveryToken) {
        if let Ok(mut queue) = self.in_flight.lock() {
            queue.retain(|t| *t != token);
        }
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.connect_requests
            .send(reply_tx)
            .await
            .map_err(|_| TransportError::Closed)?;
        reply_rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let millis = self.request_timeout.as_millis() as u64;
        timeout(self.request_timeout, self.client.subscribe(topic, qos))
            .await
            .map_err(|_| TransportError::Timeout(millis))?
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<DeliveryToken, TransportError> {
        self.next_token += 1;
        let token = DeliveryToken(self.next_token);
        // registered before the request exists so the pump can never see its confirmation first
        if let Ok(mut queue) = self.in_flight.lock() {
            queue.push_back(token);
        }
        let millis = self.request_timeout.as_millis() as u64;
        let outcome = match timeout(
            self.request_timeout,
            self.client.publish(topic, qos, false, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(token),
            Ok(Err(e)) => Err(TransportError::Client(e.to_string())),
            Err(_) => Err(TransportError::Timeout(millis)),
        };
        if outcome.is_err() {
            self.forget(token);
        }
        outcome
    }

    async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    async fn disconnect(&mut self) {
        match timeout(self.request_timeout, self.client.disconnect()).await {
            Ok(Ok(())) => info!("disconnected from broker"),
            Ok(Err(e)) => debug!("disconnect request failed: {e}"),
            Err(_) => debug!("disconnect request timed out"),
        }
    }
}

struct Pump {
    eventloop: EventLoop,
    events: mpsc::Sender<Event>,
    connect_requests: mpsc::Receiver<ConnectReply>,
    in_flight: InFlight,
    confirm_level: QoS,
}

impl Pump {
    async fn run(mut self) {
        while let Some(reply) = self.connect_requests.recv().await {
            let outcome = self.await_connack().await;
            let connected = outcome.is_ok();
            if reply.send(outcome).is_err() {
                return;
            }
            if connected && !self.forward().await {
                return;
            }
        }
        debug!("mqtt pump stopped");
    }

    async fn await_connack(&mut self) -> Result<(), TransportError> {
        loop {
            match self.eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(Packet::ConnAck(ack))) => {
                    return match ack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(TransportError::Refused(format!("{code:?}"))),
                    };
                }
                Ok(other) => trace!("waiting for connack, got {other:?}"),
                Err(e) => return Err(TransportError::Connection(e.to_string())),
            }
        }
    }

    /// Forwards notifications until the connection drops. Returns false once
    /// nobody is listening any more.
    async fn forward(&mut self) -> bool {
        loop {
            let event = match self.eventloop.poll().await {
                Ok(notification) => match self.translate(notification) {
                    Some(event) => event,
                    None => continue,
                },
                Err(e) => {
                    self.on_connection_lost();
                    Event::ConnectionLost {
                        reason: e.to_string(),
                    }
                }
            };
            let lost = matches!(event, Event::ConnectionLost { .. });
            if self.events.send(event).await.is_err() {
                return false;
            }
            if lost {
                return true;
            }
        }
    }

    fn translate(&self, notification: rumqttc::Event) -> Option<Event> {
        match notification {
            rumqttc::Event::Incoming(Packet::Publish(publish)) => Some(Event::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            rumqttc::Event::Outgoing(Outgoing::Publish(_))
                if self.confirm_level == QoS::AtMostOnce =>
            {
                self.confirm_oldest()
            }
            rumqttc::Event::Incoming(Packet::PubAck(_))
                if self.confirm_level == QoS::AtLeastOnce =>
            {
                self.confirm_oldest()
            }
            rumqttc::Event::Incoming(Packet::PubComp(_))
                if self.confirm_level == QoS::ExactlyOnce =>
            {
                self.confirm_oldest()
            }
            other => {
                trace!("mqtt notification {other:?}");
                None
            }
        }
    }

    fn confirm_oldest(&self) -> Option<Event> {
        let token = self.in_flight.lock().ok()?.pop_front()?;
        Some(Event::DeliveryConfirmed(token))
    }

    /// QoS 0 publishes still queued are gone with the socket. Unacknowledged
    /// QoS 1 and 2 publishes are replayed first and in order after the next
    /// connack, so their tokens keep their place in the queue.
    fn on_connection_lost(&self) {
        if self.confirm_level != QoS::AtMostOnce {
            return;
        }
        if let Ok(mut queue) = self.in_flight.lock() {
            if !queue.is_empty() {
                debug!("dropping {} unconfirmed publishes", queue.len());
            }
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{PubAck, PubComp, Publish};

    fn pump_with(confirm_level: QoS, tokens: &[u64]) -> (Pump, AsyncClient) {
        let options = MqttOptions::new("test", "localhost", 1883);
        let (client, eventloop) = AsyncClient::new(options, MQTT_THREAD_CHANNEL_CAPACITY);
        let (events, _) = mpsc::channel(1);
        let (_, connect_requests) = mpsc::channel(1);
        let in_flight: InFlight = Arc::new(Mutex::new(
            tokens.iter().copied().map(DeliveryToken).collect(),
        ));
        let pump = Pump {
            eventloop,
            events,
            connect_requests,
            in_flight,
            confirm_level,
        };
        (pump, client)
    }

    fn outgoing_publish() -> rumqttc::Event {
        rumqttc::Event::Outgoing(Outgoing::Publish(0))
    }

    fn puback() -> rumqttc::Event {
        rumqttc::Event::Incoming(Packet::PubAck(PubAck::new(1)))
    }

    fn pubcomp() -> rumqttc::Event {
        rumqttc::Event::Incoming(Packet::PubComp(PubComp::new(1)))
    }

    fn confirmed(token: u64) -> Option<Event> {
        Some(Event::DeliveryConfirmed(DeliveryToken(token)))
    }

    fn queued(pump: &Pump) -> Vec<u64> {
        pump.in_flight.lock().unwrap().iter().map(|t| t.0).collect()
    }

    #[test]
    fn qos0_confirms_on_write() {
        let (pump, _client) = pump_with(QoS::AtMostOnce, &[1, 2, 3]);
        assert_eq!(pump.translate(puback()), None);
        assert_eq!(pump.translate(pubcomp()), None);
        assert_eq!(pump.translate(outgoing_publish()), confirmed(1));
        assert_eq!(pump.translate(outgoing_publish()), confirmed(2));
        assert_eq!(queued(&pump), vec![3]);
    }

    #[test]
    fn qos1_confirms_on_puback() {
        let (pump, _client) = pump_with(QoS::AtLeastOnce, &[1, 2, 3]);
        assert_eq!(pump.translate(outgoing_publish()), None);
        assert_eq!(pump.translate(pubcomp()), None);
        assert_eq!(pump.translate(puback()), confirmed(1));
        assert_eq!(pump.translate(puback()), confirmed(2));
        assert_eq!(pump.translate(puback()), confirmed(3));
        assert_eq!(pump.translate(puback()), None);
    }

    #[test]
    fn qos2_confirms_on_pubcomp() {
        let (pump, _client) = pump_with(QoS::ExactlyOnce, &[1, 2, 3]);
        assert_eq!(pump.translate(outgoing_publish()), None);
        assert_eq!(pump.translate(puback()), None);
        assert_eq!(pump.translate(pubcomp()), confirmed(1));
        assert_eq!(queued(&pump), vec![2, 3]);
    }

    #[test]
    fn incoming_publish_becomes_message() {
        let (pump, _client) = pump_with(QoS::AtMostOnce, &[1]);
        let publish = Publish::new("CurrentPressure", QoS::AtMostOnce, "40.00");
        assert_eq!(
            pump.translate(rumqttc::Event::Incoming(Packet::Publish(publish))),
            Some(Event::message("CurrentPressure", "40.00"))
        );
        assert_eq!(queued(&pump), vec![1]);
    }

    #[test]
    fn acknowledged_tokens_survive_connection_loss() {
        let (pump, _client) = pump_with(QoS::ExactlyOnce, &[5, 6]);
        pump.on_connection_lost();
        assert_eq!(queued(&pump), vec![5, 6]);

        pump.in_flight.lock().unwrap().push_back(DeliveryToken(7));
        assert_eq!(pump.translate(pubcomp()), confirmed(5));
        assert_eq!(pump.translate(pubcomp()), confirmed(6));
        assert_eq!(pump.translate(pubcomp()), confirmed(7));

        let (pump, _client) = pump_with(QoS::AtLeastOnce, &[5]);
        pump.on_connection_lost();
        assert_eq!(pump.translate(puback()), confirmed(5));
    }

    #[test]
    fn fire_and_forget_tokens_drop_with_connection() {
        let (pump, _client) = pump_with(QoS::AtMostOnce, &[5, 6]);
        pump.on_connection_lost();
        assert!(queued(&pump).is_empty());

        pump.in_flight.lock().unwrap().push_back(DeliveryToken(7));
        assert_eq!(pump.translate(outgoing_publish()), confirmed(7));
    }
}
