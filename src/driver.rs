//! Single-threaded dispatch loop shared by every role.
//!
//! Timer ticks, inbound messages, delivery confirmations and connection loss
//! are funnelled through one `select!` and handled to completion one at a
//! time, so the application state needs no locking.

use rumqttc::QoS;
use std::time::{Duration, Instant};
use tokio::time::{interval, interval_at, Interval, MissedTickBehavior};

use crate::consts::MQTT_POLL_INTERVAL_MILLIS;
use crate::delivery::DeliveryTracker;
use crate::error::LoopResult;
use crate::event::{Event, Outbound};
use crate::reconnect::ReconnectPolicy;
use crate::transport::Transport;

/// One role's state machine, driven by [`Driver::run`].
pub trait Application {
    fn name(&self) -> &'static str;

    fn subscriptions(&self) -> Vec<(String, QoS)>;

    /// `None` for roles that only react to messages.
    fn tick_period(&self) -> Option<Duration>;

    fn handle_event(&mut self, event: &Event, now: Instant) -> Vec<Outbound>;

    /// Called once the broker session has been re-established and re-subscribed.
    fn on_reconnected(&mut self) {}

    fn is_finished(&self) -> bool {
        false
    }
}

pub struct Driver<T: Transport> {
    transport: T,
    policy: ReconnectPolicy,
    deliveries: DeliveryTracker,
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: Transport> Driver<T> {
    pub fn new(transport: T, policy: ReconnectPolicy, publish_timeout: Duration) -> Self {
        Driver {
            transport,
            policy,
            deliveries: DeliveryTracker::new(publish_timeout),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn pending_deliveries(&self) -> usize {
        self.deliveries.len()
    }

    /// Runs until the application finishes, the transport closes or a fatal error occurs.
    pub async fn run<A: Application>(&mut self, app: &mut A) -> LoopResult<()> {
        self.policy.connect(&mut self.transport).await?;
        self.subscribe_all(app).await?;
        info!("{} running", app.name());

        let mut ticker = app.tick_period().map(|period| {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut housekeeping = interval(Duration::from_millis(MQTT_POLL_INTERVAL_MILLIS));

        while !app.is_finished() {
            let outcome = tokio::select! {
                _ = next_tick(&mut ticker) => self.handle_event(app, Event::Tick).await,
                event = self.transport.next_event() => match event {
                    Some(event) => self.handle_event(app, event).await,
                    None => {
                        warn!("transport closed");
                        break;
                    }
                },
                _ = housekeeping.tick() => {
                    self.sweep_deliveries(Instant::now());
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("{e}");
            }
        }

        self.transport.disconnect().await;
        Ok(())
    }

    /// Handles one event to completion, including any publishes it causes.
    pub async fn handle_event<A: Application>(
        &mut self,
        app: &mut A,
        event: Event,
    ) -> LoopResult<()> {
        let now = Instant::now();
        match &event {
            Event::ConnectionLost { reason } => {
                warn!("connection lost: {reason}");
                self.policy.reconnect(&mut self.transport).await?;
                self.subscribe_all(app).await?;
                app.on_reconnected();
                return Ok(());
            }
            Event::DeliveryConfirmed(token) => match self.deliveries.confirm(*token, now) {
                Some(took) => debug!("token {token} delivered after {} ms", took.as_millis()),
                None => debug!("confirmation for unknown or expired token {token}"),
            },
            _ => {}
        }

        for outbound in app.handle_event(&event, now) {
            self.publish(outbound, now).await;
        }
        self.sweep_deliveries(now);
        Ok(())
    }

    async fn subscribe_all<A: Application>(&mut self, app: &A) -> LoopResult<()> {
        for (topic, qos) in app.subscriptions() {
            self.transport.subscribe(&topic, qos).await?;
            info!("subscribed to {topic} ({qos:?})");
        }
        Ok(())
    }

    async fn publish(&mut self, outbound: Outbound, now: Instant) {
        let Outbound {
            topic,
            payload,
            qos,
        } = outbound;
        match self
            .transport
            .publish(&topic, payload.clone().into_bytes(), qos)
            .await
        {
            Ok(token) => {
                debug!("published {payload} on {topic} (token {token})");
                self.deliveries.track(token, now);
            }
            Err(e) => error!("failed to publish {payload} on {topic}: {e}"),
        }
    }

    fn sweep_deliveries(&mut self, now: Instant) {
        for timeout in self.deliveries.expire(now) {
            warn!("{timeout}");
        }
    }
}
