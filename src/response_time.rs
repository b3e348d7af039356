//! Broker round-trip harness.
//!
//! Publishes a numbered sequence on a topic it is itself subscribed to and
//! measures how long each number takes to come back. Each round ends once
//! every echo has arrived or the settle period after the last publish has
//! passed, and produces a [`RoundReport`].

use rumqttc::QoS;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::driver::Application;
use crate::error::LoopResult;
use crate::event::{Event, Outbound};
use crate::payload::{parse_sequence, RoundReport};
use crate::settings::{qos_from_level, Settings};

#[derive(Debug, Clone)]
pub struct ResponseTimeHarness {
    topic: String,
    qos: QoS,
    interval: Duration,
    settle: Duration,
    per_round: u32,
    rounds: u32,
    round: u32,
    next_seq: u32,
    sent_at: HashMap<u32, Instant>,
    samples_ms: Vec<f64>,
    last_sent: Option<Instant>,
    last_report: Option<RoundReport>,
    finished: bool,
}

impl ResponseTimeHarness {
    pub fn new(
        topic: impl Into<String>,
        qos: QoS,
        interval: Duration,
        settle: Duration,
        per_round: u32,
        rounds: u32,
    ) -> Self {
        ResponseTimeHarness {
            topic: topic.into(),
            qos,
            interval,
            settle,
            per_round,
            rounds,
            round: 1,
            next_seq: 0,
            sent_at: HashMap::new(),
            samples_ms: Vec::new(),
            last_sent: None,
            last_report: None,
            finished: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> LoopResult<Self> {
        let r = &settings.response_time;
        Ok(ResponseTimeHarness::new(
            settings.topics.response_test.clone(),
            qos_from_level(r.qos)?,
            Duration::from_millis(r.publish_interval_millis),
            Duration::from_millis(r.settle_millis),
            r.messages_per_round,
            r.rounds,
        ))
    }

    pub fn last_report(&self) -> Option<&RoundReport> {
        self.last_report.as_ref()
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    fn on_tick(&mut self, now: Instant) -> Vec<Outbound> {
        if self.next_seq < self.per_round {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.sent_at.insert(seq, now);
            self.last_sent = Some(now);
            return vec![Outbound::new(self.topic.clone(), seq.to_string(), self.qos)];
        }
        let settled = self
            .last_sent
            .map_or(true, |t| now.saturating_duration_since(t) >= self.settle);
        if self.sent_at.is_empty() || settled {
            self.close_round();
        }
        vec![]
    }

    fn on_echo(&mut self, topic: &str, payload: &[u8], now: Instant) {
        let seq = match parse_sequence(topic, payload) {
            Ok(seq) => seq,
            Err(e) => {
                warn!("ignoring message: {e}");
                return;
            }
        };
        match self.sent_at.remove(&seq) {
            Some(sent) => {
                let elapsed_ms = now.saturating_duration_since(sent).as_secs_f64() * 1000.0;
                debug!("echo {seq}: response time {elapsed_ms:.2} ms");
                self.samples_ms.push(elapsed_ms);
            }
            None => debug!("echo {seq} was not expected"),
        }
    }

    fn close_round(&mut self) {
        let report = RoundReport::from_samples(self.round, self.next_seq, &self.samples_ms);
        match report.average_ms {
            Some(average) => info!(
                "round {}: average response time {average:.2} ms over {} of {} messages",
                self.round, report.received, report.sent
            ),
            None => warn!("round {}: no echoes received", self.round),
        }
        info!("{}", report.to_json());
        self.last_report = Some(report);

        if self.rounds != 0 && self.round >= self.rounds {
            self.finished = true;
            return;
        }
        self.round += 1;
        self.next_seq = 0;
        self.sent_at.clear();
        self.samples_ms.clear();
        self.last_sent = None;
    }
}

impl Application for ResponseTimeHarness {
    fn name(&self) -> &'static str {
        "response-time"
    }

    fn subscriptions(&self) -> Vec<(String, QoS)> {
        vec![(self.topic.clone(), self.qos)]
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn handle_event(&mut self, event: &Event, now: Instant) -> Vec<Outbound> {
        if self.finished {
            return vec![];
        }
        match event {
            Event::Tick => self.on_tick(now),
            Event::Message { topic, payload } if *topic == self.topic => {
                self.on_echo(topic, payload, now);
                vec![]
            }
            _ => vec![],
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(per_round: u32, rounds: u32) -> ResponseTimeHarness {
        ResponseTimeHarness::new(
            "ResponseTest",
            QoS::ExactlyOnce,
            Duration::from_millis(10),
            Duration::from_millis(100),
            per_round,
            rounds,
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn publishes_sequence_then_reports() {
        let start = Instant::now();
        let mut p = harness(3, 1);
        let mut sent = vec![];
        for i in 0..3 {
            let out = p.handle_event(&Event::Tick, start + ms(10 * i));
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].qos, QoS::ExactlyOnce);
            sent.push(out[0].payload.clone());
        }
        assert_eq!(sent, vec!["0", "1", "2"]);

        p.handle_event(&Event::message("ResponseTest", "0"), start + ms(4));
        p.handle_event(&Event::message("ResponseTest", "1"), start + ms(16));
        p.handle_event(&Event::message("ResponseTest", "2"), start + ms(26));
        assert!(!p.is_finished());

        assert!(p.handle_event(&Event::Tick, start + ms(30)).is_empty());
        assert!(p.is_finished());
        let report = p.last_report().unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.received, 3);
        assert!((report.average_ms.unwrap() - 16.0 / 3.0).abs() < 1e-6);
        assert!((report.min_ms.unwrap() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn missing_echoes_wait_for_settle() {
        let start = Instant::now();
        let mut p = harness(2, 1);
        p.handle_event(&Event::Tick, start);
        p.handle_event(&Event::Tick, start + ms(10));
        p.handle_event(&Event::message("ResponseTest", "0"), start + ms(5));

        p.handle_event(&Event::Tick, start + ms(50));
        assert!(!p.is_finished());
        p.handle_event(&Event::Tick, start + ms(110));
        assert!(p.is_finished());
        assert_eq!(p.last_report().unwrap().received, 1);
    }

    #[test]
    fn garbage_and_foreign_topics_are_ignored() {
        let start = Instant::now();
        let mut p = harness(1, 1);
        p.handle_event(&Event::Tick, start);
        p.handle_event(&Event::message("ResponseTest", "zero"), start + ms(1));
        p.handle_event(&Event::message("Elsewhere", "0"), start + ms(1));
        p.handle_event(&Event::message("ResponseTest", "9"), start + ms(1));
        p.handle_event(&Event::Tick, start + ms(200));
        let report = p.last_report().unwrap();
        assert_eq!(report.received, 0);
        assert_eq!(report.average_ms, None);
    }

    #[test]
    fn further_rounds_restart_sequence() {
        let start = Instant::now();
        let mut p = harness(1, 2);
        p.handle_event(&Event::Tick, start);
        p.handle_event(&Event::message("ResponseTest", "0"), start + ms(3));
        p.handle_event(&Event::Tick, start + ms(10));
        assert_eq!(p.round(), 2);
        assert!(!p.is_finished());

        let out = p.handle_event(&Event::Tick, start + ms(20));
        assert_eq!(out[0].payload, "0");
        p.handle_event(&Event::Tick, start + ms(200));
        assert!(p.is_finished());
        assert!(p.handle_event(&Event::Tick, start + ms(210)).is_empty());
    }
}
