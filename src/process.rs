//! First-order process fed by the regulator's correction value.
//!
//! The plant is a discretised first-order lag with unity gain and a 10 s time
//! constant, sampled once per second (bilinear transform):
//!
//! ```text
//! y[n] = 1/21 * (x[n] + x[n-1]) + 19/21 * y[n-1]
//! ```

use rumqttc::QoS;
use std::time::{Duration, Instant};

use crate::driver::Application;
use crate::error::LoopResult;
use crate::event::{Event, Outbound};
use crate::payload::{format_scalar, parse_scalar};
use crate::settings::{qos_from_level, Settings};

pub const INPUT_GAIN: f64 = 1.0 / 21.0;
pub const OUTPUT_GAIN: f64 = 19.0 / 21.0;

/// Two-sample window over the input and output signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessState {
    pub input_prev: f64,
    pub input_curr: f64,
    pub output_prev: f64,
    pub output_curr: f64,
}

impl ProcessState {
    pub fn new(baseline: f64) -> Self {
        ProcessState {
            input_prev: 0.0,
            input_curr: 0.0,
            output_prev: baseline,
            output_curr: baseline,
        }
    }

    /// Latest input wins; it is held until the next tick consumes it.
    pub fn set_input(&mut self, value: f64) {
        self.input_curr = value;
    }

    /// Advances the recurrence by one sample and returns the new output.
    pub fn step(&mut self) -> f64 {
        self.output_curr =
            INPUT_GAIN * (self.input_curr + self.input_prev) + OUTPUT_GAIN * self.output_prev;
        self.output_prev = self.output_curr;
        self.input_prev = self.input_curr;
        self.output_curr
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSimulator {
    state: ProcessState,
    input_topic: String,
    output_topic: String,
    qos: QoS,
    tick_period: Duration,
}

impl ProcessSimulator {
    pub fn new(
        baseline: f64,
        input_topic: impl Into<String>,
        output_topic: impl Into<String>,
        qos: QoS,
        tick_period: Duration,
    ) -> Self {
        ProcessSimulator {
            state: ProcessState::new(baseline),
            input_topic: input_topic.into(),
            output_topic: output_topic.into(),
            qos,
            tick_period,
        }
    }

    pub fn from_settings(settings: &Settings) -> LoopResult<Self> {
        Ok(ProcessSimulator::new(
            settings.process.baseline,
            settings.topics.correction.clone(),
            settings.topics.current_pressure.clone(),
            qos_from_level(settings.process.qos)?,
            Duration::from_millis(settings.process.tick_millis),
        ))
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }
}

impl Application for ProcessSimulator {
    fn name(&self) -> &'static str {
        "process"
    }

    fn subscriptions(&self) -> Vec<(String, QoS)> {
        vec![(self.input_topic.clone(), self.qos)]
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.tick_period)
    }

    fn handle_event(&mut self, event: &Event, _now: Instant) -> Vec<Outbound> {
        match event {
            Event::Tick => {
                let output = self.state.step();
                info!("y[n] = {output:.6}");
                vec![Outbound::new(
                    self.output_topic.clone(),
                    format_scalar(output),
                    self.qos,
                )]
            }
            Event::Message { topic, payload } if *topic == self.input_topic => {
                match parse_scalar(topic, payload) {
                    Ok(value) => {
                        info!("received correction x[n] = {value:.2}");
                        self.state.set_input(value);
                    }
                    Err(e) => warn!("ignoring message: {e}"),
                }
                vec![]
            }
            _ => vec![],
        }
    }
}
