//! Bang-bang pressure regulator with a symmetric dead band.

use rumqttc::QoS;
use std::time::{Duration, Instant};

use crate::driver::Application;
use crate::error::LoopResult;
use crate::event::{Event, Outbound};
use crate::payload::{format_scalar, parse_scalar};
use crate::settings::{qos_from_level, Settings};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorState {
    pub target: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    DriveUpper,
    DriveLower,
    Hold,
}

/// Output bounds and the dead band around the setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    pub dead_band: f64,
    pub upper: f64,
    pub lower: f64,
}

impl Hysteresis {
    pub fn decide(&self, state: &RegulatorState) -> Decision {
        if state.target - state.current > self.dead_band {
            Decision::DriveUpper
        } else if state.current - state.target > self.dead_band {
            Decision::DriveLower
        } else {
            Decision::Hold
        }
    }

    pub fn output(&self, decision: Decision) -> Option<f64> {
        match decision {
            Decision::DriveUpper => Some(self.upper),
            Decision::DriveLower => Some(self.lower),
            Decision::Hold => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Regulator {
    state: RegulatorState,
    hysteresis: Hysteresis,
    last_command: Option<f64>,
    current_topic: String,
    target_topic: String,
    command_topic: String,
    qos: QoS,
}

impl Regulator {
    pub fn new(
        hysteresis: Hysteresis,
        initial_current: f64,
        current_topic: impl Into<String>,
        target_topic: impl Into<String>,
        command_topic: impl Into<String>,
        qos: QoS,
    ) -> Self {
        Regulator {
            state: RegulatorState {
                target: 0.0,
                current: initial_current,
            },
            hysteresis,
            last_command: None,
            current_topic: current_topic.into(),
            target_topic: target_topic.into(),
            command_topic: command_topic.into(),
            qos,
        }
    }

    pub fn from_settings(settings: &Settings) -> LoopResult<Self> {
        let r = &settings.regulator;
        Ok(Regulator::new(
            Hysteresis {
                dead_band: r.dead_band,
                upper: r.upper,
                lower: r.lower,
            },
            r.initial_current,
            settings.topics.current_pressure.clone(),
            settings.topics.set_pressure.clone(),
            settings.topics.correction.clone(),
            qos_from_level(r.qos)?,
        ))
    }

    pub fn state(&self) -> &RegulatorState {
        &self.state
    }

    pub fn last_command(&self) -> Option<f64> {
        self.last_command
    }

    /// Stores the measurement and returns a command only when it differs from the last one sent.
    pub fn update_current(&mut self, current: f64) -> Option<f64> {
        self.state.current = current;
        let decision = self.hysteresis.decide(&self.state);
        debug!(
            "current {:.2}, target {:.2}, decision {:?}",
            self.state.current, self.state.target, decision
        );
        let command = self.hysteresis.output(decision)?;
        if self.last_command == Some(command) {
            return None;
        }
        self.last_command = Some(command);
        Some(command)
    }

    pub fn update_target(&mut self, target: f64) {
        self.state.target = target;
    }

    /// Forgets the last command so the next out-of-band sample is sent again.
    pub fn reset_command(&mut self) {
        self.last_command = None;
    }
}

impl Application for Regulator {
    fn name(&self) -> &'static str {
        "regulator"
    }

    fn subscriptions(&self) -> Vec<(String, QoS)> {
        vec![
            (self.current_topic.clone(), self.qos),
            (self.target_topic.clone(), self.qos),
        ]
    }

    fn tick_period(&self) -> Option<Duration> {
        None
    }

    fn on_reconnected(&mut self) {
        // a command sent around the drop may have been lost with the clean session
        self.reset_command();
    }

    fn handle_event(&mut self, event: &Event, _now: Instant) -> Vec<Outbound> {
        let Event::Message { topic, payload } = event else {
            return vec![];
        };
        if *topic != self.current_topic && *topic != self.target_topic {
            return vec![];
        }
        let value = match parse_scalar(topic, payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("ignoring message: {e}");
                return vec![];
            }
        };
        if *topic == self.target_topic {
            info!("set pressure {value:.2}");
            self.update_target(value);
            return vec![];
        }
        match self.update_current(value) {
            Some(command) => {
                info!("correction update {command:.2}");
                vec![Outbound::new(
                    self.command_topic.clone(),
                    format_scalar(command),
                    self.qos,
                )]
            }
            None => vec![],
        }
    }
}
