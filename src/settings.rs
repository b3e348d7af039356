use config::{Config, Environment, File};
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::consts::*;
use crate::error::{LoopError, LoopResult};

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    Process,
    Regulator,
    ResponseTime,
}

impl Role {
    pub fn default_client_id(&self) -> &'static str {
        match self {
            Role::Process => "IndustryProcess",
            Role::Regulator => "Regulator",
            Role::ResponseTime => "ResponseCheck",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Role::Process => "process",
            Role::Regulator => "regulator",
            Role::ResponseTime => "response-time",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Role {
    type Err = LoopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(Role::Process),
            "regulator" => Ok(Role::Regulator),
            "response-time" | "response_time" => Ok(Role::ResponseTime),
            other => Err(LoopError::Settings(format!("unknown role {other:?}"))),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            host: MQTT_DEFAULT_HOST.to_string(),
            port: MQTT_DEFAULT_PORT,
            client_id: None,
            keep_alive_secs: MQTT_KEEPALIVE_TIME,
            clean_session: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_retries: u32,
    pub retry_delay_millis: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        ReconnectSettings {
            max_retries: RECONNECT_MAX_RETRIES,
            retry_delay_millis: RECONNECT_DELAY_MILLIS,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TopicSettings {
    pub current_pressure: String,
    pub set_pressure: String,
    pub correction: String,
    pub response_test: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        TopicSettings {
            current_pressure: TOPIC_CURRENT_PRESSURE.to_string(),
            set_pressure: TOPIC_SET_PRESSURE.to_string(),
            correction: TOPIC_CORRECTION.to_string(),
            response_test: TOPIC_RESPONSE_TEST.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ProcessSettings {
    pub tick_millis: u64,
    pub baseline: f64,
    pub qos: u8,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        ProcessSettings {
            tick_millis: PROCESS_TICK_MILLIS,
            baseline: PROCESS_BASELINE,
            qos: 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct RegulatorSettings {
    pub dead_band: f64,
    pub upper: f64,
    pub lower: f64,
    pub initial_current: f64,
    pub qos: u8,
}

impl Default for RegulatorSettings {
    fn default() -> Self {
        RegulatorSettings {
            dead_band: REGULATOR_DEAD_BAND,
            upper: REGULATOR_UPPER,
            lower: REGULATOR_LOWER,
            initial_current: PROCESS_BASELINE,
            qos: 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ResponseTimeSettings {
    pub messages_per_round: u32,
    pub publish_interval_millis: u64,
    pub settle_millis: u64,
    /// `0` keeps measuring until the process is killed.
    pub rounds: u32,
    pub qos: u8,
}

impl Default for ResponseTimeSettings {
    fn default() -> Self {
        ResponseTimeSettings {
            messages_per_round: RESPONSE_MESSAGES_PER_ROUND,
            publish_interval_millis: RESPONSE_PUBLISH_INTERVAL_MILLIS,
            settle_millis: RESPONSE_SETTLE_MILLIS,
            rounds: 1,
            qos: 2,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Settings {
    pub role: Role,
    pub broker: BrokerSettings,
    pub publish_timeout_millis: u64,
    pub reconnect: ReconnectSettings,
    pub topics: TopicSettings,
    pub process: ProcessSettings,
    pub regulator: RegulatorSettings,
    pub response_time: ResponseTimeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            role: Role::default(),
            broker: BrokerSettings::default(),
            publish_timeout_millis: PUBLISH_TIMEOUT_MILLIS,
            reconnect: ReconnectSettings::default(),
            topics: TopicSettings::default(),
            process: ProcessSettings::default(),
            regulator: RegulatorSettings::default(),
            response_time: ResponseTimeSettings::default(),
        }
    }
}

pub fn qos_from_level(level: u8) -> LoopResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        n => Err(LoopError::Settings(format!("qos must be 0, 1 or 2, got {n}"))),
    }
}

impl Settings {
    /// Layers the optional YAML file and `PRESSURELOOP_*` environment over the defaults.
    pub fn load() -> LoopResult<Settings> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
        let settings: Settings = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(text: &str) -> LoopResult<Settings> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> LoopResult<()> {
        let invalid =
            |what: &str| -> LoopResult<()> { Err(LoopError::Settings(what.to_string())) };
        let r = &self.regulator;
        if !r.dead_band.is_finite() || r.dead_band < 0.0 {
            return invalid("regulator.dead_band must be finite and non-negative");
        }
        if !(r.lower < r.upper) {
            return invalid("regulator.lower must be less than regulator.upper");
        }
        if !self.process.baseline.is_finite() || !r.initial_current.is_finite() {
            return invalid("baseline values must be finite");
        }
        if self.process.tick_millis == 0 {
            return invalid("process.tick_millis must be positive");
        }
        if self.response_time.publish_interval_millis == 0 {
            return invalid("response_time.publish_interval_millis must be positive");
        }
        if self.response_time.messages_per_round == 0 {
            return invalid("response_time.messages_per_round must be positive");
        }
        if self.broker.keep_alive_secs < 5 {
            return invalid("broker.keep_alive_secs must be at least 5");
        }
        if self.publish_timeout_millis == 0 {
            return invalid("publish_timeout_millis must be positive");
        }
        qos_from_level(self.process.qos)?;
        qos_from_level(self.regulator.qos)?;
        qos_from_level(self.response_time.qos)?;
        Ok(())
    }

    pub fn client_id(&self) -> String {
        self.broker
            .client_id
            .clone()
            .unwrap_or_else(|| self.role.default_client_id().to_string())
    }

    /// QoS used by the active role for both its subscriptions and publishes.
    pub fn role_qos(&self) -> LoopResult<QoS> {
        match self.role {
            Role::Process => qos_from_level(self.process.qos),
            Role::Regulator => qos_from_level(self.regulator.qos),
            Role::ResponseTime => qos_from_level(self.response_time.qos),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_millis)
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("<unprintable settings: {e}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_broker_setup() {
        let s = Settings::default();
        assert_eq!(s.broker.host, "broker.hivemq.com");
        assert_eq!(s.broker.port, 1883);
        assert_eq!(s.reconnect.max_retries, 100);
        assert_eq!(s.process.tick_millis, 1000);
        assert_eq!(s.regulator.dead_band, 1.0);
        assert_eq!(s.response_time.qos, 2);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_nested_keys() {
        let s = Settings::from_yaml(
            "role: regulator\nbroker:\n  host: localhost\nregulator:\n  dead_band: 2.5\n",
        )
        .unwrap();
        assert_eq!(s.role, Role::Regulator);
        assert_eq!(s.broker.host, "localhost");
        assert_eq!(s.broker.port, 1883);
        assert_eq!(s.regulator.dead_band, 2.5);
        assert_eq!(s.client_id(), "Regulator");
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = Settings::from_yaml("regulator:\n  lower: 100.0\n  upper: 0.0\n").unwrap_err();
        assert!(matches!(err, LoopError::Settings(_)));
        assert!(Settings::from_yaml("process:\n  qos: 3\n").is_err());
        assert!(Settings::from_yaml("regulator:\n  dead_band: -1.0\n").is_err());
    }

    #[test]
    fn rejects_empty_response_rounds() {
        let err =
            Settings::from_yaml("response_time:\n  messages_per_round: 0\n  rounds: 0\n")
                .unwrap_err();
        let LoopError::Settings(what) = err else {
            panic!("expected a settings error, got {err:?}");
        };
        assert!(what.contains("messages_per_round"));
        assert!(Settings::from_yaml("response_time:\n  messages_per_round: 1\n").is_ok());
    }

    #[test]
    fn role_names() {
        assert_eq!("response-time".parse::<Role>().unwrap(), Role::ResponseTime);
        assert_eq!("Process".parse::<Role>().unwrap(), Role::Process);
        assert!("broker".parse::<Role>().is_err());
        assert_eq!(Role::ResponseTime.to_string(), "response-time");
    }
}
