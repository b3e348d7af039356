
pub const MQTT_KEEPALIVE_TIME: u64 = 20_u64;
pub const MQTT_THREAD_CHANNEL_CAPACITY: usize = 10_usize;
pub const MQTT_POLL_INTERVAL_MILLIS: u64 = 100_u64;
pub const MQTT_DEFAULT_HOST: &str = "broker.hivemq.com";
pub const MQTT_DEFAULT_PORT: u16 = 1883_u16;

pub const MPSC_BUFFER_SIZE: usize = 100_usize;

pub const PUBLISH_TIMEOUT_MILLIS: u64 = 10_000_u64;
pub const RECONNECT_MAX_RETRIES: u32 = 100_u32;
pub const RECONNECT_DELAY_MILLIS: u64 = 500_u64;

pub const TOPIC_CURRENT_PRESSURE: &str = "CurrentPressure";
pub const TOPIC_SET_PRESSURE: &str = "SetPressure";
pub const TOPIC_CORRECTION: &str = "HysteresisCorrection";
pub const TOPIC_RESPONSE_TEST: &str = "ResponseTest";

pub const PROCESS_TICK_MILLIS: u64 = 1000_u64;
pub const PROCESS_BASELINE: f64 = 100.0_f64;

pub const REGULATOR_DEAD_BAND: f64 = 1.0_f64;
pub const REGULATOR_UPPER: f64 = 100.0_f64;
pub const REGULATOR_LOWER: f64 = 0.0_f64;

pub const RESPONSE_MESSAGES_PER_ROUND: u32 = 101_u32;
pub const RESPONSE_PUBLISH_INTERVAL_MILLIS: u64 = 10_u64;
pub const RESPONSE_SETTLE_MILLIS: u64 = 100_u64;

pub const CONFIG_FILE: &str = "pressureloop.yaml";
pub const CONFIG_PATH_ENV: &str = "PRESSURELOOP_CONFIG";
pub const ENV_PREFIX: &str = "PRESSURELOOP";
