use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoopError, LoopResult};

/// Scalars go over the wire as ASCII decimals with two fractional digits.
pub fn format_scalar(value: f64) -> String {
    format!("{value:.2}")
}

fn payload_text(topic: &str, payload: &[u8]) -> LoopResult<String> {
    let text = std::str::from_utf8(payload).map_err(|_| malformed(topic, payload))?;
    Ok(text.trim_end_matches('\0').trim().to_string())
}

fn malformed(topic: &str, payload: &[u8]) -> LoopError {
    LoopError::MalformedPayload {
        topic: topic.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
    }
}

pub fn parse_scalar(topic: &str, payload: &[u8]) -> LoopResult<f64> {
    let text = payload_text(topic, payload)?;
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(malformed(topic, payload)),
    }
}

pub fn parse_sequence(topic: &str, payload: &[u8]) -> LoopResult<u32> {
    let text = payload_text(topic, payload)?;
    text.parse::<u32>().map_err(|_| malformed(topic, payload))
}

/// Summary of one response-time round, logged as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundReport {
    pub round: u32,
    pub sent: u32,
    pub received: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<f64>,
    pub finished_at: DateTime<Utc>,
}

impl RoundReport {
    pub fn from_samples(round: u32, sent: u32, samples_ms: &[f64]) -> Self {
        let received = samples_ms.len() as u32;
        let (average_ms, min_ms, max_ms) = if samples_ms.is_empty() {
            (None, None, None)
        } else {
            let total: f64 = samples_ms.iter().sum();
            let min = samples_ms.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (Some(total / samples_ms.len() as f64), Some(min), Some(max))
        };
        RoundReport {
            round,
            sent,
            received,
            average_ms,
            min_ms,
            max_ms,
            finished_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_two_decimals() {
        assert_eq!(format_scalar(57.0), "57.00");
        assert_eq!(format_scalar(90.476190476), "90.48");
        assert_eq!(format_scalar(0.0), "0.00");
    }

    #[test]
    fn parses_padded_payloads() {
        assert_eq!(parse_scalar("t", b" 42.50\n").unwrap(), 42.5);
        assert_eq!(parse_scalar("t", b"100.00\0\0").unwrap(), 100.0);
        assert_eq!(parse_sequence("t", b"17").unwrap(), 17);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_scalar("SetPressure", b"fifty").unwrap_err();
        assert!(matches!(err, LoopError::MalformedPayload { ref topic, .. } if topic == "SetPressure"));
        assert!(parse_scalar("t", b"").is_err());
        assert!(parse_scalar("t", b"NaN").is_err());
        assert!(parse_scalar("t", b"inf").is_err());
        assert!(parse_scalar("t", &[0xff, 0xfe]).is_err());
        assert!(parse_sequence("t", b"-1").is_err());
    }

    #[test]
    fn report_statistics() {
        let report = RoundReport::from_samples(1, 3, &[2.0, 4.0, 6.0]);
        assert_eq!(report.received, 3);
        assert_eq!(report.average_ms, Some(4.0));
        assert_eq!(report.min_ms, Some(2.0));
        assert_eq!(report.max_ms, Some(6.0));

        let empty = RoundReport::from_samples(2, 101, &[]);
        assert_eq!(empty.average_ms, None);
        assert!(!empty.to_json().contains("average_ms"));
    }
}
