use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::MAX_FIELD_VALUE;

/// Payload sizes swept by a round-trip-time run, one session per size.
pub const RTT_PAYLOAD_SIZES: [usize; 6] = [1, 100, 200, 400, 800, 1000];
/// Payload sizes swept by a throughput run, one session per size.
pub const THROUGHPUT_PAYLOAD_SIZES: [usize; 5] = [1000, 2000, 4000, 16000, 32000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    Rtt,
    Throughput,
}

impl MeasurementKind {
    pub fn token(&self) -> &'static str {
        match *self {
            MeasurementKind::Rtt => "rtt",
            MeasurementKind::Throughput => "thput",
        }
    }

    pub fn payload_sizes(&self) -> &'static [usize] {
        match *self {
            MeasurementKind::Rtt => &RTT_PAYLOAD_SIZES,
            MeasurementKind::Throughput => &THROUGHPUT_PAYLOAD_SIZES,
        }
    }
}

impl FromStr for MeasurementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rtt" => Ok(MeasurementKind::Rtt),
            "thput" => Ok(MeasurementKind::Throughput),
            _ => Err(format!("Unknown measurement: {}", s)),
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Parameters negotiated by the HELLO exchange. They never change once a
/// session is established; each side keeps its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub measurement_kind: MeasurementKind,
    pub probe_count: u32,
    pub payload_size: usize,
    pub artificial_delay_ms: u64,
}

impl SessionParameters {
    pub fn new(
        measurement_kind: MeasurementKind,
        probe_count: u32,
        payload_size: usize,
        artificial_delay_ms: u64,
    ) -> Result<Self, String> {
        let params = SessionParameters {
            measurement_kind,
            probe_count,
            payload_size,
            artificial_delay_ms,
        };
        params.validate()?;
        Ok(params)
    }

    /// Every field has to fit the fixed-width HELLO fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.probe_count == 0 {
            return Err("probe count must be positive".to_string());
        }
        if self.probe_count as u64 > MAX_FIELD_VALUE {
            return Err(format!(
                "probe count {} exceeds {}",
                self.probe_count, MAX_FIELD_VALUE
            ));
        }
        if self.payload_size as u64 > MAX_FIELD_VALUE {
            return Err(format!(
                "payload size {} exceeds {}",
                self.payload_size, MAX_FIELD_VALUE
            ));
        }
        if self.artificial_delay_ms > MAX_FIELD_VALUE {
            return Err(format!(
                "server delay {} exceeds {}",
                self.artificial_delay_ms, MAX_FIELD_VALUE
            ));
        }
        Ok(())
    }
}
