use itertools::{Itertools, MinMaxResult};
use serde::Serialize;
use std::time::Duration;

use crate::params::{MeasurementKind, SessionParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub sequence: u32,
    pub round_trip: Duration,
    pub retransmitted: bool,
}

/// Completed probes of one session, in the order they completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleSet {
    pub samples: Vec<Sample>,
    /// Probes the server rejected or echoed with the wrong sequence number.
    pub mismatches: u32,
}

impl SampleSet {
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn duration_to_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub measurement_kind: MeasurementKind,
    pub payload_size: usize,
    pub transmitted: usize,
    pub retransmitted: usize,
    pub loss_percent: u32,
    /// `None` when no probe completed.
    pub mean_rtt_ms: Option<f64>,
    pub min_rtt_ms: Option<f64>,
    pub max_rtt_ms: Option<f64>,
    pub total_ms: f64,
    /// Kilobits of payload per second; throughput sessions only.
    pub throughput_kbps: Option<f64>,
}

impl Statistics {
    pub fn aggregate(samples: &SampleSet, params: &SessionParameters) -> Self {
        let total: Duration = samples.samples.iter().map(|s| s.round_trip).sum();
        let total_ms = duration_to_ms(total);

        let mean_rtt_ms = if samples.is_empty() {
            None
        } else {
            Some(total_ms / samples.len() as f64)
        };

        let (min_rtt_ms, max_rtt_ms) = match samples.samples.iter().map(|s| s.round_trip).minmax() {
            MinMaxResult::NoElements => (None, None),
            MinMaxResult::OneElement(d) => (Some(duration_to_ms(d)), Some(duration_to_ms(d))),
            MinMaxResult::MinMax(lo, hi) => (Some(duration_to_ms(lo)), Some(duration_to_ms(hi))),
        };

        let loss_percent =
            (100.0 * samples.mismatches as f64 / params.probe_count as f64).round() as u32;

        let throughput_kbps = match params.measurement_kind {
            MeasurementKind::Throughput => mean_rtt_ms
                .filter(|mean| *mean > 0.0)
                .map(|mean| params.payload_size as f64 * 8.0 / (mean / 1000.0) / 1000.0),
            MeasurementKind::Rtt => None,
        };

        Statistics {
            measurement_kind: params.measurement_kind,
            payload_size: params.payload_size,
            transmitted: samples.len(),
            retransmitted: samples.samples.iter().filter(|s| s.retransmitted).count(),
            loss_percent,
            mean_rtt_ms,
            min_rtt_ms,
            max_rtt_ms,
            total_ms,
            throughput_kbps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sequence: u32, ms: u64) -> Sample {
        Sample {
            sequence,
            round_trip: Duration::from_millis(ms),
            retransmitted: false,
        }
    }

    #[test]
    fn mean_and_loss() {
        let params = SessionParameters::new(MeasurementKind::Rtt, 4, 100, 0).unwrap();
        let mut set = SampleSet::default();
        set.push(sample(0, 2));
        set.push(sample(1, 4));
        set.push(sample(2, 6));
        set.mismatches = 1;

        let stats = Statistics::aggregate(&set, &params);
        assert_eq!(stats.transmitted, 3);
        assert_eq!(stats.loss_percent, 25);
        assert_eq!(stats.mean_rtt_ms, Some(4.0));
        assert_eq!(stats.min_rtt_ms, Some(2.0));
        assert_eq!(stats.max_rtt_ms, Some(6.0));
        assert_eq!(stats.total_ms, 12.0);
        assert_eq!(stats.throughput_kbps, None);
    }

    #[test]
    fn loss_is_rounded() {
        let params = SessionParameters::new(MeasurementKind::Rtt, 3, 1, 0).unwrap();
        let set = SampleSet {
            samples: vec![sample(0, 1), sample(1, 1)],
            mismatches: 2,
        };
        assert_eq!(Statistics::aggregate(&set, &params).loss_percent, 67);
    }

    #[test]
    fn no_samples_has_no_mean() {
        let params = SessionParameters::new(MeasurementKind::Throughput, 5, 1000, 0).unwrap();
        let stats = Statistics::aggregate(&SampleSet::default(), &params);
        assert_eq!(stats.transmitted, 0);
        assert_eq!(stats.mean_rtt_ms, None);
        assert_eq!(stats.min_rtt_ms, None);
        assert_eq!(stats.throughput_kbps, None);
    }

    #[test]
    fn throughput_in_kilobits() {
        let params = SessionParameters::new(MeasurementKind::Throughput, 2, 1000, 0).unwrap();
        let set = SampleSet {
            samples: vec![sample(0, 10), sample(1, 10)],
            mismatches: 0,
        };
        // 8000 bits every 10ms
        let kbps = Statistics::aggregate(&set, &params).throughput_kbps.unwrap();
        assert!((kbps - 800.0).abs() < 1e-9);
    }
}
