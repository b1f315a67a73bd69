//! Transport statistics aggregation and network-quality tracking.

use crate::transport::{MediaKind, StatsReport};
use chrono::{DateTime, Utc};
use parley_types::QualityTier;
use serde::Serialize;
use std::collections::VecDeque;

/// Per-media-kind counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub jitter_ms: f64,
}

impl MediaStats {
    pub fn packet_loss_pct(&self) -> f64 {
        loss_pct(self.packets_received, self.packets_lost)
    }
}

/// Aggregated view over one statistics poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub timestamp: DateTime<Utc>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    /// `lost / (received + lost) * 100`.
    pub packet_loss_pct: f64,
    /// Worst inbound jitter, in milliseconds.
    pub jitter_ms: f64,
    /// Round-trip time of the nominated candidate pair, when known.
    pub rtt_ms: Option<f64>,
    pub audio: MediaStats,
    pub video: MediaStats,
}

fn loss_pct(received: u64, lost: u64) -> f64 {
    let total = received + lost;
    if total == 0 {
        0.0
    } else {
        lost as f64 / total as f64 * 100.0
    }
}

impl ConnectionStats {
    pub fn from_reports(reports: &[StatsReport]) -> Self {
        let mut audio = MediaStats::default();
        let mut video = MediaStats::default();
        let mut rtt_ms = None;

        for report in reports {
            match report {
                StatsReport::InboundRtp {
                    kind,
                    bytes_received,
                    packets_received,
                    packets_lost,
                    jitter_secs,
                } => {
                    let media = match kind {
                        MediaKind::Audio => &mut audio,
                        MediaKind::Video => &mut video,
                    };
                    media.bytes_received += bytes_received;
                    media.packets_received += packets_received;
                    media.packets_lost += (*packets_lost).max(0) as u64;
                    media.jitter_ms = media.jitter_ms.max(jitter_secs * 1000.0);
                }
                StatsReport::OutboundRtp {
                    kind,
                    bytes_sent,
                    packets_sent,
                } => {
                    let media = match kind {
                        MediaKind::Audio => &mut audio,
                        MediaKind::Video => &mut video,
                    };
                    media.bytes_sent += bytes_sent;
                    media.packets_sent += packets_sent;
                }
                StatsReport::CandidatePair {
                    nominated: true,
                    current_round_trip_time_secs: Some(rtt),
                } => {
                    rtt_ms = Some(rtt * 1000.0);
                }
                StatsReport::CandidatePair { .. } => {}
            }
        }

        let packets_received = audio.packets_received + video.packets_received;
        let packets_lost = audio.packets_lost + video.packets_lost;

        Self {
            timestamp: Utc::now(),
            bytes_sent: audio.bytes_sent + video.bytes_sent,
            bytes_received: audio.bytes_received + video.bytes_received,
            packets_sent: audio.packets_sent + video.packets_sent,
            packets_received,
            packets_lost,
            packet_loss_pct: loss_pct(packets_received, packets_lost),
            jitter_ms: audio.jitter_ms.max(video.jitter_ms),
            rtt_ms,
            audio,
            video,
        }
    }

    /// Builds the quality sample for this poll. A missing RTT classifies on
    /// loss alone.
    pub fn quality_sample(&self) -> NetworkQualitySample {
        let rtt_ms = self.rtt_ms.unwrap_or(0.0);
        NetworkQualitySample {
            timestamp: self.timestamp,
            packet_loss_pct: self.packet_loss_pct,
            rtt_ms,
            jitter_ms: self.jitter_ms,
            tier: QualityTier::classify(self.packet_loss_pct, rtt_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkQualitySample {
    pub timestamp: DateTime<Utc>,
    pub packet_loss_pct: f64,
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub tier: QualityTier,
}

/// Latest quality sample plus a bounded history for diagnostics.
///
/// Only [`QualityMonitor::latest`] should drive live decisions.
#[derive(Debug, Clone)]
pub struct QualityMonitor {
    history: VecDeque<NetworkQualitySample>,
    capacity: usize,
}

impl QualityMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, sample: NetworkQualitySample) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    pub fn latest(&self) -> Option<&NetworkQualitySample> {
        self.history.back()
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &NetworkQualitySample> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reports() -> Vec<StatsReport> {
        vec![
            StatsReport::InboundRtp {
                kind: MediaKind::Audio,
                bytes_received: 10_000,
                packets_received: 98,
                packets_lost: 2,
                jitter_secs: 0.012,
            },
            StatsReport::InboundRtp {
                kind: MediaKind::Video,
                bytes_received: 50_000,
                packets_received: 100,
                packets_lost: -1,
                jitter_secs: 0.030,
            },
            StatsReport::OutboundRtp {
                kind: MediaKind::Audio,
                bytes_sent: 8_000,
                packets_sent: 90,
            },
            StatsReport::CandidatePair {
                nominated: false,
                current_round_trip_time_secs: Some(0.9),
            },
            StatsReport::CandidatePair {
                nominated: true,
                current_round_trip_time_secs: Some(0.120),
            },
        ]
    }

    #[test]
    fn aggregates_per_kind_and_totals() {
        let stats = ConnectionStats::from_reports(&sample_reports());
        assert_eq!(stats.audio.bytes_received, 10_000);
        assert_eq!(stats.video.bytes_received, 50_000);
        assert_eq!(stats.bytes_received, 60_000);
        assert_eq!(stats.bytes_sent, 8_000);
        assert_eq!(stats.packets_sent, 90);
        // negative loss from duplicates is clamped
        assert_eq!(stats.video.packets_lost, 0);
        assert_eq!(stats.packets_lost, 2);
        assert!((stats.audio.packet_loss_pct() - 2.0).abs() < 1e-9);
        assert!((stats.jitter_ms - 30.0).abs() < 1e-9);
        assert_eq!(stats.rtt_ms.map(|r| r.round()), Some(120.0));
    }

    #[test]
    fn quality_sample_uses_nominated_pair() {
        let stats = ConnectionStats::from_reports(&sample_reports());
        let sample = stats.quality_sample();
        // 2 lost of 200 total = 1% loss, 120ms RTT
        assert_eq!(sample.tier, QualityTier::Good);
    }

    #[test]
    fn empty_reports_are_excellent() {
        let stats = ConnectionStats::from_reports(&[]);
        assert_eq!(stats.packet_loss_pct, 0.0);
        assert_eq!(stats.rtt_ms, None);
        assert_eq!(stats.quality_sample().tier, QualityTier::Excellent);
    }

    #[test]
    fn monitor_keeps_bounded_history() {
        let mut monitor = QualityMonitor::new(3);
        for rtt in [100.0, 200.0, 400.0, 800.0] {
            monitor.record(NetworkQualitySample {
                timestamp: Utc::now(),
                packet_loss_pct: 0.0,
                rtt_ms: rtt,
                jitter_ms: 0.0,
                tier: QualityTier::classify(0.0, rtt),
            });
        }
        assert_eq!(monitor.len(), 3);
        assert_eq!(monitor.history().next().map(|s| s.rtt_ms), Some(200.0));
        assert_eq!(monitor.latest().map(|s| s.tier), Some(QualityTier::Poor));
    }
}
