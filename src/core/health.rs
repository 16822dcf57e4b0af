use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

use super::circular_buffer::CircularBuffer;
use super::types::SessionStats;

const MAX_RECENT_ANOMALIES: usize = 100;
const MAX_ANOMALY_TEXT_BYTES: usize = 1024;

/// Kind of non-fatal irregularity observed on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    Framing,
    Routing,
    Liveness,
    Expiry,
}

#[derive(Debug, Clone)]
pub struct AnomalyRecord {
    pub at: Instant,
    pub kind: AnomalyKind,
    pub detail: String,
}

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ANOMALY_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ANOMALY_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Per-session counters owned by the dispatcher; no interior mutability.
#[derive(Debug)]
pub struct StreamHealthMonitor {
    session_started: Instant,
    last_message_received: Instant,
    last_message_sent: Instant,
    messages_received: u64,
    messages_sent: u64,
    anomaly_count: u64,
    expired_calls: u64,
    recent_anomalies: CircularBuffer<AnomalyRecord>,
    rtt_histogram: Option<Histogram<u64>>,
}

impl Default for StreamHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHealthMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            session_started: now,
            last_message_received: now,
            last_message_sent: now,
            messages_received: 0,
            messages_sent: 0,
            anomaly_count: 0,
            expired_calls: 0,
            recent_anomalies: CircularBuffer::new(MAX_RECENT_ANOMALIES),
            // 1us..60s at three significant digits.
            rtt_histogram: Histogram::new_with_bounds(1, 60_000_000, 3).ok(),
        }
    }

    pub fn record_message(&mut self) {
        self.last_message_received = Instant::now();
        self.messages_received = self.messages_received.saturating_add(1);
    }

    pub fn record_sent(&mut self) {
        self.last_message_sent = Instant::now();
        self.messages_sent = self.messages_sent.saturating_add(1);
    }

    pub fn record_anomaly(&mut self, kind: AnomalyKind, detail: &str) {
        self.anomaly_count = self.anomaly_count.saturating_add(1);
        self.recent_anomalies.push(AnomalyRecord {
            at: Instant::now(),
            kind,
            detail: truncate_string(detail),
        });
    }

    pub fn record_expired(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.expired_calls = self.expired_calls.saturating_add(count as u64);
        self.record_anomaly(AnomalyKind::Expiry, &format!("{count} pending calls expired"));
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().clamp(1, u64::MAX as u128) as u64;
        if let Some(histogram) = self.rtt_histogram.as_mut() {
            let _ = histogram.record(micros);
        }
    }

    pub fn recent_anomalies(&self) -> impl DoubleEndedIterator<Item = &AnomalyRecord> {
        self.recent_anomalies.iter()
    }

    pub fn last_message_age(&self) -> Duration {
        self.last_message_received.elapsed()
    }

    pub fn get_stats(&self, pending_calls: usize) -> SessionStats {
        let (p50, p99, samples) = match self.rtt_histogram.as_ref() {
            Some(h) if !h.is_empty() => (
                h.value_at_percentile(50.0),
                h.value_at_percentile(99.0),
                h.len(),
            ),
            _ => (0, 0, 0),
        };

        SessionStats {
            uptime: self.session_started.elapsed(),
            messages_received: self.messages_received,
            messages_sent: self.messages_sent,
            anomalies: self.anomaly_count,
            recent_anomalies: self.recent_anomalies.len(),
            last_message_age: self.last_message_received.elapsed(),
            pending_calls,
            expired_calls: self.expired_calls,
            p50_rtt_us: p50,
            p99_rtt_us: p99,
            rtt_samples: samples,
        }
    }
}
