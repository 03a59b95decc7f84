//! Per-device instrumentation counted at the single choke-point every
//! outbound message passes through, plus capacity high-watermarks
//! collected from the queue and stores that actually enforce them.

use std::collections::HashMap;

use serde::Serialize;

use crate::message::Message;

fn message_label(msg: &Message) -> &'static str {
    match msg {
        Message::Announce { .. } => "announce",
        Message::Request { .. } => "request",
        Message::Data { .. } => "data",
    }
}

/// Live counters for one device. Updated in place during a run; call
/// [`Metrics::snapshot`] to get a serializable, read-only copy.
#[derive(Debug, Default)]
pub struct Metrics {
    sent_by_type: HashMap<&'static str, u64>,
    received_by_type: HashMap<&'static str, u64>,
    lost_by_type: HashMap<&'static str, u64>,
    overflowed_by_type: HashMap<&'static str, u64>,
    input_queue_max_used: usize,
    diff_announces_seen_max_used: usize,
    datas_seen_max_used: usize,
    in_flight_requests_max_used: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, msg: &Message) {
        *self.sent_by_type.entry(message_label(msg)).or_insert(0) += 1;
    }

    pub fn record_received(&mut self, msg: &Message) {
        *self.received_by_type.entry(message_label(msg)).or_insert(0) += 1;
    }

    pub fn record_lost(&mut self, msg: &Message) {
        *self.lost_by_type.entry(message_label(msg)).or_insert(0) += 1;
    }

    pub fn record_overflow(&mut self, evicted: &Message) {
        *self.overflowed_by_type.entry(message_label(evicted)).or_insert(0) += 1;
    }

    pub fn observe_input_queue(&mut self, max_used: usize) {
        self.input_queue_max_used = self.input_queue_max_used.max(max_used);
    }

    pub fn observe_diff_announces_seen(&mut self, max_used: usize) {
        self.diff_announces_seen_max_used = self.diff_announces_seen_max_used.max(max_used);
    }

    pub fn observe_datas_seen(&mut self, max_used: usize) {
        self.datas_seen_max_used = self.datas_seen_max_used.max(max_used);
    }

    pub fn observe_in_flight_requests(&mut self, max_used: usize) {
        self.in_flight_requests_max_used = self.in_flight_requests_max_used.max(max_used);
    }

    pub fn sent(&self, label: &str) -> u64 {
        self.sent_by_type.get(label).copied().unwrap_or(0)
    }

    pub fn received(&self, label: &str) -> u64 {
        self.received_by_type.get(label).copied().unwrap_or(0)
    }

    pub fn lost(&self, label: &str) -> u64 {
        self.lost_by_type.get(label).copied().unwrap_or(0)
    }

    pub fn overflowed(&self, label: &str) -> u64 {
        self.overflowed_by_type.get(label).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent_by_type: self.sent_by_type.clone(),
            received_by_type: self.received_by_type.clone(),
            lost_by_type: self.lost_by_type.clone(),
            overflowed_by_type: self.overflowed_by_type.clone(),
            input_queue_max_used: self.input_queue_max_used,
            diff_announces_seen_max_used: self.diff_announces_seen_max_used,
            datas_seen_max_used: self.datas_seen_max_used,
            in_flight_requests_max_used: self.in_flight_requests_max_used,
        }
    }
}

/// A serializable, point-in-time copy of a device's [`Metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub sent_by_type: HashMap<&'static str, u64>,
    pub received_by_type: HashMap<&'static str, u64>,
    pub lost_by_type: HashMap<&'static str, u64>,
    pub overflowed_by_type: HashMap<&'static str, u64>,
    pub input_queue_max_used: usize,
    pub diff_announces_seen_max_used: usize,
    pub datas_seen_max_used: usize,
    pub in_flight_requests_max_used: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChunkDescriptor, Proto};

    fn announce() -> Message {
        Message::Announce {
            proto: Proto {
                from_device: 0,
                chunk_size: 1,
                chunks: 1,
                fw_size: 1,
            },
            dsc: ChunkDescriptor {
                fw_type: 1,
                version: 1,
                chunk_id: 0,
            },
        }
    }

    #[test]
    fn counts_by_message_type() {
        let mut m = Metrics::new();
        m.record_sent(&announce());
        m.record_sent(&announce());
        assert_eq!(m.sent("announce"), 2);
        assert_eq!(m.sent("data"), 0);
    }

    #[test]
    fn snapshot_is_independent_of_further_updates() {
        let mut m = Metrics::new();
        m.record_sent(&announce());
        let snap = m.snapshot();
        m.record_sent(&announce());
        assert_eq!(snap.sent_by_type["announce"], 1);
        assert_eq!(m.sent("announce"), 2);
    }

    #[test]
    fn received_and_overflowed_are_tracked_per_type() {
        let mut m = Metrics::new();
        m.record_received(&announce());
        m.record_overflow(&announce());
        assert_eq!(m.received("announce"), 1);
        assert_eq!(m.overflowed("announce"), 1);
        assert_eq!(m.overflowed("data"), 0);
    }
}
