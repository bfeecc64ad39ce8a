//! Local, human-readable history of messages sent and received by a node.
//!
//! The log is bounded: once `capacity` records are held, the oldest record
//! is evicted for every new one. Nothing is persisted.

use chrono::{DateTime, Utc};
use echonet_types::NodeId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// Whether a record was sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the local node.
    Sent,
    /// Received from a peer.
    Received,
}

/// One logged message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EchoRecord {
    /// Sent or received.
    pub direction: Direction,
    /// The other party.
    pub peer: NodeId,
    /// Payload `type` field, or `general` when absent.
    pub payload_type: String,
    /// The application payload.
    pub payload: serde_json::Value,
    /// When the message was sent or received.
    pub timestamp: DateTime<Utc>,
}

/// Bounded in-memory echo log.
#[derive(Debug)]
pub struct EchoLog {
    capacity: usize,
    records: Mutex<VecDeque<EchoRecord>>,
}

impl EchoLog {
    /// Creates a log holding at most `capacity` records. A zero capacity
    /// disables logging.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Appends a record, evicting the oldest one when full.
    pub fn record(
        &self,
        direction: Direction,
        peer: &NodeId,
        payload: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) {
        if self.capacity == 0 {
            return;
        }
        let payload_type = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("general")
            .to_string();

        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(EchoRecord {
            direction,
            peer: peer.clone(),
            payload_type,
            payload: payload.clone(),
            timestamp,
        });
    }

    /// Returns up to `limit` records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<EchoRecord> {
        self.records.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Maximum number of records held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer() -> NodeId {
        NodeId::new("gemini").unwrap()
    }

    #[test]
    fn evicts_oldest_when_full() {
        let log = EchoLog::new(2);
        for n in 0..3 {
            log.record(Direction::Sent, &peer(), &json!({"type": "general", "n": n}), Utc::now());
        }

        assert_eq!(log.len(), 2);
        let recent = log.recent(10);
        assert_eq!(recent[0].payload["n"], 2);
        assert_eq!(recent[1].payload["n"], 1);
    }

    #[test]
    fn payload_type_defaults_to_general() {
        let log = EchoLog::new(4);
        log.record(Direction::Received, &peer(), &json!({"content": "hi"}), Utc::now());
        log.record(Direction::Received, &peer(), &json!({"type": "new_proposal"}), Utc::now());

        let recent = log.recent(2);
        assert_eq!(recent[0].payload_type, "new_proposal");
        assert_eq!(recent[1].payload_type, "general");
        assert_eq!(recent[1].direction, Direction::Received);
    }

    #[test]
    fn limit_and_zero_capacity() {
        let log = EchoLog::new(8);
        for _ in 0..5 {
            log.record(Direction::Sent, &peer(), &json!({}), Utc::now());
        }
        assert_eq!(log.recent(3).len(), 3);

        let disabled = EchoLog::new(0);
        disabled.record(Direction::Sent, &peer(), &json!({}), Utc::now());
        assert!(disabled.is_empty());
    }
}
