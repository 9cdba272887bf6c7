//! Per-request telemetry
//!
//! A [`Telemetry`] recorder lives for exactly one fetch call. It keeps a map of
//! named facts (`requestHeaders`, `status`, `redirects`, ...) and an
//! append-only history of lifecycle events, and forwards every event to the
//! configured [`TelemetrySink`].
//!
//! The canonical event order for one call is
//! `start → sent → redirect* → received → buffered? → done`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Fact map carried by a telemetry record.
pub type Facts = serde_json::Map<String, Value>;

/// Lifecycle events of one fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryEvent {
    /// Request headers computed, nothing dispatched yet
    Start,
    /// Request body fully flushed to the transport
    Sent,
    /// One redirect hop is about to be issued
    Redirect,
    /// Final status and headers are available
    Received,
    /// Body materialized into memory
    Buffered,
    /// Terminal event
    Done,
}

impl TelemetryEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryEvent::Start => "start",
            TelemetryEvent::Sent => "sent",
            TelemetryEvent::Redirect => "redirect",
            TelemetryEvent::Received => "received",
            TelemetryEvent::Buffered => "buffered",
            TelemetryEvent::Done => "done",
        }
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the event history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub event: TelemetryEvent,
    /// Wall-clock time of the event
    pub absolute: DateTime<Utc>,
    /// Time since the first event of this record (serialized as milliseconds)
    #[serde(serialize_with = "serialize_millis")]
    pub relative: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Receiver of telemetry notifications.
///
/// Called synchronously from the fetch pipeline; implementations should hand
/// work off rather than block.
pub trait TelemetrySink: Send + Sync {
    fn notify(&self, event: TelemetryEvent, facts: &Facts, history: &[HistoryEntry]);
}

impl<F> TelemetrySink for F
where
    F: Fn(TelemetryEvent, &Facts, &[HistoryEntry]) + Send + Sync,
{
    fn notify(&self, event: TelemetryEvent, facts: &Facts, history: &[HistoryEntry]) {
        self(event, facts, history);
    }
}

/// Owned copy of one notification, as delivered by [`Broadcaster`].
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub event: TelemetryEvent,
    pub facts: Facts,
    pub history: Vec<HistoryEntry>,
}

/// Multi-listener sink backed by a `tokio::sync::broadcast` channel.
///
/// Each subscriber receives every notification sent after it subscribed.
/// Slow subscribers lag rather than block the fetch pipeline.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<TelemetrySnapshot>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetrySnapshot> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

impl TelemetrySink for Broadcaster {
    fn notify(&self, event: TelemetryEvent, facts: &Facts, history: &[HistoryEntry]) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        // Err only means every receiver dropped in the meantime.
        _ = self.tx.send(TelemetrySnapshot {
            event,
            facts: facts.clone(),
            history: history.to_vec(),
        });
    }
}

/// Source of telemetry record ids, shared by a client and everything derived from it.
#[derive(Debug, Default)]
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; the first one handed out is 1.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

struct State {
    facts: Facts,
    history: Vec<HistoryEntry>,
    epoch: Option<Instant>,
}

/// Telemetry recorder for a single fetch call.
pub struct Telemetry {
    id: u64,
    sink: Option<Arc<dyn TelemetrySink>>,
    state: Mutex<State>,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("id", &self.id)
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Telemetry {
    #[must_use]
    pub fn new(id: u64, sink: Option<Arc<dyn TelemetrySink>>) -> Self {
        let mut facts = Facts::new();
        facts.insert("id".to_owned(), Value::from(id));
        Self {
            id,
            sink,
            state: Mutex::new(State {
                facts,
                history: Vec::new(),
                epoch: None,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Set a fact, replacing any previous value.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.state.lock().facts.insert(key.to_owned(), value.into());
    }

    /// Append to an array-valued fact, creating the array on first use.
    pub fn push(&self, key: &str, value: impl Into<Value>) {
        let mut state = self.state.lock();
        let slot = state
            .facts
            .entry(key.to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value.into()),
            other => {
                let previous = other.take();
                *other = Value::Array(vec![previous, value.into()]);
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().facts.get(key).cloned()
    }

    #[must_use]
    pub fn facts(&self) -> Facts {
        self.state.lock().facts.clone()
    }

    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.clone()
    }

    /// Record `event` and forward it to the sink. No-op without a sink.
    pub fn emit(&self, event: TelemetryEvent) {
        let Some(sink) = &self.sink else {
            return;
        };

        let now = Instant::now();
        let (facts, history) = {
            let mut state = self.state.lock();
            let epoch = *state.epoch.get_or_insert(now);
            state.history.push(HistoryEntry {
                event,
                absolute: Utc::now(),
                relative: now.saturating_duration_since(epoch),
            });
            (state.facts.clone(), state.history.clone())
        };

        tracing::trace!(telemetry_id = self.id, event = %event, "telemetry event");
        sink.notify(event, &facts, &history);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    type Seen = Arc<Mutex<Vec<(TelemetryEvent, Facts, Vec<HistoryEntry>)>>>;

    fn recording_sink() -> (Seen, Arc<dyn TelemetrySink>) {
        let seen: Seen = Arc::default();
        let sink_seen = Arc::clone(&seen);
        let sink = move |event: TelemetryEvent, facts: &Facts, history: &[HistoryEntry]| {
            sink_seen
                .lock()
                .push((event, facts.clone(), history.to_vec()));
        };
        (seen, Arc::new(sink))
    }

    #[test]
    fn test_emit_without_sink_is_noop() {
        let tel = Telemetry::new(1, None);
        tel.emit(TelemetryEvent::Start);
        assert!(tel.history().is_empty());
    }

    #[test]
    fn test_emit_forwards_event_name() {
        let (seen, sink) = recording_sink();
        let tel = Telemetry::new(1, Some(sink));
        tel.emit(TelemetryEvent::Start);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, TelemetryEvent::Start);
    }

    #[test]
    fn test_emit_carries_set_facts() {
        let (seen, sink) = recording_sink();
        let tel = Telemetry::new(7, Some(sink));
        tel.set("foo", "bar");
        tel.emit(TelemetryEvent::Start);

        let seen = seen.lock();
        assert_eq!(seen[0].1.get("foo"), Some(&Value::from("bar")));
        assert_eq!(seen[0].1.get("id"), Some(&Value::from(7)));
    }

    #[test]
    fn test_push_creates_array() {
        let tel = Telemetry::new(1, None);
        tel.push("redirects", "http://a/");
        tel.push("redirects", "http://b/");
        assert_eq!(
            tel.get("redirects"),
            Some(serde_json::json!(["http://a/", "http://b/"]))
        );
    }

    #[test]
    fn test_history_relative_times() {
        let (seen, sink) = recording_sink();
        let tel = Telemetry::new(1, Some(sink));
        tel.emit(TelemetryEvent::Start);
        std::thread::sleep(Duration::from_millis(2));
        tel.emit(TelemetryEvent::Sent);
        tel.emit(TelemetryEvent::Done);

        let history = tel.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].relative, Duration::ZERO);
        assert!(history[1].relative >= Duration::from_millis(2));
        assert!(history.windows(2).all(|w| w[0].relative <= w[1].relative));

        let seen = seen.lock();
        assert_eq!(seen[2].2.len(), 3);
    }

    #[test]
    fn test_history_serializes_millis() {
        let entry = HistoryEntry {
            event: TelemetryEvent::Received,
            absolute: Utc::now(),
            relative: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"], "received");
        assert_eq!(json["relative"], 1500);
    }

    #[tokio::test]
    async fn test_broadcaster_delivers_to_all_listeners() {
        let broadcaster = Broadcaster::new(8);
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        let tel = Telemetry::new(3, Some(Arc::new(broadcaster.clone())));
        tel.set("status", 200);
        tel.emit(TelemetryEvent::Received);

        for rx in [&mut rx1, &mut rx2] {
            let snap = rx.recv().await.unwrap();
            assert_eq!(snap.event, TelemetryEvent::Received);
            assert_eq!(snap.facts.get("status"), Some(&Value::from(200)));
            assert_eq!(snap.history.len(), 1);
        }
    }

    #[test]
    fn test_broadcaster_without_listeners_does_not_fail() {
        let tel = Telemetry::new(1, Some(Arc::new(Broadcaster::default())));
        tel.emit(TelemetryEvent::Start);
        assert_eq!(tel.history().len(), 1);
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }
}
