//! Trace event collectors
//!
//! The tracer hands every finished event to a [`TraceCollector`]. Callbacks
//! arrive on arbitrary runtime threads, so collectors must be thread-safe and
//! should not block.

use hiptrace_shared::TraceEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Consumer of normalized trace events
pub trait TraceCollector: Send + Sync {
    /// Accept one event
    fn add_event(&self, event: TraceEvent);

    /// Drain any buffered events. Called once when tracing is disabled.
    fn flush(&self);
}

/// In-memory collector keeping at most `max_events` events.
///
/// When full, the oldest event is dropped.
#[derive(Debug)]
pub struct EventBuffer {
    max_events: usize,
    events: Mutex<VecDeque<TraceEvent>>,
    dropped: AtomicU64,
    flushes: AtomicU64,
}

impl EventBuffer {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            events: Mutex::new(VecDeque::with_capacity(max_events.min(4096))),
            dropped: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// Remove and return all buffered events in arrival order
    pub fn take_events(&self) -> Vec<TraceEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.drain(..).collect()
    }

    /// Copy of the buffered events in arrival order
    pub fn events(&self) -> Vec<TraceEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of times [`TraceCollector::flush`] was called
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl TraceCollector for EventBuffer {
    fn add_event(&self, event: TraceEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        let len = self.len();
        let timed = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.has_timestamps())
            .count();
        info!(
            "Event buffer flushed: {} events ({} with timestamps, {} dropped)",
            len,
            timed,
            self.dropped()
        );
        if timed < len {
            debug!(
                "{} events carry unknown timestamps and will be skipped by time normalization",
                len - timed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiptrace_shared::{EventKind, EventSource};

    fn event(correlation_id: u64) -> TraceEvent {
        let mut e = TraceEvent::new(EventKind::Generic, EventSource::FromApiCallback);
        e.correlation_id = correlation_id;
        e
    }

    #[test]
    fn test_events_kept_in_arrival_order() {
        let buffer = EventBuffer::new(10);
        buffer.add_event(event(1));
        buffer.add_event(event(2));

        let ids: Vec<_> = buffer.events().iter().map(|e| e.correlation_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(buffer.take_events().len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_buffer_drops_oldest() {
        let buffer = EventBuffer::new(2);
        for id in 0..5 {
            buffer.add_event(event(id));
        }

        let ids: Vec<_> = buffer.events().iter().map(|e| e.correlation_id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(buffer.dropped(), 3);
    }

    #[test]
    fn test_flush_keeps_events() {
        let buffer = EventBuffer::new(4);
        buffer.add_event(event(1));
        buffer.flush();

        assert_eq!(buffer.flush_count(), 1);
        assert_eq!(buffer.len(), 1);
    }
}
