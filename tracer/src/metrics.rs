//! Prometheus metrics for a tracer instance

use hiptrace_shared::{EventSource, TraceEvent};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters describing what the tracer saw and what it had to drop
pub struct TracerMetrics {
    registry: Registry,
    events_total: IntCounterVec,
    buffers_discarded: IntCounter,
    records_dropped: IntCounter,
    callback_errors: IntCounter,
    annotations_dropped: IntCounter,
}

impl TracerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("hiptrace".to_string()), None)
            .expect("valid registry prefix");

        let events_total = IntCounterVec::new(
            Opts::new("events_total", "Trace events handed to the collector"),
            &["source"],
        )
        .expect("valid metric");
        let buffers_discarded = IntCounter::new(
            "activity_buffers_discarded_total",
            "Activity buffers delivered after activity tracing was disabled",
        )
        .expect("valid metric");
        let records_dropped = IntCounter::new(
            "activity_records_dropped_total",
            "Truncated or unreadable activity records",
        )
        .expect("valid metric");
        let callback_errors = IntCounter::new(
            "callback_errors_total",
            "API callbacks whose hook returned an error",
        )
        .expect("valid metric");
        let annotations_dropped = IntCounter::new(
            "annotations_dropped_total",
            "Annotations not recorded because the registry was full",
        )
        .expect("valid metric");

        for collector in [
            Box::new(events_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(buffers_discarded.clone()),
            Box::new(records_dropped.clone()),
            Box::new(callback_errors.clone()),
            Box::new(annotations_dropped.clone()),
        ] {
            registry.register(collector).expect("unique metric names");
        }

        Self {
            registry,
            events_total,
            buffers_discarded,
            records_dropped,
            callback_errors,
            annotations_dropped,
        }
    }

    pub(crate) fn record_event(&self, event: &TraceEvent) {
        self.events_total
            .with_label_values(&[source_label(event.source)])
            .inc();
    }

    pub(crate) fn buffer_discarded(&self) {
        self.buffers_discarded.inc();
    }

    pub(crate) fn record_dropped(&self) {
        self.records_dropped.inc();
    }

    pub(crate) fn callback_error(&self) {
        self.callback_errors.inc();
    }

    pub(crate) fn annotation_dropped(&self) {
        self.annotations_dropped.inc();
    }

    /// Events emitted from `source`
    pub fn events(&self, source: EventSource) -> u64 {
        self.events_total
            .with_label_values(&[source_label(source)])
            .get()
    }

    pub fn buffers_discarded(&self) -> u64 {
        self.buffers_discarded.get()
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.get()
    }

    pub fn callback_errors(&self) -> u64 {
        self.callback_errors.get()
    }

    pub fn annotations_dropped(&self) -> u64 {
        self.annotations_dropped.get()
    }

    /// Registry holding this tracer's metrics, for exposition elsewhere
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Also expose these counters through a caller-owned registry. Names are
    /// registered without the `hiptrace_` prefix the private registry adds.
    pub fn register_into(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.events_total.clone()))?;
        registry.register(Box::new(self.buffers_discarded.clone()))?;
        registry.register(Box::new(self.records_dropped.clone()))?;
        registry.register(Box::new(self.callback_errors.clone()))?;
        registry.register(Box::new(self.annotations_dropped.clone()))?;
        Ok(())
    }

    /// Render the metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for TracerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn source_label(source: EventSource) -> &'static str {
    match source {
        EventSource::FromApiCallback => "api_callback",
        EventSource::FromActivityRecord => "activity",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiptrace_shared::EventKind;

    #[test]
    fn test_events_counted_by_source() {
        let metrics = TracerMetrics::new();
        metrics.record_event(&TraceEvent::new(EventKind::Generic, EventSource::FromApiCallback));
        metrics.record_event(&TraceEvent::new(EventKind::Generic, EventSource::FromActivityRecord));
        metrics.record_event(&TraceEvent::new(EventKind::Generic, EventSource::FromActivityRecord));

        assert_eq!(metrics.events(EventSource::FromApiCallback), 1);
        assert_eq!(metrics.events(EventSource::FromActivityRecord), 2);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = TracerMetrics::new();
        let b = TracerMetrics::new();
        a.buffer_discarded();

        assert_eq!(a.buffers_discarded(), 1);
        assert_eq!(b.buffers_discarded(), 0);
    }

    #[test]
    fn test_encode() {
        let metrics = TracerMetrics::new();
        metrics.callback_error();

        let text = metrics.encode().unwrap();
        assert!(text.contains("hiptrace_callback_errors_total 1"));
    }

    #[test]
    fn test_register_into_shares_counters() {
        let metrics = TracerMetrics::new();
        let registry = Registry::new();
        metrics.register_into(&registry).unwrap();
        metrics.record_dropped();

        let families = registry.gather();
        let dropped = families
            .iter()
            .find(|f| f.get_name() == "activity_records_dropped_total")
            .unwrap();
        assert_eq!(dropped.get_metric()[0].get_counter().get_value(), 1.0);

        // Registering twice into the same registry is rejected
        assert!(metrics.register_into(&registry).is_err());
    }
}
