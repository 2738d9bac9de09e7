//! Annotation registry and the thread-local annotation source
//!
//! [`AnnotationMap`] remembers which annotation was active when an API call
//! with a given correlation ID exited, so that device activity records
//! arriving later can be attributed to the same logical operation.

use hiptrace_shared::{CorrelationId, DeviceId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

#[derive(Debug, Default)]
struct PerDeviceAnnotations {
    /// Interned annotation strings
    annotations: HashSet<Arc<str>>,

    correlation_map: HashMap<CorrelationId, Arc<str>>,
}

/// Per-device map from correlation ID to interned annotation.
///
/// Each device has its own lock so traffic from independent devices does not
/// serialize. The number of distinct strings per device is capped at
/// `max_size`; once reached, annotations not already interned are dropped.
/// Existing mappings are never evicted.
#[derive(Debug)]
pub struct AnnotationMap {
    max_size: usize,
    per_device: Vec<Mutex<PerDeviceAnnotations>>,
}

impl AnnotationMap {
    pub fn new(max_size: usize, num_devices: u32) -> Self {
        Self {
            max_size,
            per_device: (0..num_devices)
                .map(|_| Mutex::new(PerDeviceAnnotations::default()))
                .collect(),
        }
    }

    /// Record `annotation` for `(device_id, correlation_id)`.
    ///
    /// Returns whether a mapping was recorded. Empty annotations and
    /// out-of-range devices are ignored.
    pub fn add(
        &self,
        device_id: DeviceId,
        correlation_id: CorrelationId,
        annotation: &str,
    ) -> bool {
        if annotation.is_empty() {
            return false;
        }
        let Some(entry) = self.per_device.get(device_id as usize) else {
            return false;
        };
        trace!(device_id, correlation_id, annotation, "Add annotation");

        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = &mut *guard;
        let interned = match entry.annotations.get(annotation) {
            Some(existing) => existing.clone(),
            None if entry.annotations.len() < self.max_size => {
                let interned: Arc<str> = Arc::from(annotation);
                entry.annotations.insert(interned.clone());
                interned
            }
            None => return false,
        };
        entry.correlation_map.insert(correlation_id, interned);
        true
    }

    /// Annotation recorded for `(device_id, correlation_id)`, if any
    pub fn look_up(&self, device_id: DeviceId, correlation_id: CorrelationId) -> Option<Arc<str>> {
        let entry = self.per_device.get(device_id as usize)?;
        let entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry.correlation_map.get(&correlation_id).cloned()
    }

    pub fn num_devices(&self) -> usize {
        self.per_device.len()
    }

    /// Number of distinct strings interned for `device_id`
    pub fn interned_count(&self, device_id: DeviceId) -> usize {
        self.per_device
            .get(device_id as usize)
            .map(|entry| {
                entry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .annotations
                    .len()
            })
            .unwrap_or(0)
    }
}

/// Supplies the annotation active on the calling thread.
pub trait AnnotationSource: Send + Sync {
    /// Current annotation, empty when none is active
    fn current_annotation(&self) -> String;
}

thread_local! {
    /// Open scopes on this thread, outermost first, tagged with their scope ID
    static SCOPES: RefCell<Vec<(u64, String)>> = const { RefCell::new(Vec::new()) };
    static NEXT_SCOPE_ID: Cell<u64> = const { Cell::new(0) };
}

/// Annotation source backed by [`ScopedAnnotation`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadAnnotations;

impl AnnotationSource for ThreadAnnotations {
    fn current_annotation(&self) -> String {
        current_annotation()
    }
}

/// Annotation currently active on this thread
pub fn current_annotation() -> String {
    SCOPES.with(|scopes| {
        let scopes = scopes.borrow();
        let mut annotation = String::new();
        for (i, (_, name)) in scopes.iter().enumerate() {
            if i > 0 {
                annotation.push_str("::");
            }
            annotation.push_str(name);
        }
        annotation
    })
}

/// Marks a region of work on the current thread.
///
/// Scopes nest: inside `outer` and `inner` the active annotation is
/// `outer::inner`. Dropping a guard closes its scope and every scope opened
/// after it; dropping a guard whose scope was already closed does nothing.
#[must_use = "the annotation ends when the guard is dropped"]
pub struct ScopedAnnotation {
    id: u64,
    // Tied to the thread whose scope stack it modified.
    _not_send: PhantomData<*const ()>,
}

impl ScopedAnnotation {
    pub fn new(name: &str) -> Self {
        let id = NEXT_SCOPE_ID.with(|next| {
            let id = next.get();
            next.set(id.wrapping_add(1));
            id
        });
        SCOPES.with(|scopes| scopes.borrow_mut().push((id, name.to_string())));

        Self {
            id,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ScopedAnnotation {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            if let Some(depth) = scopes.iter().position(|(id, _)| *id == self.id) {
                scopes.truncate(depth);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_add_then_look_up() {
        let map = AnnotationMap::new(16, 2);

        assert!(map.add(0, 42, "train_step_1"));
        assert!(map.add(1, 42, "eval_step"));

        assert_eq!(map.look_up(0, 42).as_deref(), Some("train_step_1"));
        assert_eq!(map.look_up(1, 42).as_deref(), Some("eval_step"));
    }

    #[test]
    fn test_empty_annotation_and_bad_device_are_ignored() {
        let map = AnnotationMap::new(16, 1);

        assert!(!map.add(0, 1, ""));
        assert!(!map.add(5, 1, "step"));

        assert_eq!(map.look_up(0, 1), None);
        assert_eq!(map.look_up(5, 1), None);
        assert_eq!(map.look_up(0, 999), None);
    }

    #[test]
    fn test_strings_are_deduplicated_per_device() {
        let map = AnnotationMap::new(16, 1);

        for correlation_id in 0..10 {
            map.add(0, correlation_id, "same");
        }

        assert_eq!(map.interned_count(0), 1);
        let a = map.look_up(0, 0).unwrap();
        let b = map.look_up(0, 9).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_capacity_keeps_existing_mappings() {
        let map = AnnotationMap::new(2, 1);

        assert!(map.add(0, 1, "a"));
        assert!(map.add(0, 2, "b"));
        assert!(!map.add(0, 3, "c"));

        assert_eq!(map.interned_count(0), 2);
        assert_eq!(map.look_up(0, 1).as_deref(), Some("a"));
        assert_eq!(map.look_up(0, 2).as_deref(), Some("b"));
        assert_eq!(map.look_up(0, 3), None);

        // Already-interned strings can still be mapped at capacity
        assert!(map.add(0, 4, "a"));
        assert_eq!(map.look_up(0, 4).as_deref(), Some("a"));
    }

    #[test]
    fn test_looked_up_string_outlives_registry() {
        let map = AnnotationMap::new(4, 1);
        map.add(0, 7, "kept");
        let annotation = map.look_up(0, 7).unwrap();
        drop(map);
        assert_eq!(&*annotation, "kept");
    }

    #[test]
    fn test_devices_do_not_share_a_lock() {
        let map = Arc::new(AnnotationMap::new(1024, 2));

        // Hold device 0's lock on this thread while another thread adds to device 1.
        let guard = map.per_device[0].lock().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let worker = {
            let map = map.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    map.add(1, i, "other_device");
                }
                barrier.wait();
            })
        };

        barrier.wait();
        drop(guard);
        worker.join().unwrap();

        assert_eq!(map.look_up(1, 99).as_deref(), Some("other_device"));
    }

    #[test]
    fn test_scoped_annotation_nests_and_restores() {
        assert_eq!(current_annotation(), "");
        {
            let _outer = ScopedAnnotation::new("train");
            assert_eq!(ThreadAnnotations.current_annotation(), "train");
            {
                let _inner = ScopedAnnotation::new("step_1");
                assert_eq!(current_annotation(), "train::step_1");
            }
            assert_eq!(current_annotation(), "train");
        }
        assert_eq!(current_annotation(), "");
    }

    #[test]
    fn test_annotations_are_per_thread() {
        let _scope = ScopedAnnotation::new("main_thread");
        let other = thread::spawn(current_annotation).join().unwrap();
        assert_eq!(other, "");
    }

    #[test]
    fn test_scopes_dropped_out_of_order() {
        let outer = ScopedAnnotation::new("é");
        let inner = ScopedAnnotation::new("x");
        assert_eq!(current_annotation(), "é::x");

        // Closing the outer scope also closes the inner one
        drop(outer);
        assert_eq!(current_annotation(), "");

        let next = ScopedAnnotation::new("日本");
        drop(inner);
        assert_eq!(current_annotation(), "日本");

        let nested = ScopedAnnotation::new("nextlong");
        assert_eq!(current_annotation(), "日本::nextlong");
        drop(nested);
        drop(next);
        assert_eq!(current_annotation(), "");
    }
}
