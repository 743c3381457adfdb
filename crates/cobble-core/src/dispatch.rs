//! Event dispatch to application handlers
//!
//! Each [`EventKind`] has one lane: an optional handler and, in deferred mode,
//! a FIFO of pending events. Lanes are independent so a burst of one kind never
//! reorders another, and within a kind events reach the handler in the order
//! they were raised.
//!
//! In [`DeliveryMode::Immediate`] the handler runs on the thread that called
//! [`EventDispatcher::dispatch`]. In [`DeliveryMode::Deferred`] events wait
//! until [`EventDispatcher::drain`], which empties the lanes in
//! [`EventKind::DRAIN_ORDER`]. Events of a kind with no handler are discarded
//! at the time they would have been delivered.
//!
//! No lock is held while a handler runs, so handlers may call back into the
//! session. Events raised from inside a handler during a drain are queued for
//! the next drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, trace, warn};

use crate::config::DeliveryMode;
use crate::event::{Event, EventKind};

/// Type-erased handler for one event kind
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

// ----------------------------------------------------------------------------
// Reports
// ----------------------------------------------------------------------------

/// What happened to the events of one kind during a drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    /// Passed to the registered handler
    pub dispatched: usize,
    /// Removed because no handler was registered
    pub discarded: usize,
    /// Evicted since the previous drain because the queue was full
    pub dropped: usize,
}

/// Outcome of one [`EventDispatcher::drain`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    counts: [KindCounts; 5],
}

impl DrainReport {
    pub fn get(&self, kind: EventKind) -> KindCounts {
        self.counts[kind.index()]
    }

    pub fn dispatched(&self) -> usize {
        self.counts.iter().map(|c| c.dispatched).sum()
    }

    pub fn discarded(&self) -> usize {
        self.counts.iter().map(|c| c.discarded).sum()
    }

    pub fn dropped(&self) -> usize {
        self.counts.iter().map(|c| c.dropped).sum()
    }

    /// True when the drain found nothing to do
    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|c| *c == KindCounts::default())
    }
}

/// Immediate result of handing one event to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Discarded,
    Queued,
    /// Queued after evicting the oldest event of the same kind
    QueuedWithEviction,
}

// ----------------------------------------------------------------------------
// Lanes
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Lane {
    handler: RwLock<Option<EventHandler>>,
    queue: Mutex<VecDeque<Event>>,
    dropped: AtomicUsize,
}

impl Lane {
    fn handler(&self) -> Option<EventHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_handler(&self, handler: Option<EventHandler>) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn push(&self, event: Event, capacity: Option<usize>) -> Delivery {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivery = Delivery::Queued;
        if let Some(capacity) = capacity {
            while queue.len() >= capacity.max(1) {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                delivery = Delivery::QueuedWithEviction;
            }
        }
        queue.push_back(event);
        delivery
    }

    fn take(&self) -> VecDeque<Event> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

pub struct EventDispatcher {
    mode: DeliveryMode,
    capacity: Option<usize>,
    lanes: [Lane; 5],
    draining: Mutex<()>,
}

impl EventDispatcher {
    pub fn new(mode: DeliveryMode, capacity: Option<usize>) -> Self {
        Self {
            mode,
            capacity,
            lanes: Default::default(),
            draining: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Install or clear the handler for one kind. Replaces any earlier handler.
    pub fn set_handler(&self, kind: EventKind, handler: Option<EventHandler>) {
        self.lanes[kind.index()].set_handler(handler);
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.lanes[kind.index()].handler().is_some()
    }

    /// Route one event according to the delivery mode
    pub fn dispatch(&self, event: Event) -> Delivery {
        let kind = event.kind();
        let lane = &self.lanes[kind.index()];

        match self.mode {
            DeliveryMode::Immediate => match lane.handler() {
                Some(handler) => {
                    handler(event);
                    Delivery::Delivered
                }
                None => {
                    trace!("No handler for {:?}, event discarded", kind);
                    Delivery::Discarded
                }
            },
            DeliveryMode::Deferred => {
                let delivery = lane.push(event, self.capacity);
                if delivery == Delivery::QueuedWithEviction {
                    warn!("{:?} queue full, oldest event dropped", kind);
                }
                delivery
            }
        }
    }

    /// Number of queued events of one kind
    pub fn pending(&self, kind: EventKind) -> usize {
        self.lanes[kind.index()].len()
    }

    pub fn pending_total(&self) -> usize {
        self.lanes.iter().map(Lane::len).sum()
    }

    /// Deliver everything queued so far, one kind at a time in drain order
    ///
    /// Does nothing in immediate mode. A drain started from inside a handler
    /// of a running drain also returns an empty report.
    pub fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        if self.mode == DeliveryMode::Immediate {
            return report;
        }

        let _guard = match self.draining.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => {
                debug!("Drain already in progress");
                return report;
            }
        };

        for kind in EventKind::DRAIN_ORDER {
            let lane = &self.lanes[kind.index()];
            let counts = &mut report.counts[kind.index()];
            counts.dropped = lane.dropped.swap(0, Ordering::Relaxed);

            let events = lane.take();
            if events.is_empty() {
                continue;
            }

            match lane.handler() {
                Some(handler) => {
                    counts.dispatched = events.len();
                    for event in events {
                        handler(event);
                    }
                }
                None => {
                    counts.discarded = events.len();
                    trace!("Discarded {} {:?} events without handler", events.len(), kind);
                }
            }
        }

        if !report.is_empty() {
            debug!(
                "Drained events: {} dispatched, {} discarded, {} dropped",
                report.dispatched(),
                report.discarded(),
                report.dropped()
            );
        }
        report
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("mode", &self.mode)
            .field("capacity", &self.capacity)
            .field("pending", &self.pending_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionStatus, GattUuid, ScanResult, ValueUpdate};

    fn scan(rssi: i32) -> Event {
        Event::ScanResult(ScanResult {
            name: None,
            rssi,
            identifier: "AA:BB:CC:DD:EE:FF".into(),
        })
    }

    fn value(byte: u8) -> Event {
        Event::ValueUpdate(ValueUpdate::bounded(GattUuid::from_short(0x2A37), &[byte], 256))
    }

    fn recorder() -> (Arc<Mutex<Vec<Event>>>, EventHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: EventHandler = Arc::new(move |event| sink.lock().unwrap().push(event));
        (seen, handler)
    }

    #[test]
    fn test_immediate_delivery() {
        let dispatcher = EventDispatcher::new(DeliveryMode::Immediate, None);
        let (seen, handler) = recorder();
        dispatcher.set_handler(EventKind::ScanResult, Some(handler));

        assert_eq!(dispatcher.dispatch(scan(-40)), Delivery::Delivered);
        assert_eq!(dispatcher.dispatch(value(1)), Delivery::Discarded);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.pending_total(), 0);
        assert!(dispatcher.drain().is_empty());
    }

    #[test]
    fn test_deferred_preserves_order_within_kind() {
        let dispatcher = EventDispatcher::new(DeliveryMode::Deferred, None);
        let (seen, handler) = recorder();
        dispatcher.set_handler(EventKind::ValueUpdate, Some(handler));

        for byte in 0..5 {
            dispatcher.dispatch(value(byte));
        }
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.pending(EventKind::ValueUpdate), 5);

        let report = dispatcher.drain();
        assert_eq!(report.get(EventKind::ValueUpdate).dispatched, 5);

        let payloads: Vec<u8> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|event| match event {
                Event::ValueUpdate(update) => update.payload[0],
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_drain_order_across_kinds() {
        let dispatcher = EventDispatcher::new(DeliveryMode::Deferred, None);
        let (seen, handler) = recorder();
        for kind in EventKind::DRAIN_ORDER {
            dispatcher.set_handler(kind, Some(handler.clone()));
        }

        dispatcher.dispatch(value(9));
        dispatcher.dispatch(Event::ConnectionStatusChanged {
            identifier: "AA:BB:CC:DD:EE:FF".into(),
            status: ConnectionStatus::Connected,
        });
        dispatcher.dispatch(scan(-70));

        dispatcher.drain();
        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ScanResult,
                EventKind::ConnectionStatus,
                EventKind::ValueUpdate
            ]
        );
    }

    #[test]
    fn test_unhandled_kind_is_discarded_on_drain() {
        let dispatcher = EventDispatcher::new(DeliveryMode::Deferred, None);
        dispatcher.dispatch(scan(-50));
        dispatcher.dispatch(scan(-51));

        let report = dispatcher.drain();
        assert_eq!(report.get(EventKind::ScanResult).discarded, 2);
        assert_eq!(dispatcher.pending_total(), 0);

        // Registering later does not resurrect discarded events
        let (seen, handler) = recorder();
        dispatcher.set_handler(EventKind::ScanResult, Some(handler));
        dispatcher.drain();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dispatcher = EventDispatcher::new(DeliveryMode::Deferred, Some(2));
        let (seen, handler) = recorder();
        dispatcher.set_handler(EventKind::ValueUpdate, Some(handler));

        assert_eq!(dispatcher.dispatch(value(1)), Delivery::Queued);
        assert_eq!(dispatcher.dispatch(value(2)), Delivery::Queued);
        assert_eq!(dispatcher.dispatch(value(3)), Delivery::QueuedWithEviction);

        let report = dispatcher.drain();
        assert_eq!(report.get(EventKind::ValueUpdate).dropped, 1);
        assert_eq!(report.get(EventKind::ValueUpdate).dispatched, 2);
        assert_eq!(seen.lock().unwrap()[0], value(2));
    }

    #[test]
    fn test_events_raised_during_drain_wait_for_next_drain() {
        let dispatcher = Arc::new(EventDispatcher::new(DeliveryMode::Deferred, None));
        let inner = dispatcher.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        dispatcher.set_handler(
            EventKind::ScanResult,
            Some(Arc::new(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    inner.dispatch(scan(-90));
                    // Nested drain is a no-op
                    assert!(inner.drain().is_empty());
                }
            })),
        );

        dispatcher.dispatch(scan(-30));
        assert_eq!(dispatcher.drain().dispatched(), 1);
        assert_eq!(dispatcher.pending(EventKind::ScanResult), 1);
        assert_eq!(dispatcher.drain().dispatched(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
