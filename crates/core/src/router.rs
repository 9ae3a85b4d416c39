//! Routing of terminal events to observers
//!
//! Each event category has at most one observer per terminal plus one global
//! observer. Every registration takes a sequence number; when both a
//! terminal-specific and a global observer exist, the newer one fires.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{EventKind, InboundEvent, RoutedEvent};

/// Observer invoked with the terminal id and the event
pub type Handler = Arc<dyn Fn(&str, &InboundEvent) + Send + Sync>;

struct Slot {
    seq: u64,
    handler: Handler,
}

#[derive(Default)]
struct RoutingTable {
    global: HashMap<EventKind, Slot>,
    terminals: HashMap<String, HashMap<EventKind, Slot>>,
}

/// Observer table shared by the registry and its dispatcher task
#[derive(Default)]
pub struct CallbackRouter {
    table: RwLock<RoutingTable>,
    seq: AtomicU64,
}

impl CallbackRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register observer for one terminal, replacing any previous one
    pub fn set_terminal(&self, terminal_id: &str, kind: EventKind, handler: Handler) {
        let mut table = self.write();
        let seq = self.next_seq();
        table
            .terminals
            .entry(terminal_id.to_string())
            .or_default()
            .insert(kind, Slot { seq, handler });
    }

    /// Register observer for every terminal, replacing any previous one
    pub fn set_global(&self, kind: EventKind, handler: Handler) {
        let mut table = self.write();
        let seq = self.next_seq();
        table.global.insert(kind, Slot { seq, handler });
    }

    /// Latest sequence number handed out
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Forget the observers of one terminal registered up to `up_to`
    ///
    /// Observers set later (a re-registered terminal) are kept.
    pub fn clear_terminal(&self, terminal_id: &str, up_to: u64) {
        let mut table = self.write();
        let Some(slots) = table.terminals.get_mut(terminal_id) else {
            return;
        };
        slots.retain(|_, slot| slot.seq > up_to);
        if slots.is_empty() {
            table.terminals.remove(terminal_id);
        }
    }

    /// Observer that should receive `kind` events from `terminal_id`
    pub fn resolve(&self, terminal_id: &str, kind: EventKind) -> Option<Handler> {
        let table = self.read();
        let local = table
            .terminals
            .get(terminal_id)
            .and_then(|slots| slots.get(&kind));
        let global = table.global.get(&kind);

        let slot = match (local, global) {
            (Some(l), Some(g)) => {
                if l.seq > g.seq {
                    l
                } else {
                    g
                }
            }
            (Some(l), None) => l,
            (None, Some(g)) => g,
            (None, None) => return None,
        };
        Some(slot.handler.clone())
    }

    /// Invoke the resolved observer; returns whether one fired
    ///
    /// The table lock is not held while the observer runs, and a panicking
    /// observer is logged and contained.
    pub fn dispatch(&self, routed: &RoutedEvent) -> bool {
        let Some(handler) = self.resolve(&routed.terminal_id, routed.event.kind()) else {
            tracing::trace!(
                "No observer for {:?} event from terminal {}",
                routed.event.kind(),
                routed.terminal_id
            );
            return false;
        };

        let call = panic::catch_unwind(AssertUnwindSafe(|| {
            handler(&*routed.terminal_id, &routed.event)
        }));
        if call.is_err() {
            tracing::error!(
                "Observer for {:?} event from terminal {} panicked",
                routed.event.kind(),
                routed.terminal_id
            );
        }
        true
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn read(&self) -> RwLockReadGuard<'_, RoutingTable> {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoutingTable> {
        self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Handler {
        let log = log.clone();
        Arc::new(move |terminal_id: &str, _event: &InboundEvent| {
            log.lock().unwrap().push(format!("{}:{}", label, terminal_id));
        })
    }

    fn closed_from(terminal_id: &str) -> RoutedEvent {
        RoutedEvent {
            terminal_id: terminal_id.into(),
            event: InboundEvent::closed(1000, "bye"),
        }
    }

    #[test]
    fn test_no_observer() {
        let router = CallbackRouter::new();
        assert!(router.resolve("t1", EventKind::Closed).is_none());
        assert!(!router.dispatch(&closed_from("t1")));
    }

    #[test]
    fn test_last_registration_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = CallbackRouter::new();

        router.set_terminal("t1", EventKind::Closed, recorder("local", &log));
        router.set_global(EventKind::Closed, recorder("global", &log));
        router.dispatch(&closed_from("t1"));

        router.set_terminal("t1", EventKind::Closed, recorder("local2", &log));
        router.dispatch(&closed_from("t1"));

        // t2 has no local observer
        router.dispatch(&closed_from("t2"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["global:t1", "local2:t1", "global:t2"]
        );
    }

    #[test]
    fn test_categories_are_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = CallbackRouter::new();
        router.set_terminal("t1", EventKind::Error, recorder("error", &log));

        assert!(!router.dispatch(&closed_from("t1")));
        assert!(router.resolve("t1", EventKind::Error).is_some());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_terminal_falls_back_to_global() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = CallbackRouter::new();
        router.set_global(EventKind::Closed, recorder("global", &log));
        router.set_terminal("t1", EventKind::Closed, recorder("local", &log));

        router.clear_terminal("t1", router.sequence());
        router.dispatch(&closed_from("t1"));
        assert_eq!(*log.lock().unwrap(), vec!["global:t1"]);
    }

    #[test]
    fn test_clear_terminal_keeps_newer_observers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = CallbackRouter::new();
        router.set_terminal("t1", EventKind::Closed, recorder("old", &log));
        let released_at = router.sequence();
        router.set_terminal("t1", EventKind::Error, recorder("new", &log));

        router.clear_terminal("t1", released_at);
        assert!(router.resolve("t1", EventKind::Closed).is_none());
        assert!(router.resolve("t1", EventKind::Error).is_some());
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let router = CallbackRouter::new();
        router.set_global(
            EventKind::Closed,
            Arc::new(|_: &str, _: &InboundEvent| panic!("observer bug")),
        );
        assert!(router.dispatch(&closed_from("t1")));
        // router still usable
        assert!(router.resolve("t1", EventKind::Closed).is_some());
    }
}
