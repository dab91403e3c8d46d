//! Typed event dispatch
//!
//! Handlers are registered per [`EventType`] and identified by the
//! [`HandlerId`] returned at registration. Dispatch works on a snapshot of
//! the handler list, so a handler may register or remove handlers (itself
//! included) without disturbing the dispatch in progress. A handler that
//! returns an error or panics is logged and skipped; the rest still run.

use crate::protocol::{EventType, RealtimeEvent};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{error, warn};

/// Result returned by event handlers
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A registered event handler
pub type EventHandler = Arc<dyn Fn(&RealtimeEvent) -> HandlerResult + Send + Sync>;

/// Registration token used to remove one handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Summary of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventType, Vec<(HandlerId, EventHandler)>>,
}

/// Shared handler registry
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<RwLock<Registry>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.total_listeners())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type
    pub fn on<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let id = HandlerId(registry.next_id);
        registry
            .handlers
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler; returns whether it was registered
    pub fn off(&self, event_type: EventType, id: HandlerId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let Some(handlers) = registry.handlers.get_mut(&event_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.handlers.remove(&event_type);
        }
        removed
    }

    /// Remove every handler for one event type, or for all types; returns how many were removed
    pub fn remove_all(&self, event_type: Option<EventType>) -> usize {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        match event_type {
            Some(event_type) => registry
                .handlers
                .remove(&event_type)
                .map(|handlers| handlers.len())
                .unwrap_or(0),
            None => {
                let count = registry.handlers.values().map(Vec::len).sum();
                registry.handlers.clear();
                count
            }
        }
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .handlers
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_listeners(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .handlers
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Invoke every handler registered for the event's type
    pub fn dispatch(&self, event: &RealtimeEvent) -> DispatchReport {
        // Snapshot and release the lock before running user code.
        let snapshot: Vec<(HandlerId, EventHandler)> = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .handlers
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for (id, handler) in snapshot {
            report.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        event_type = %event.event_type,
                        event_id = %event.id,
                        handler = ?id,
                        "Event handler failed: {}", e
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        event_type = %event.event_type,
                        event_id = %event.id,
                        handler = ?id,
                        "Event handler panicked: {}", message
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn event(event_type: EventType) -> RealtimeEvent {
        RealtimeEvent {
            id: "e1".to_string(),
            event_type,
            timestamp: Utc::now(),
            user_id: None,
            session_id: None,
            payload: Map::new(),
        }
    }

    fn counter(dispatcher: &EventDispatcher, event_type: EventType) -> (HandlerId, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = dispatcher.on(event_type, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (id, count)
    }

    #[test]
    fn test_dispatch_reaches_only_matching_tag() {
        let dispatcher = EventDispatcher::new();
        let (_, chat) = counter(&dispatcher, EventType::ChatMessage);
        let (_, typing) = counter(&dispatcher, EventType::TypingStart);

        let report = dispatcher.dispatch(&event(EventType::ChatMessage));
        assert_eq!(report, DispatchReport { invoked: 1, failed: 0 });
        assert_eq!(chat.load(Ordering::SeqCst), 1);
        assert_eq!(typing.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            dispatcher.on(EventType::Notification, move |_| {
                order.lock().unwrap().push(label);
                Ok(())
            });
        }
        dispatcher.dispatch(&event(EventType::Notification));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_removes_exactly_one_handler() {
        let dispatcher = EventDispatcher::new();
        let (first, first_count) = counter(&dispatcher, EventType::AgentStatus);
        let (_, second_count) = counter(&dispatcher, EventType::AgentStatus);

        assert!(dispatcher.off(EventType::AgentStatus, first));
        assert!(!dispatcher.off(EventType::AgentStatus, first));
        dispatcher.dispatch(&event(EventType::AgentStatus));

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_with_wrong_tag_is_noop() {
        let dispatcher = EventDispatcher::new();
        let (id, _) = counter(&dispatcher, EventType::AgentStatus);
        assert!(!dispatcher.off(EventType::ChatMessage, id));
        assert_eq!(dispatcher.listener_count(EventType::AgentStatus), 1);
    }

    #[test]
    fn test_remove_all_scoped_and_global() {
        let dispatcher = EventDispatcher::new();
        counter(&dispatcher, EventType::ChatMessage);
        counter(&dispatcher, EventType::ChatMessage);
        counter(&dispatcher, EventType::Error);

        assert_eq!(dispatcher.remove_all(Some(EventType::ChatMessage)), 2);
        assert_eq!(dispatcher.listener_count(EventType::ChatMessage), 0);
        assert_eq!(dispatcher.listener_count(EventType::Error), 1);

        assert_eq!(dispatcher.remove_all(None), 1);
        assert_eq!(dispatcher.total_listeners(), 0);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on(EventType::ToolCallError, |_| Err("handler exploded".into()));
        let (_, after) = counter(&dispatcher, EventType::ToolCallError);

        let report = dispatcher.dispatch(&event(EventType::ToolCallError));
        assert_eq!(report, DispatchReport { invoked: 2, failed: 1 });
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on(EventType::SystemMessage, |_| panic!("boom"));
        let (_, after) = counter(&dispatcher, EventType::SystemMessage);

        let report = dispatcher.dispatch(&event(EventType::SystemMessage));
        assert_eq!(report.failed, 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unregister_itself_during_dispatch() {
        let dispatcher = EventDispatcher::new();
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner = dispatcher.clone();
        let own_id = slot.clone();
        let own_calls = calls.clone();
        let id = dispatcher.on(EventType::TypingStop, move |_| {
            own_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *own_id.lock().unwrap() {
                inner.off(EventType::TypingStop, id);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(id);
        let (_, other) = counter(&dispatcher, EventType::TypingStop);

        dispatcher.dispatch(&event(EventType::TypingStop));
        dispatcher.dispatch(&event(EventType::TypingStop));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_registered_during_dispatch_runs_next_time() {
        let dispatcher = EventDispatcher::new();
        let added = Arc::new(AtomicUsize::new(0));

        let inner = dispatcher.clone();
        let added_calls = added.clone();
        dispatcher.on(EventType::ChatMessageChunk, move |_| {
            let added_calls = added_calls.clone();
            inner.on(EventType::ChatMessageChunk, move |_| {
                added_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        dispatcher.dispatch(&event(EventType::ChatMessageChunk));
        assert_eq!(added.load(Ordering::SeqCst), 0);
        dispatcher.dispatch(&event(EventType::ChatMessageChunk));
        assert_eq!(added.load(Ordering::SeqCst), 1);
    }
}
