use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::events::ServerEvent;

const ORPHAN_LIMIT: usize = 64;

#[derive(Default)]
struct RouterState {
    waiters: HashMap<String, mpsc::UnboundedSender<ServerEvent>>,
    /// Tool events that arrived before their waiter registered.
    orphans: VecDeque<ServerEvent>,
}

/// Routes correlated stream events to the invocation waiting on them.
#[derive(Default)]
pub(crate) struct EventRouter {
    state: Mutex<RouterState>,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventRouter {
    pub(crate) fn register(&self, id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock_unpoisoned(&self.state);

        let mut kept = VecDeque::with_capacity(state.orphans.len());
        for event in state.orphans.drain(..) {
            if event.correlation_id() == Some(id) {
                let _ = tx.send(event);
            } else {
                kept.push_back(event);
            }
        }
        state.orphans = kept;
        state.waiters.insert(id.to_string(), tx);
        rx
    }

    pub(crate) fn unregister(&self, id: &str) {
        lock_unpoisoned(&self.state).waiters.remove(id);
    }

    /// Delivers a tool event. Returns false when nobody was waiting for it.
    pub(crate) fn dispatch(&self, event: ServerEvent) -> bool {
        let Some(id) = event.correlation_id().map(ToString::to_string) else {
            return false;
        };

        let mut state = lock_unpoisoned(&self.state);
        if let Some(waiter) = state.waiters.get(&id) {
            if waiter.send(event).is_ok() {
                return true;
            }
            state.waiters.remove(&id);
            return false;
        }

        debug!(correlation_id = %id, "parking event with no waiter");
        if state.orphans.len() >= ORPHAN_LIMIT {
            state.orphans.pop_front();
        }
        state.orphans.push_back(event);
        false
    }

    /// Drops every waiter, so pending invocations observe a closed stream.
    pub(crate) fn close_all(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.waiters.clear();
        state.orphans.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::EventRouter;
    use crate::events::ServerEvent;

    fn complete(id: &str) -> ServerEvent {
        ServerEvent::ToolComplete { id: id.to_string() }
    }

    #[test]
    fn routes_by_correlation_id() {
        let router = EventRouter::default();
        let mut first = router.register("a");
        let mut second = router.register("b");

        assert!(router.dispatch(complete("b")));
        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().ok(), Some(complete("b")));
    }

    #[test]
    fn early_events_are_replayed_on_register() {
        let router = EventRouter::default();
        assert!(!router.dispatch(complete("late")));
        let mut receiver = router.register("late");
        assert_eq!(receiver.try_recv().ok(), Some(complete("late")));
    }

    #[test]
    fn close_all_disconnects_waiters() {
        let router = EventRouter::default();
        let mut receiver = router.register("a");
        router.close_all();
        assert!(matches!(
            receiver.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
