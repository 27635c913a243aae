use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEvent {
    AccountsChanged,
    ChainChanged,
    Connect,
    Disconnect,
}

impl ProviderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEvent::AccountsChanged => "accountsChanged",
            ProviderEvent::ChainChanged => "chainChanged",
            ProviderEvent::Connect => "connect",
            ProviderEvent::Disconnect => "disconnect",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "accountsChanged" => Some(ProviderEvent::AccountsChanged),
            "chainChanged" => Some(ProviderEvent::ChainChanged),
            "connect" => Some(ProviderEvent::Connect),
            "disconnect" => Some(ProviderEvent::Disconnect),
            _ => None,
        }
    }
}

pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-event observer lists.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<HashMap<ProviderEvent, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: ProviderEvent, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_listener(&self, event: ProviderEvent, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        match listeners.get_mut(&event) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(existing, _)| *existing != id);
                before != handlers.len()
            }
            None => false,
        }
    }

    pub fn listener_count(&self, event: ProviderEvent) -> usize {
        self.listeners
            .read()
            .get(&event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Call every handler for `event`. A panicking handler is logged and
    /// skipped; the rest still run. Returns how many completed.
    pub fn emit(&self, event: ProviderEvent, payload: &Value) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Listener> = self
            .listeners
            .read()
            .get(&event)
            .map(|handlers| handlers.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        let mut completed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => completed += 1,
                Err(_) => log::error!("{} listener panicked", event.as_str()),
            }
        }
        completed
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(event, handlers)| (event.as_str(), handlers.len()))
            .collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .finish()
    }
}
