use serde::Serialize;
use tokio::sync::broadcast;

/// Notification emitted after a successful structural mutation.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    Created { id: String },
    Updated { id: String },
    Deleted { id: String },
    Moved { id: String, new_parent: String },
    Renamed { id: String, new_name: String },
    AclChanged { id: String },
    CheckedOut { id: String, principal: String },
    CheckedIn { id: String, principal: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
