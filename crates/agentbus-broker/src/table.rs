use agentbus_core::Message;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Authoritative record of every message the server knows about.
///
/// Each message lives in a `watch` channel so awaiting callers are woken on
/// every status change without polling.
#[derive(Default)]
pub struct MessageTable {
    slots: Mutex<HashMap<Uuid, Arc<watch::Sender<Message>>>>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message: Message) {
        let (tx, _rx) = watch::channel(message.clone());
        self.slots.lock().insert(message.id, Arc::new(tx));
    }

    /// Apply `f` to the stored message and notify watchers.
    /// Returns `false` if the message is unknown.
    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut Message)) -> bool {
        let Some(slot) = self.slots.lock().get(&id).cloned() else {
            return false;
        };
        slot.send_modify(f);
        true
    }

    pub fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<Message>> {
        self.slots.lock().get(&id).map(|s| s.subscribe())
    }

    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.slots.lock().get(&id).map(|s| s.borrow().clone())
    }

    pub fn remove(&self, id: Uuid) -> Option<Message> {
        self.slots.lock().remove(&id).map(|s| s.borrow().clone())
    }

    /// Drop terminal messages that finished before `cutoff`.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            let msg = slot.borrow();
            !(msg.status.is_terminal() && msg.finished_at.is_some_and(|t| t < cutoff))
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agentbus_core::MessageStatus;
    use serde_json::json;

    #[test]
    fn test_update_and_get() {
        let table = MessageTable::new();
        let msg = Message::new("a", "b", json!(1));
        let id = msg.id;
        table.insert(msg);

        assert!(table.update(id, |m| {
            m.transition(MessageStatus::Dispatched);
        }));
        assert_eq!(table.get(id).unwrap().status, MessageStatus::Dispatched);
        assert!(!table.update(Uuid::new_v4(), |_| {}));
    }

    #[tokio::test]
    async fn test_watchers_see_updates() {
        let table = MessageTable::new();
        let msg = Message::new("a", "b", json!(1));
        let id = msg.id;
        table.insert(msg);

        let mut rx = table.subscribe(id).unwrap();
        table.update(id, |m| {
            m.transition(MessageStatus::Completed);
        });
        let seen = rx.wait_for(|m| m.status.is_terminal()).await.unwrap();
        assert_eq!(seen.status, MessageStatus::Completed);
    }

    #[test]
    fn test_prune_only_old_terminal() {
        let table = MessageTable::new();
        let done = Message::new("a", "b", json!(1));
        let done_id = done.id;
        let pending = Message::new("a", "b", json!(2));
        table.insert(done);
        table.insert(pending);
        table.update(done_id, |m| {
            m.transition(MessageStatus::Failed);
        });

        assert_eq!(table.prune_finished_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(table.prune_finished_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert_eq!(table.len(), 1);
        assert!(table.get(done_id).is_none());
    }
}
