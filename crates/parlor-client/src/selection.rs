use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use parlor_types::{Channel, Server};

use crate::error::SelectionError;

/// Immutable snapshot of what the user is looking at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub server: Option<Server>,
    pub channel: Option<Channel>,
    /// Bumped on every server change. Lets delayed callbacks detect that the
    /// selection they captured is no longer current.
    pub generation: u64,
}

impl Selection {
    pub fn server_id(&self) -> Option<Uuid> {
        self.server.as_ref().map(|s| s.id)
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        self.channel.as_ref().map(|c| c.id)
    }
}

/// Owner of the current [`Selection`]. Mutated only through its setters;
/// readers take snapshots or watch for changes.
pub struct SelectionStore {
    tx: watch::Sender<Selection>,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Selection::default());
        Self { tx }
    }

    pub fn current(&self) -> Selection {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Selection> {
        self.tx.subscribe()
    }

    /// Change the selected server. The channel is always cleared, even when
    /// the same server is re-selected.
    pub fn select_server(&self, server: Option<Server>) -> Selection {
        self.tx.send_modify(|s| {
            debug!(
                "Selecting server {:?} (was {:?})",
                server.as_ref().map(|s| s.id),
                s.server_id()
            );
            s.server = server;
            s.channel = None;
            s.generation += 1;
        });
        self.current()
    }

    pub fn select_channel(&self, channel: Channel) -> Result<(), SelectionError> {
        let generation = self.tx.borrow().generation;
        self.select_channel_at(generation, channel).map(|_| ())
    }

    /// Select `channel` only if the selection is still at `generation`.
    /// Returns `Ok(false)` when the server changed in the meantime.
    pub fn select_channel_at(&self, generation: u64, channel: Channel) -> Result<bool, SelectionError> {
        let mut outcome = Ok(false);
        self.tx.send_if_modified(|s| {
            if s.generation != generation {
                debug!(
                    "Ignoring stale channel selection {} (generation {} != {})",
                    channel.id, generation, s.generation
                );
                return false;
            }
            let Some(server_id) = s.server_id() else {
                outcome = Err(SelectionError::NoServerSelected);
                return false;
            };
            if channel.server_id != server_id {
                outcome = Err(SelectionError::ChannelNotInServer {
                    channel: channel.id,
                    server: server_id,
                });
                return false;
            }
            s.channel = Some(channel.clone());
            outcome = Ok(true);
            true
        });
        outcome
    }

    pub fn clear_channel(&self) {
        self.tx.send_if_modified(|s| s.channel.take().is_some());
    }

    /// Drop the channel if it was deleted out from under the selection.
    pub fn forget_channel(&self, channel_id: Uuid) {
        self.tx
            .send_if_modified(|s| match &s.channel {
                Some(c) if c.id == channel_id => {
                    s.channel = None;
                    true
                }
                _ => false,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parlor_types::Address;

    fn server(addr: &str) -> Server {
        Server {
            id: Uuid::new_v4(),
            address: Address::parse(addr).unwrap(),
            name: addr.into(),
            icon: None,
            created_at: Utc::now(),
            owner: Address::parse("0xowner").unwrap(),
        }
    }

    fn channel(server: &Server, name: &str) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            name: name.into(),
            server_id: server.id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_switching_server_clears_channel() {
        let store = SelectionStore::new();
        let s1 = server("0xs1");
        let s2 = server("0xs2");
        let c1 = channel(&s1, "general");

        store.select_server(Some(s1.clone()));
        store.select_channel(c1.clone()).unwrap();
        assert_eq!(store.current().channel_id(), Some(c1.id));

        let after = store.select_server(Some(s2.clone()));
        assert_eq!(after.server_id(), Some(s2.id));
        assert!(after.channel.is_none());
    }

    #[test]
    fn test_reselecting_same_server_clears_channel() {
        let store = SelectionStore::new();
        let s1 = server("0xs1");
        store.select_server(Some(s1.clone()));
        store.select_channel(channel(&s1, "general")).unwrap();

        store.select_server(Some(s1));
        assert!(store.current().channel.is_none());
    }

    #[test]
    fn test_rejects_foreign_channel() {
        let store = SelectionStore::new();
        let s1 = server("0xs1");
        let s2 = server("0xs2");

        assert_eq!(
            store.select_channel(channel(&s1, "general")),
            Err(SelectionError::NoServerSelected)
        );

        store.select_server(Some(s2.clone()));
        let foreign = channel(&s1, "general");
        assert_eq!(
            store.select_channel(foreign.clone()),
            Err(SelectionError::ChannelNotInServer {
                channel: foreign.id,
                server: s2.id
            })
        );
    }

    #[test]
    fn test_stale_callback_is_ignored() {
        let store = SelectionStore::new();
        let s1 = server("0xs1");
        let s2 = server("0xs2");

        let captured = store.select_server(Some(s1.clone()));
        store.select_server(Some(s2));

        // A delayed callback still holding the s1 snapshot
        let applied = store
            .select_channel_at(captured.generation, channel(&s1, "late"))
            .unwrap();
        assert!(!applied);
        assert!(store.current().channel.is_none());
    }

    #[tokio::test]
    async fn test_watchers_see_cleared_channel() {
        let store = SelectionStore::new();
        let mut rx = store.watch();
        let s1 = server("0xs1");
        store.select_server(Some(s1.clone()));
        store.select_channel(channel(&s1, "general")).unwrap();
        store.select_server(Some(server("0xs2")));

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().channel.is_none());
    }

    #[test]
    fn test_forget_deleted_channel() {
        let store = SelectionStore::new();
        let s1 = server("0xs1");
        let c1 = channel(&s1, "general");
        store.select_server(Some(s1));
        store.select_channel(c1.clone()).unwrap();

        store.forget_channel(Uuid::new_v4());
        assert!(store.current().channel.is_some());
        store.forget_channel(c1.id);
        assert!(store.current().channel.is_none());
    }
}
