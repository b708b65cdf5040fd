//! Live, scoped store queries.
//!
//! A [`LiveQuery`] fetches its rows once, then re-fetches whenever a
//! committed transaction touches its entity. A [`QuerySlot`] holds at most one
//! live query per scope key and disposes the old one before starting a new
//! one, so results for a superseded scope are never delivered.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parlor_db::{Database, Record};
use parlor_types::api::Filter;

#[derive(Debug, Clone)]
pub struct QueryState<T> {
    /// Scope these rows were fetched for. `None` when the slot is stopped.
    pub scope: Option<Filter>,
    pub loading: bool,
    pub error: Option<String>,
    pub data: Vec<T>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            scope: None,
            loading: false,
            error: None,
            data: Vec::new(),
        }
    }
}

pub struct LiveQuery<T> {
    scope: Filter,
    rx: watch::Receiver<QueryState<T>>,
    task: JoinHandle<()>,
}

impl<T> LiveQuery<T>
where
    T: Record + Clone + Sync,
{
    pub fn start(db: Arc<Database>, scope: Filter) -> Self {
        let (tx, rx) = watch::channel(QueryState {
            scope: Some(scope.clone()),
            loading: true,
            error: None,
            data: Vec::new(),
        });

        // Subscribe before the first fetch so no commit slips in between
        let mut changes = db.subscribe_changes();
        let task_scope = scope.clone();

        let task = tokio::spawn(async move {
            loop {
                refresh(&db, &task_scope, &tx).await;

                loop {
                    match changes.recv().await {
                        Ok(change) if change.touches(T::KIND) => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Live query on {:?} lagged by {} changes, refetching", T::KIND, n);
                            break;
                        }
                        Err(RecvError::Closed) => return,
                    }
                }

                if tx.is_closed() {
                    return;
                }
            }
        });

        Self { scope, rx, task }
    }

    pub fn scope(&self) -> &Filter {
        &self.scope
    }

    pub fn state(&self) -> QueryState<T> {
        self.rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.rx.clone()
    }

    pub fn stop(self) {
        // Drop aborts the task
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn refresh<T>(db: &Arc<Database>, scope: &Filter, tx: &watch::Sender<QueryState<T>>)
where
    T: Record + Clone + Sync,
{
    let db = db.clone();
    let filter = scope.clone();
    let result = tokio::task::spawn_blocking(move || db.fetch::<T>(&filter)).await;

    tx.send_modify(|state| {
        state.loading = false;
        match result {
            Ok(Ok(rows)) => {
                state.data = rows;
                state.error = None;
            }
            Ok(Err(e)) => {
                warn!("Query on {:?} failed: {:#}", T::KIND, e);
                state.error = Some(e.to_string());
            }
            Err(e) => {
                warn!("Query task on {:?} failed: {}", T::KIND, e);
                state.error = Some(format!("query task failed: {}", e));
            }
        }
    });
}

/// One active subscription per scope key.
pub struct QuerySlot<T> {
    db: Arc<Database>,
    active: Option<LiveQuery<T>>,
}

impl<T> QuerySlot<T>
where
    T: Record + Clone + Sync,
{
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, active: None }
    }

    /// Bind the slot to `scope`, or stop it with `None`. Returns whether the
    /// subscription was replaced.
    pub fn rescope(&mut self, scope: Option<Filter>) -> bool {
        if self.active.as_ref().map(LiveQuery::scope) == scope.as_ref() {
            return false;
        }

        if let Some(old) = self.active.take() {
            debug!("Disposing {:?} subscription scoped to {:?}", T::KIND, old.scope());
            old.stop();
        }

        self.active = scope.map(|scope| {
            debug!("Subscribing to {:?} scoped to {:?}", T::KIND, scope);
            LiveQuery::start(self.db.clone(), scope)
        });
        true
    }

    pub fn scope(&self) -> Option<&Filter> {
        self.active.as_ref().map(LiveQuery::scope)
    }

    /// Current rows, or an empty, non-loading state when stopped.
    pub fn state(&self) -> QueryState<T> {
        self.active.as_ref().map(LiveQuery::state).unwrap_or_default()
    }

    pub fn watch(&self) -> Option<watch::Receiver<QueryState<T>>> {
        self.active.as_ref().map(LiveQuery::watch)
    }

    /// Wait until the active query has finished its current fetch.
    pub async fn settled(&self) -> QueryState<T> {
        let Some(mut rx) = self.watch() else {
            return QueryState::default();
        };
        match rx.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use parlor_types::api::{Field, TxOp};
    use parlor_types::{Address, Channel, Server};
    use uuid::Uuid;

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

    async fn wait_for_len<T: Clone>(rx: &mut watch::Receiver<QueryState<T>>, len: usize) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.loading && s.data.len() == len))
            .await
            .expect("timed out waiting for live query")
            .expect("live query dropped");
    }

    #[tokio::test]
    async fn test_live_query_repushes_after_commit() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let s1 = server("0xs1");
        db.transact(&[TxOp::PutServer(s1.clone())]).unwrap();

        let query: LiveQuery<Channel> = LiveQuery::start(db.clone(), Filter::eq(Field::ServerId, s1.id));
        let mut rx = query.watch();
        wait_for_len(&mut rx, 0).await;

        db.transact(&[TxOp::PutChannel(channel(&s1, "general"))]).unwrap();
        wait_for_len(&mut rx, 1).await;
        assert_eq!(query.state().data[0].name, "general");
    }

    #[tokio::test]
    async fn test_rescope_disposes_old_subscription() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let s1 = server("0xs1");
        let s2 = server("0xs2");
        db.transact(&[
            TxOp::PutServer(s1.clone()),
            TxOp::PutServer(s2.clone()),
            TxOp::PutChannel(channel(&s1, "one")),
        ])
        .unwrap();

        let mut slot: QuerySlot<Channel> = QuerySlot::new(db.clone());
        assert!(slot.rescope(Some(Filter::eq(Field::ServerId, s1.id))));
        assert!(!slot.rescope(Some(Filter::eq(Field::ServerId, s1.id))));
        let mut old_rx = slot.watch().unwrap();
        wait_for_len(&mut old_rx, 1).await;

        assert!(slot.rescope(Some(Filter::eq(Field::ServerId, s2.id))));
        let state = slot.settled().await;
        assert_eq!(state.scope, Some(Filter::eq(Field::ServerId, s2.id)));
        assert!(state.data.is_empty());

        // The disposed subscription's sender is gone
        assert!(old_rx.changed().await.is_err());

        slot.rescope(None);
        assert!(slot.scope().is_none());
        assert!(slot.state().data.is_empty());
    }

    #[tokio::test]
    async fn test_query_errors_surface_in_state() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut slot: QuerySlot<Channel> = QuerySlot::new(db);
        // channels have no room_id column
        slot.rescope(Some(Filter::eq(Field::RoomId, Uuid::nil())));

        let state = slot.settled().await;
        assert!(state.error.is_some());
    }
}
