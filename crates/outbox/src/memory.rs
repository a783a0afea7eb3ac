//! In-memory implementation of OutboxStore for dev mode and testing

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::store::*;

struct Inner {
    events: BTreeMap<i64, OutboxEvent>,
    next_id: i64,
}

/// In-memory implementation of OutboxStore
///
/// Provides the same semantics as the PostgreSQL implementation. Ids are
/// assigned from a counter, so they increase with insertion order.
///
/// # Example
///
/// ```
/// use coderunner_outbox::InMemoryOutboxStore;
///
/// let store = InMemoryOutboxStore::new();
/// assert_eq!(store.len(), 0);
/// ```
pub struct InMemoryOutboxStore {
    inner: RwLock<Inner>,
}

impl InMemoryOutboxStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                events: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Insert a New row dated now
    pub fn insert(&self, event: NewOutboxEvent) -> i64 {
        self.insert_at(event, Utc::now())
    }

    /// Insert a New row with an explicit date
    pub fn insert_at(&self, event: NewOutboxEvent, date: DateTime<Utc>) -> i64 {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.events.insert(
            id,
            OutboxEvent {
                id,
                event_type: event.event_type,
                event_key: event.event_key,
                date,
                payload: event.payload,
                status: OutboxStatus::New,
                target: event.target,
            },
        );
        id
    }

    /// Overwrite a row's status (operator action)
    pub fn set_status(&self, id: i64, status: OutboxStatus) -> bool {
        match self.inner.write().events.get_mut(&id) {
            Some(event) => {
                event.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: i64) -> Option<OutboxEvent> {
        self.inner.read().events.get(&id).cloned()
    }

    /// All rows in id order
    pub fn all(&self) -> Vec<OutboxEvent> {
        self.inner.read().events.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn pending_events_after(
        &self,
        after: Option<OutboxCursor>,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let inner = self.inner.read();
        let mut pending: Vec<OutboxEvent> = inner
            .events
            .values()
            .filter(|e| e.status.is_pending())
            .filter(|e| after.map_or(true, |cursor| e.cursor() > cursor))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_sent(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        match inner.events.get_mut(&id) {
            Some(event) if event.status.is_pending() => {
                event.status = OutboxStatus::Sent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let before = inner.events.len();
        inner
            .events
            .retain(|_, e| !(e.status == OutboxStatus::Sent && e.date <= cutoff));
        Ok((before - inner.events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(key: &str) -> NewOutboxEvent {
        NewOutboxEvent {
            event_type: "run.code".into(),
            event_key: key.into(),
            payload: "{}".into(),
            target: "topic".into(),
        }
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let store = InMemoryOutboxStore::new();
        let a = store.insert(row("a"));
        let b = store.insert(row("b"));
        assert!(b > a);
        assert_eq!(store.get(a).unwrap().status, OutboxStatus::New);
    }

    #[tokio::test]
    async fn test_pending_ordered_by_date_then_id() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let late = store.insert_at(row("late"), now);
        let early = store.insert_at(row("early"), now - Duration::seconds(5));
        let tie = store.insert_at(row("tie"), now);

        let ids: Vec<i64> = store
            .pending_events(100)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![early, late, tie]);
    }

    #[tokio::test]
    async fn test_pending_includes_failed_excludes_sent() {
        let store = InMemoryOutboxStore::new();
        let new = store.insert(row("new"));
        let failed = store.insert(row("failed"));
        let sent = store.insert(row("sent"));
        store.set_status(failed, OutboxStatus::Failed);
        store.set_status(sent, OutboxStatus::Sent);

        let ids: Vec<i64> = store
            .pending_events(100)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![new, failed]);
    }

    #[tokio::test]
    async fn test_pending_respects_limit() {
        let store = InMemoryOutboxStore::new();
        for i in 0..5 {
            store.insert(row(&i.to_string()));
        }
        assert_eq!(store.pending_events(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pending_after_cursor_pages_in_order() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let a = store.insert_at(row("a"), now - Duration::seconds(2));
        let b = store.insert_at(row("b"), now);
        let c = store.insert_at(row("c"), now);
        let d = store.insert_at(row("d"), now + Duration::seconds(1));

        let first = store.pending_events_after(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b]);

        let second = store
            .pending_events_after(Some(first[1].cursor()), 2)
            .await
            .unwrap();
        assert_eq!(second.iter().map(|e| e.id).collect::<Vec<_>>(), vec![c, d]);

        let rest = store
            .pending_events_after(Some(second[1].cursor()), 2)
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_sent_is_terminal() {
        let store = InMemoryOutboxStore::new();
        let id = store.insert(row("k"));

        assert!(store.mark_sent(id).await.unwrap());
        assert!(!store.mark_sent(id).await.unwrap());
        assert!(!store.mark_sent(999).await.unwrap());
        assert!(store.pending_events(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_only_old_sent_rows() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let old = now - Duration::days(8);

        let old_sent = store.insert_at(row("old-sent"), old);
        let old_new = store.insert_at(row("old-new"), old);
        let old_failed = store.insert_at(row("old-failed"), old);
        let fresh_sent = store.insert_at(row("fresh-sent"), now);
        store.set_status(old_sent, OutboxStatus::Sent);
        store.set_status(old_failed, OutboxStatus::Failed);
        store.set_status(fresh_sent, OutboxStatus::Sent);

        let deleted = store
            .delete_sent_before(now - Duration::days(7))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get(old_sent).is_none());
        assert!(store.get(old_new).is_some());
        assert!(store.get(old_failed).is_some());
        assert!(store.get(fresh_sent).is_some());
    }
}
