//! Per-tab registry of active live queries.
//!
//! Notifications are routed through the registry lock, so once a tab's set is
//! replaced or cancelled, late messages from the previous set are dropped
//! instead of landing in the new log.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use surrealist_model::LiveMessage;
use tracing::trace;
use uuid::Uuid;

use crate::store::SessionStore;
use crate::transport::LiveHandler;

#[derive(Clone, Default)]
pub struct LiveRegistry {
    tabs: Arc<Mutex<HashMap<String, HashSet<Uuid>>>>,
}

impl LiveRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the tab's live query ids.
    pub fn take(&self, tab: &str) -> HashSet<Uuid> {
        self.lock().remove(tab).unwrap_or_default()
    }

    /// Installs a new set for the tab, replacing any previous one.
    ///
    /// The tab's log is cleared and its live flag updated while the lock is
    /// held, so readers never see the old flag with the new set. Returns the
    /// displaced ids that are not part of the new set; the caller still has to
    /// kill them on the server.
    #[must_use = "displaced live queries keep running until killed"]
    pub fn replace(
        &self,
        tab: &str,
        ids: HashSet<Uuid>,
        store: &dyn SessionStore,
    ) -> HashSet<Uuid> {
        let mut tabs = self.lock();
        store.clear_live_messages(tab);
        store.set_live(tab, !ids.is_empty());
        let previous = if ids.is_empty() {
            tabs.remove(tab)
        } else {
            tabs.insert(tab.to_string(), ids.clone())
        };
        previous
            .unwrap_or_default()
            .into_iter()
            .filter(|id| !ids.contains(id))
            .collect()
    }

    /// Removes every tab's set and clears the corresponding live flags.
    pub fn clear(&self, store: &dyn SessionStore) -> usize {
        let mut tabs = self.lock();
        let count = tabs.values().map(HashSet::len).sum();
        for (tab, _) in tabs.drain() {
            store.set_live(&tab, false);
        }
        count
    }

    #[must_use]
    pub fn ids(&self, tab: &str) -> Vec<Uuid> {
        self.lock()
            .get(tab)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_active(&self, tab: &str, id: Uuid) -> bool {
        self.lock().get(tab).is_some_and(|ids| ids.contains(&id))
    }

    /// Appends a message to the tab log if `id` still belongs to the tab.
    pub fn deliver(
        &self,
        tab: &str,
        id: Uuid,
        store: &dyn SessionStore,
        message: impl FnOnce() -> LiveMessage,
    ) -> bool {
        let tabs = self.lock();
        if !tabs.get(tab).is_some_and(|ids| ids.contains(&id)) {
            trace!(tab, %id, "dropping message for inactive live query");
            return false;
        }
        store.push_live_message(tab, message());
        true
    }

    /// Builds the transport handler for one live query of a tab.
    ///
    /// `timestamp` is the time the query was issued and is stamped on every
    /// message.
    #[must_use]
    pub fn handler(
        &self,
        tab: &str,
        id: Uuid,
        store: Arc<dyn SessionStore>,
        timestamp: i64,
    ) -> LiveHandler {
        let registry = self.clone();
        let tab = tab.to_string();
        Arc::new(move |action, data| {
            registry.deliver(&tab, id, store.as_ref(), || LiveMessage {
                id: Uuid::new_v4().to_string(),
                query_id: id.to_string(),
                action,
                data,
                timestamp,
            });
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashSet<Uuid>>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
