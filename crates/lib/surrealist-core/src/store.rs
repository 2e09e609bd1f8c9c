//! Accessors the session uses to read and publish UI state.
//!
//! The UI owns its state; the session only goes through [`SessionStore`] and
//! reports to the user through [`Interface`]. [`MemoryStore`] is a complete
//! in-process store for headless front ends and tests.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use surrealist_model::{ConnectionOptions, HistoryEntry, LiveMessage, QueryResponse, QueryTab};
use tracing::{error, info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// State accessors consumed by the session.
pub trait SessionStore: Send + Sync {
    fn is_connected(&self) -> bool;
    fn set_connected(&self, connected: bool);
    fn is_connecting(&self) -> bool;
    fn set_connecting(&self, connecting: bool);
    fn version(&self) -> String;
    fn set_version(&self, version: String);

    /// Connection options of the active connection tab.
    fn active_connection(&self) -> Option<ConnectionOptions>;
    /// The query tab currently selected in the active connection.
    fn active_tab(&self) -> Option<QueryTab>;
    fn tab(&self, id: &str) -> Option<QueryTab>;
    fn set_query_response(&self, tab: &str, response: Vec<QueryResponse>);
    fn set_query_active(&self, active: bool);

    fn add_history_entry(&self, entry: HistoryEntry);

    fn is_live(&self, tab: &str) -> bool;
    fn set_live(&self, tab: &str, live: bool);
    fn push_live_message(&self, tab: &str, message: LiveMessage);
    fn clear_live_messages(&self, tab: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// User facing notification with a title and subtitle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub subtitle: String,
}

impl Notice {
    #[must_use]
    pub fn error(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            subtitle: subtitle.into(),
        }
    }

    #[must_use]
    pub fn warning(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            title: title.into(),
            subtitle: subtitle.into(),
        }
    }
}

/// Hooks into the UI that are not plain state.
pub trait Interface: Send + Sync {
    fn notify(&self, notice: Notice);
    /// Opens the scope signup flow for the active connection.
    fn open_scope_signup(&self);
    /// Requests a refresh of the database schema view.
    fn sync_schema(&self);
}

/// Interface that reports everything through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInterface;

impl Interface for LogInterface {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Warning => warn!(title = %notice.title, "{}", notice.subtitle),
            NoticeLevel::Error => error!(title = %notice.title, "{}", notice.subtitle),
        }
    }

    fn open_scope_signup(&self) {
        info!("scope signup required for the active connection");
    }

    fn sync_schema(&self) {
        info!("schema sync requested");
    }
}

#[derive(Debug, Default)]
struct StoreState {
    connection: Option<ConnectionOptions>,
    tabs: Vec<QueryTab>,
    active_tab: Option<String>,
    connected: bool,
    connecting: bool,
    version: String,
    query_active: bool,
    history: Vec<HistoryEntry>,
    live_tabs: HashSet<String>,
    live_messages: HashMap<String, Vec<LiveMessage>>,
}

/// In-memory [`SessionStore`].
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    history_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    #[must_use]
    pub fn with_connection(self, connection: ConnectionOptions) -> Self {
        self.write().connection = Some(connection);
        self
    }

    #[must_use]
    pub const fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn set_connection(&self, connection: Option<ConnectionOptions>) {
        self.write().connection = connection;
    }

    /// Adds a tab and makes it active.
    pub fn add_tab(&self, tab: QueryTab) {
        let mut state = self.write();
        state.active_tab = Some(tab.id.clone());
        state.tabs.retain(|existing| existing.id != tab.id);
        state.tabs.push(tab);
    }

    pub fn set_active_tab(&self, id: Option<&str>) {
        self.write().active_tab = id.map(str::to_string);
    }

    pub fn update_tab(&self, id: &str, update: impl FnOnce(&mut QueryTab)) {
        if let Some(tab) = self.write().tabs.iter_mut().find(|tab| tab.id == id) {
            update(tab);
        }
    }

    pub fn remove_tab(&self, id: &str) {
        let mut state = self.write();
        state.tabs.retain(|tab| tab.id != id);
        state.live_tabs.remove(id);
        state.live_messages.remove(id);
        if state.active_tab.as_deref() == Some(id) {
            state.active_tab = None;
        }
    }

    /// History entries, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read().history.clone()
    }

    #[must_use]
    pub fn live_messages(&self, tab: &str) -> Vec<LiveMessage> {
        self.read()
            .live_messages
            .get(tab)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_query_active(&self) -> bool {
        self.read().query_active
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemoryStore {
    fn is_connected(&self) -> bool {
        self.read().connected
    }

    fn set_connected(&self, connected: bool) {
        self.write().connected = connected;
    }

    fn is_connecting(&self) -> bool {
        self.read().connecting
    }

    fn set_connecting(&self, connecting: bool) {
        self.write().connecting = connecting;
    }

    fn version(&self) -> String {
        self.read().version.clone()
    }

    fn set_version(&self, version: String) {
        self.write().version = version;
    }

    fn active_connection(&self) -> Option<ConnectionOptions> {
        self.read().connection.clone()
    }

    fn active_tab(&self) -> Option<QueryTab> {
        let state = self.read();
        let active = state.active_tab.as_deref()?;
        state.tabs.iter().find(|tab| tab.id == active).cloned()
    }

    fn tab(&self, id: &str) -> Option<QueryTab> {
        self.read().tabs.iter().find(|tab| tab.id == id).cloned()
    }

    fn set_query_response(&self, tab: &str, response: Vec<QueryResponse>) {
        self.update_tab(tab, |tab| tab.response = response);
    }

    fn set_query_active(&self, active: bool) {
        self.write().query_active = active;
    }

    fn add_history_entry(&self, entry: HistoryEntry) {
        let mut state = self.write();
        state.history.insert(0, entry);
        let limit = self.history_limit;
        state.history.truncate(limit);
    }

    fn is_live(&self, tab: &str) -> bool {
        self.read().live_tabs.contains(tab)
    }

    fn set_live(&self, tab: &str, live: bool) {
        let mut state = self.write();
        if live {
            state.live_tabs.insert(tab.to_string());
        } else {
            state.live_tabs.remove(tab);
        }
    }

    fn push_live_message(&self, tab: &str, message: LiveMessage) {
        self.write()
            .live_messages
            .entry(tab.to_string())
            .or_default()
            .push(message);
    }

    fn clear_live_messages(&self, tab: &str) {
        self.write().live_messages.remove(tab);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            query: "SELECT 1".to_string(),
            timestamp: 0,
            origin: "Tab".to_string(),
        }
    }

    #[test]
    fn history_is_bounded_newest_first() {
        let store = MemoryStore::new().with_history_limit(2);
        store.add_history_entry(entry("a"));
        store.add_history_entry(entry("b"));
        store.add_history_entry(entry("c"));

        let ids: Vec<_> = store.history().into_iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn added_tab_becomes_active_and_removal_clears_it() {
        let store = MemoryStore::new();
        store.add_tab(QueryTab::new("one", "Query 1").with_query("SELECT 1"));
        store.set_live("one", true);

        assert_eq!(store.active_tab().map(|tab| tab.id), Some("one".to_string()));
        assert!(store.is_live("one"));

        store.remove_tab("one");
        assert!(store.active_tab().is_none());
        assert!(!store.is_live("one"));
    }
}
