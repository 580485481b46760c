//! Central state container
//!
//! State changes only through dispatched [`Action`]s, applied by
//! [`AppState::apply`]. Readers take snapshots; a dispatch is visible to
//! the next `state()` call.

use std::cmp::Ordering;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// The signed-in identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Standard base64 Ed25519 public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Value>,
    /// Fields this crate does not interpret, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A peer the user has connected with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Milliseconds since epoch, as a number or numeric string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_date: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Connection {
    pub fn connection_date_ms(&self) -> Option<i64> {
        match self.connection_date.as_ref()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// `publicKey`, falling back to `id`
    pub fn identity(&self) -> Option<&str> {
        self.public_key.as_deref().or(self.id.as_deref())
    }
}

/// An app the user has linked
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Milliseconds since epoch, as a number or numeric string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppInfo {
    pub fn date_added_ms(&self) -> Option<f64> {
        let ms = match self.date_added.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }?;
        ms.is_finite().then_some(ms)
    }
}

/// Newest `dateAdded` first, undated apps last; ties keep their order
pub fn sort_apps(apps: &mut [AppInfo]) {
    apps.sort_by(|a, b| match (a.date_added_ms(), b.date_added_ms()) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Newest `connectionDate` first, undated connections last
pub fn sort_connections(connections: &mut [Connection]) {
    connections.sort_by(|a, b| match (a.connection_date_ms(), b.connection_date_ms()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub user: UserState,
    pub connections: Vec<Connection>,
    pub apps: Vec<AppInfo>,
    /// Public key awaiting confirmation during recovery
    pub safe_pub_key: Option<String>,
}

/// State transition
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetUserData(UserState),
    SetUserId(String),
    SetConnections(Vec<Connection>),
    /// Default ordering: newest connection first
    SortConnections,
    SetApps(Vec<AppInfo>),
    SetSafePubKey(String),
    RemoveSafePubKey,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SetUserData(_) => "SetUserData",
            Action::SetUserId(_) => "SetUserId",
            Action::SetConnections(_) => "SetConnections",
            Action::SortConnections => "SortConnections",
            Action::SetApps(_) => "SetApps",
            Action::SetSafePubKey(_) => "SetSafePubKey",
            Action::RemoveSafePubKey => "RemoveSafePubKey",
        }
    }
}

impl AppState {
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::SetUserData(user) => self.user = user,
            Action::SetUserId(id) => self.user.id = Some(id),
            Action::SetConnections(connections) => self.connections = connections,
            Action::SortConnections => sort_connections(&mut self.connections),
            Action::SetApps(apps) => self.apps = apps,
            Action::SetSafePubKey(key) => self.safe_pub_key = Some(key),
            Action::RemoveSafePubKey => self.safe_pub_key = None,
        }
    }
}

/// Snapshot reads, dispatched writes
pub trait StateStore: Send + Sync {
    fn state(&self) -> AppState;

    fn dispatch(&self, action: Action);
}

#[derive(Default)]
pub struct MemoryStateStore {
    state: RwLock<AppState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn state(&self) -> AppState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn dispatch(&self, action: Action) {
        debug!(action = action.kind(), "Dispatch");
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .apply(action);
    }
}
