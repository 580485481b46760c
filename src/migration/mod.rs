//! Migration of the legacy (v0) on-device snapshot
//!
//! The v0 app kept everything in a flat key-value store: the identity under
//! `userData`, each linked app under `App:<name>`, storage internals under
//! `store*`, and every other key was a connection. [`Migrator::run`] moves
//! that snapshot into the [`StateStore`] and the keychain, checks the result
//! against the source, then upgrades ids to the url-safe form.
//!
//! Migration must finish before anything else reads the state store.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::encoding::{b64_to_url_safe_b64, LegacyKey};
use crate::error::{BrightIdError, MigrationDomain, Result};
use crate::keychain::Keychain;
use crate::ops::canonical_string;
use crate::state::{sort_apps, Action, AppInfo, Connection, StateStore, UserState};
use crate::storage::KeyValueStorage;

pub const USER_DATA_KEY: &str = "userData";
pub const APP_KEY_PREFIX: &str = "App:";
pub const INTERNAL_KEY_PREFIX: &str = "store";

/// Keychain username used when the legacy identity has no id
pub const FALLBACK_USERNAME: &str = "empty";

/// Legacy storage keys grouped by what they hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionedKeys {
    pub user: Option<String>,
    pub connections: Vec<String>,
    pub apps: Vec<String>,
    pub internal: Vec<String>,
}

pub fn partition_keys(all_keys: &[String]) -> PartitionedKeys {
    let mut keys = PartitionedKeys::default();
    for key in all_keys {
        if key == USER_DATA_KEY {
            keys.user = Some(key.clone());
        } else if key.starts_with(APP_KEY_PREFIX) {
            keys.apps.push(key.clone());
        } else if key.starts_with(INTERNAL_KEY_PREFIX) {
            keys.internal.push(key.clone());
        } else {
            keys.connections.push(key.clone());
        }
    }
    keys
}

/// Summary of a completed migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub user_id: Option<String>,
    pub connections: usize,
    pub apps: usize,
    pub user_data_verified: bool,
    pub connections_verified: bool,
    pub apps_verified: bool,
}

impl MigrationReport {
    pub fn all_verified(&self) -> bool {
        self.user_data_verified && self.connections_verified && self.apps_verified
    }
}

/// `userData` as the v0 app wrote it
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyUserData {
    secret_key: Option<LegacyKey>,
    #[serde(flatten)]
    user: UserState,
}

pub struct Migrator {
    storage: Arc<dyn KeyValueStorage>,
    keychain: Arc<dyn Keychain>,
    state: Arc<dyn StateStore>,
}

impl Migrator {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        keychain: Arc<dyn Keychain>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            storage,
            keychain,
            state,
        }
    }

    /// Bootstrap, import, verify, then upgrade ids.
    ///
    /// Verification mismatches are reported, not raised; any I/O or parse
    /// failure aborts with the failing domain.
    pub async fn run(&self) -> Result<MigrationReport> {
        self.bootstrap_v0().await?;

        let all_keys = self
            .storage
            .all_keys()
            .await
            .map_err(|e| BrightIdError::migration(MigrationDomain::Connections, e.to_string()))?;
        let connections = self.get_connections(&all_keys).await?;
        let apps = self.get_apps(&all_keys).await?;

        let user_data_verified = self.verify_user_data().await?;
        let connections_verified = self.verify_connections(&all_keys)?;
        let apps_verified = self.verify_apps(&all_keys).await?;

        self.upgrade_conns_and_ids()?;

        let report = MigrationReport {
            user_id: self.state.state().user.id,
            connections,
            apps,
            user_data_verified,
            connections_verified,
            apps_verified,
        };
        if report.all_verified() {
            info!(connections, apps, "Migrated legacy state");
        } else {
            warn!(?report, "Migrated legacy state with mismatches");
        }
        Ok(report)
    }

    /// Move the legacy identity into the keychain and the user slice.
    ///
    /// The secret key never reaches the state store.
    pub async fn bootstrap_v0(&self) -> Result<UserState> {
        let fail = |message: String| BrightIdError::migration(MigrationDomain::User, message);

        let raw = self
            .storage
            .get(USER_DATA_KEY)
            .await
            .map_err(|e| fail(e.to_string()))?
            .ok_or_else(|| fail("no prior identity found".into()))?;
        let legacy: LegacyUserData =
            serde_json::from_str(&raw).map_err(|e| fail(format!("malformed {USER_DATA_KEY}: {e}")))?;

        let secret_key = legacy
            .secret_key
            .ok_or_else(|| fail("identity has no secret key".into()))?
            .to_b64()
            .map_err(|e| fail(e.to_string()))?;
        let username = legacy
            .user
            .id
            .clone()
            .unwrap_or_else(|| FALLBACK_USERNAME.to_string());

        self.keychain
            .save(&username, &secret_key)
            .await
            .map_err(|e| fail(e.to_string()))?;
        debug!(username = %username, "Saved legacy secret key");

        self.state.dispatch(Action::SetUserData(legacy.user.clone()));
        Ok(legacy.user)
    }

    /// Import every connection entry, newest first. Returns the count.
    pub async fn get_connections(&self, all_keys: &[String]) -> Result<usize> {
        let keys = partition_keys(all_keys).connections;
        debug!(?keys, "Connection keys");

        let connections: Vec<Connection> = self
            .load_records(&keys)
            .await
            .map_err(|e| BrightIdError::migration(MigrationDomain::Connections, e.to_string()))?;
        let count = connections.len();

        self.state.dispatch(Action::SetConnections(connections));
        self.state.dispatch(Action::SortConnections);
        Ok(count)
    }

    /// Import every `App:` entry, newest `dateAdded` first. Returns the count.
    pub async fn get_apps(&self, all_keys: &[String]) -> Result<usize> {
        let apps = self
            .load_apps(all_keys)
            .await
            .map_err(|e| BrightIdError::migration(MigrationDomain::Apps, e.to_string()))?;
        let count = apps.len();

        self.state.dispatch(Action::SetApps(apps));
        Ok(count)
    }

    /// Storage connection keys match the store's connection identities
    /// (`publicKey`, else `id`)
    pub fn verify_connections(&self, all_keys: &[String]) -> Result<bool> {
        let fail = |e: BrightIdError| BrightIdError::verification(MigrationDomain::Connections, e.to_string());

        let mut stored = partition_keys(all_keys).connections;
        stored.sort();

        let mut migrated: Vec<Option<String>> = self
            .state
            .state()
            .connections
            .iter()
            .map(|c| c.identity().map(str::to_string))
            .collect();
        migrated.sort();

        let stored = canonical_string(&stored).map_err(fail)?;
        let migrated = canonical_string(&migrated).map_err(fail)?;
        debug!(%stored, %migrated, "Comparing connections");
        Ok(stored == migrated)
    }

    /// Apps re-read from storage match the store's apps
    pub async fn verify_apps(&self, all_keys: &[String]) -> Result<bool> {
        let fail = |e: BrightIdError| BrightIdError::verification(MigrationDomain::Apps, e.to_string());

        let stored = self.load_apps(all_keys).await.map_err(fail)?;
        let stored = canonical_string(&stored).map_err(fail)?;
        let migrated = canonical_string(&self.state.state().apps).map_err(fail)?;
        debug!(%stored, %migrated, "Comparing apps");
        Ok(stored == migrated)
    }

    /// `publicKey`, `name` and `photo` in storage match the user slice
    pub async fn verify_user_data(&self) -> Result<bool> {
        let fail = |message: String| BrightIdError::verification(MigrationDomain::User, message);

        let raw = self
            .storage
            .get(USER_DATA_KEY)
            .await
            .map_err(|e| fail(e.to_string()))?
            .ok_or_else(|| fail("no prior identity found".into()))?;
        let stored: Value = serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))?;
        let user = self.state.state().user;

        let same = |field: &str, migrated: Value| -> Result<bool> {
            let stored = stored.get(field).cloned().unwrap_or(Value::Null);
            let stored = canonical_string(&stored).map_err(|e| fail(e.to_string()))?;
            let migrated = canonical_string(&migrated).map_err(|e| fail(e.to_string()))?;
            debug!(field, %stored, %migrated, "Comparing user data");
            Ok(stored == migrated)
        };

        Ok(same("publicKey", user.public_key.into())?
            && same("name", user.name.into())?
            && same("photo", user.photo.unwrap_or(Value::Null))?)
    }

    /// Derive url-safe ids from public keys and mark keyed connections
    /// verified. Safe to run more than once.
    pub fn upgrade_conns_and_ids(&self) -> Result<()> {
        let state = self.state.state();
        let public_key = state.user.public_key.ok_or_else(|| {
            BrightIdError::migration(MigrationDomain::User, "identity has no public key")
        })?;
        self.state.dispatch(Action::SetUserId(b64_to_url_safe_b64(&public_key)));

        let connections = state
            .connections
            .into_iter()
            .map(|mut conn| {
                if let Some(public_key) = &conn.public_key {
                    conn.id = Some(b64_to_url_safe_b64(public_key));
                    conn.status = Some("verified".to_string());
                }
                conn
            })
            .collect();
        self.state.dispatch(Action::SetConnections(connections));
        self.state.dispatch(Action::RemoveSafePubKey);
        Ok(())
    }

    async fn load_apps(&self, all_keys: &[String]) -> Result<Vec<AppInfo>> {
        let keys = partition_keys(all_keys).apps;
        let mut apps: Vec<AppInfo> = self.load_records(&keys).await?;
        sort_apps(&mut apps);
        Ok(apps)
    }

    async fn load_records<T: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<T>> {
        self.storage
            .multi_get(keys)
            .await?
            .into_iter()
            .map(|(key, value)| -> Result<T> {
                let value = value
                    .ok_or_else(|| BrightIdError::Storage(format!("no value stored under '{key}'")))?;
                serde_json::from_str(&value)
                    .map_err(|e| BrightIdError::Serialization(format!("entry '{key}': {e}")))
            })
            .collect()
    }
}
