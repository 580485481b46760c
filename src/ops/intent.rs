//! Operation intents: the unsigned description of an action on the network

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BrightIdError, Result};

/// Protocol version stamped into every operation as `v`
pub const PROTOCOL_VERSION: u32 = 5;

/// Field names the signing pipeline derives; intents may not carry them
pub const RESERVED_FIELDS: [&str; 2] = ["sig", "_key"];

/// Kinds of operation the node accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationName {
    #[serde(rename = "Add Connection")]
    AddConnection,
    #[serde(rename = "Remove Connection")]
    RemoveConnection,
    #[serde(rename = "Connect")]
    Connect,
    #[serde(rename = "Add Group")]
    AddGroup,
    #[serde(rename = "Remove Group")]
    RemoveGroup,
    #[serde(rename = "Add Membership")]
    AddMembership,
    #[serde(rename = "Remove Membership")]
    RemoveMembership,
    #[serde(rename = "Add Admin")]
    AddAdmin,
    #[serde(rename = "Invite")]
    Invite,
    #[serde(rename = "Dismiss")]
    Dismiss,
    #[serde(rename = "Set Trusted Connections")]
    SetTrustedConnections,
    #[serde(rename = "Set Signing Key")]
    SetSigningKey,
    #[serde(rename = "Sponsor")]
    Sponsor,
    #[serde(rename = "Link ContextId")]
    LinkContextId,
}

impl OperationName {
    pub const ALL: [OperationName; 14] = [
        OperationName::AddConnection,
        OperationName::RemoveConnection,
        OperationName::Connect,
        OperationName::AddGroup,
        OperationName::RemoveGroup,
        OperationName::AddMembership,
        OperationName::RemoveMembership,
        OperationName::AddAdmin,
        OperationName::Invite,
        OperationName::Dismiss,
        OperationName::SetTrustedConnections,
        OperationName::SetSigningKey,
        OperationName::Sponsor,
        OperationName::LinkContextId,
    ];

    /// Wire name, e.g. `"Add Membership"`
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::AddConnection => "Add Connection",
            OperationName::RemoveConnection => "Remove Connection",
            OperationName::Connect => "Connect",
            OperationName::AddGroup => "Add Group",
            OperationName::RemoveGroup => "Remove Group",
            OperationName::AddMembership => "Add Membership",
            OperationName::RemoveMembership => "Remove Membership",
            OperationName::AddAdmin => "Add Admin",
            OperationName::Invite => "Invite",
            OperationName::Dismiss => "Dismiss",
            OperationName::SetTrustedConnections => "Set Trusted Connections",
            OperationName::SetSigningKey => "Set Signing Key",
            OperationName::Sponsor => "Sponsor",
            OperationName::LinkContextId => "Link ContextId",
        }
    }
}

impl std::fmt::Display for OperationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationName {
    type Err = BrightIdError;

    fn from_str(s: &str) -> Result<Self> {
        OperationName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| BrightIdError::Serialization(format!("unknown operation name '{s}'")))
    }
}

/// Unsigned operation: `name`, `timestamp`, `v` plus kind-specific fields.
///
/// Field order is irrelevant; the canonical serializer fixes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationIntent {
    fields: Map<String, Value>,
}

impl OperationIntent {
    /// Intent stamped with `timestamp` (ms since epoch) and the current `v`
    pub fn new(name: OperationName, timestamp: i64) -> Self {
        let mut fields = Map::new();
        fields.insert("name".into(), Value::from(name.as_str()));
        fields.insert("timestamp".into(), Value::from(timestamp));
        fields.insert("v".into(), Value::from(PROTOCOL_VERSION));
        Self { fields }
    }

    /// Intent stamped with the wall clock
    pub fn now(name: OperationName) -> Self {
        Self::new(name, chrono::Utc::now().timestamp_millis())
    }

    /// Wrap an arbitrary field map (e.g. read from a file); see [`Self::validate`]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builder-style field setter
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Set a field from any serializable value
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| BrightIdError::Serialization(format!("field '{key}': {e}")))?;
        self.fields.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn name(&self) -> Result<OperationName> {
        self.fields
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BrightIdError::Serialization("operation has no name".into()))?
            .parse()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.fields.get("timestamp").and_then(Value::as_i64)
    }

    pub fn version(&self) -> Option<u64> {
        self.fields.get("v").and_then(Value::as_u64)
    }

    /// Required fields present and well-typed, no derived fields smuggled in
    pub fn validate(&self) -> Result<()> {
        self.name()?;
        if self.timestamp().is_none() {
            return Err(BrightIdError::Serialization(
                "timestamp must be an integer number of milliseconds".into(),
            ));
        }
        if self.version().is_none() {
            return Err(BrightIdError::Serialization(
                "v must be a non-negative integer".into(),
            ));
        }
        if let Some(reserved) = RESERVED_FIELDS.iter().find(|f| self.fields.contains_key(**f)) {
            return Err(BrightIdError::Serialization(format!(
                "'{reserved}' is derived during signing and cannot be part of an intent"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Builders for each operation kind
// =============================================================================

pub fn add_connection(id1: &str, id2: &str, sig1: &str, sig2: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::AddConnection, timestamp)
        .with("id1", id1)
        .with("id2", id2)
        .with("sig1", sig1)
        .with("sig2", sig2)
}

pub fn remove_connection(id1: &str, id2: &str, reason: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::RemoveConnection, timestamp)
        .with("id1", id1)
        .with("id2", id2)
        .with("reason", reason)
}

pub fn connect(id1: &str, id2: &str, level: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::Connect, timestamp)
        .with("id1", id1)
        .with("id2", id2)
        .with("level", level)
}

/// New group founded by `founders[0]`, inviting the other two
pub fn add_group(
    group: &str,
    founders: [&str; 3],
    group_type: &str,
    url: &str,
    timestamp: i64,
) -> OperationIntent {
    OperationIntent::new(OperationName::AddGroup, timestamp)
        .with("group", group)
        .with("id1", founders[0])
        .with("id2", founders[1])
        .with("id3", founders[2])
        .with("type", group_type)
        .with("url", url)
}

pub fn remove_group(id: &str, group: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::RemoveGroup, timestamp)
        .with("id", id)
        .with("group", group)
}

pub fn add_membership(id: &str, group: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::AddMembership, timestamp)
        .with("id", id)
        .with("group", group)
}

pub fn remove_membership(id: &str, group: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::RemoveMembership, timestamp)
        .with("id", id)
        .with("group", group)
}

pub fn add_admin(id: &str, admin: &str, group: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::AddAdmin, timestamp)
        .with("id", id)
        .with("admin", admin)
        .with("group", group)
}

pub fn invite(inviter: &str, invitee: &str, group: &str, data: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::Invite, timestamp)
        .with("inviter", inviter)
        .with("invitee", invitee)
        .with("group", group)
        .with("data", data)
}

pub fn dismiss(dismisser: &str, dismissee: &str, group: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::Dismiss, timestamp)
        .with("dismisser", dismisser)
        .with("dismissee", dismissee)
        .with("group", group)
}

pub fn set_trusted_connections(id: &str, trusted: &[String], timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::SetTrustedConnections, timestamp)
        .with("id", id)
        .with("trusted", trusted.to_vec())
}

pub fn set_signing_key(id: &str, signing_key: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::SetSigningKey, timestamp)
        .with("id", id)
        .with("signingKey", signing_key)
}

pub fn sponsor(id: &str, context: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::Sponsor, timestamp)
        .with("id", id)
        .with("context", context)
}

pub fn link_context_id(id: &str, context: &str, context_id: &str, timestamp: i64) -> OperationIntent {
    OperationIntent::new(OperationName::LinkContextId, timestamp)
        .with("id", id)
        .with("context", context)
        .with("contextId", context_id)
}
