//! Configuration for the BrightID client
//!
//! Settings come from three layers, highest first: command-line flags,
//! environment variables (optionally from a `.env` file), and a TOML file
//! passed with `--config`. Anything left unset falls back to the defaults
//! below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{
    BackupApiConfig, NodeApiConfig, RetryPolicy, DEFAULT_LEDGER_TTL, DEFAULT_NODE_URL,
    DEFAULT_RECOVERY_URL,
};
use crate::error::{BrightIdError, Result};

/// BrightID client - sign, submit and migrate identity operations
#[derive(Parser, Debug, Clone)]
#[command(name = "brightid")]
#[command(about = "Signed-operation client for the BrightID network")]
pub struct Args {
    /// TOML configuration file
    #[arg(long, env = "BRIGHTID_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Node base URL (operations and profile endpoints)
    #[arg(long, env = "NODE_URL", global = true)]
    pub node_url: Option<String>,

    /// Recovery service base URL
    #[arg(long, env = "RECOVERY_URL", global = true)]
    pub recovery_url: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", global = true)]
    pub request_timeout_ms: Option<u64>,

    /// HTTP status the node answers an accepted operation with
    #[arg(long, env = "SUCCESS_STATUS", global = true)]
    pub success_status: Option<u16>,

    /// Attempts per submission, including the first
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", global = true)]
    pub retry_max_attempts: Option<u32>,

    /// Delay before the first retry in milliseconds
    #[arg(long, env = "RETRY_INITIAL_BACKOFF_MS", global = true)]
    pub retry_initial_backoff_ms: Option<u64>,

    /// Upper bound on the retry delay in milliseconds
    #[arg(long, env = "RETRY_MAX_BACKOFF_MS", global = true)]
    pub retry_max_backoff_ms: Option<u64>,

    /// Seconds an accepted operation is answered without resubmitting
    #[arg(long, env = "LEDGER_TTL_SECS", global = true)]
    pub ledger_ttl_secs: Option<u64>,

    /// Encrypted keychain file (in-memory keychain when unset)
    #[arg(long, env = "KEYCHAIN_PATH", global = true)]
    pub keychain_path: Option<PathBuf>,

    /// Password for the keychain file
    #[arg(long, env = "KEYCHAIN_PASSWORD", hide_env_values = true, global = true)]
    pub keychain_password: Option<String>,

    /// Legacy AsyncStorage database to migrate from
    #[arg(long, env = "STORAGE_PATH", global = true)]
    pub storage_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate an identity and store its secret in the keychain
    Keygen {
        /// Keychain username (defaults to the new user id)
        #[arg(long)]
        username: Option<String>,
    },

    /// Sign an operation and print the record
    Sign(OperationArgs),

    /// Sign (unless --file holds a signed record) and submit an operation
    Submit {
        #[command(flatten)]
        op: OperationArgs,

        /// Signed record to submit as-is
        #[arg(long, conflicts_with = "name")]
        file: Option<PathBuf>,
    },

    /// Check a signed record's key and signature
    Verify {
        #[arg(long)]
        file: PathBuf,

        /// Signer's public key (standard or url-safe base64)
        #[arg(long)]
        public_key: String,
    },

    /// Ask the node for an operation's processing state
    Status {
        /// Operation key
        key: String,
    },

    /// Migrate a legacy v0 snapshot and print the report
    Migrate {
        /// AsyncStorage database (overrides STORAGE_PATH)
        #[arg(long)]
        storage: Option<PathBuf>,
    },

    /// Fetch the recovery backup stored under two keys
    GetRecovery { key1: String, key2: String },

    /// Store a recovery backup under two keys
    PutRecovery {
        key1: String,
        key2: String,

        /// Backup payload, already encrypted
        #[arg(long)]
        data: String,
    },

    /// Fetch the signature uploaded for a signing key
    GetSig { public_key: String },

    /// Sign a "Set Signing Key" operation and upload its signature
    SetSig {
        /// BrightID user id
        #[arg(long)]
        id: String,

        /// New signing key, base64
        #[arg(long)]
        signing_key: String,

        /// Milliseconds since epoch (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct OperationArgs {
    /// Operation name, e.g. "Add Membership"
    #[arg(long)]
    pub name: Option<String>,

    /// Operation field as key=value; arrays, objects and quoted strings are read as JSON
    #[arg(long = "field", value_parser = parse_field)]
    pub fields: Vec<(String, Value)>,

    /// Operation field as key=<JSON literal>, for numbers and booleans
    #[arg(long = "json-field", value_parser = parse_json_field)]
    pub json_fields: Vec<(String, Value)>,

    /// Milliseconds since epoch (defaults to now)
    #[arg(long)]
    pub timestamp: Option<i64>,
}

/// Parse `key=value`. The value stays a string unless it opens a JSON
/// array, object or string, so `id=123` signs as `"123"`.
pub fn parse_field(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = split_field(raw)?;
    if value.starts_with(['[', '{', '"']) {
        let parsed = serde_json::from_str(value)
            .map_err(|e| format!("invalid JSON for field '{key}': {e}"))?;
        return Ok((key.to_string(), parsed));
    }
    Ok((key.to_string(), Value::String(value.to_string())))
}

/// Parse `key=<JSON>`, failing on anything that is not valid JSON
pub fn parse_json_field(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = split_field(raw)?;
    let parsed = serde_json::from_str(value)
        .map_err(|e| format!("invalid JSON for field '{key}': {e}"))?;
    Ok((key.to_string(), parsed))
}

fn split_field(raw: &str) -> std::result::Result<(&str, &str), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty field name in '{raw}'"));
    }
    Ok((key, value))
}

impl Args {
    /// Load the config file (if any), apply flag and env overrides, validate
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };

        if let Some(url) = &self.node_url {
            config.node.url = url.clone();
        }
        if let Some(url) = &self.recovery_url {
            config.recovery.url = url.clone();
        }
        if let Some(ms) = self.request_timeout_ms {
            config.node.timeout_ms = ms;
        }
        if let Some(status) = self.success_status {
            config.node.success_status = status;
        }
        if let Some(attempts) = self.retry_max_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = self.retry_initial_backoff_ms {
            config.retry.initial_backoff_ms = ms;
        }
        if let Some(ms) = self.retry_max_backoff_ms {
            config.retry.max_backoff_ms = ms;
        }
        if let Some(secs) = self.ledger_ttl_secs {
            config.node.ledger_ttl_secs = secs;
        }
        if let Some(path) = &self.keychain_path {
            config.paths.keychain = Some(path.clone());
        }
        if let Some(path) = &self.storage_path {
            config.paths.storage = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let config = self.client_config()?;
        if config.paths.keychain.is_some() && self.keychain_password.is_none() {
            return Err(BrightIdError::Config(
                "KEYCHAIN_PASSWORD is required when KEYCHAIN_PATH is set".into(),
            ));
        }
        Ok(())
    }
}

/// Settings file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub recovery: RecoverySection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub paths: PathsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_node_url")]
    pub url: String,

    /// Status that marks a submission as accepted
    #[serde(default = "default_success_status")]
    pub success_status: u16,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Zero sends every submission to the node
    #[serde(default = "default_ledger_ttl_secs")]
    pub ledger_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_recovery_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default)]
    pub keychain: Option<PathBuf>,

    #[serde(default)]
    pub storage: Option<PathBuf>,
}

// Defaults
fn default_node_url() -> String { DEFAULT_NODE_URL.to_string() }
fn default_recovery_url() -> String { DEFAULT_RECOVERY_URL.to_string() }
fn default_success_status() -> u16 { 204 }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_ledger_ttl_secs() -> u64 { DEFAULT_LEDGER_TTL.as_secs() }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 250 }
fn default_max_backoff_ms() -> u64 { 4_000 }
fn default_multiplier() -> u32 { 2 }

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            url: default_node_url(),
            success_status: default_success_status(),
            timeout_ms: default_timeout_ms(),
            ledger_ttl_secs: default_ledger_ttl_secs(),
        }
    }
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            url: default_recovery_url(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrightIdError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| BrightIdError::Config(format!("invalid {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.url.trim().is_empty() {
            return Err(BrightIdError::Config("NODE_URL must not be empty".into()));
        }
        if self.recovery.url.trim().is_empty() {
            return Err(BrightIdError::Config("RECOVERY_URL must not be empty".into()));
        }
        if !(200..300).contains(&self.node.success_status) {
            return Err(BrightIdError::Config(format!(
                "SUCCESS_STATUS must be a 2xx code, got {}",
                self.node.success_status
            )));
        }
        if self.node.timeout_ms == 0 {
            return Err(BrightIdError::Config("REQUEST_TIMEOUT_MS must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(BrightIdError::Config("RETRY_MAX_ATTEMPTS must be at least 1".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(BrightIdError::Config(
                "RETRY_INITIAL_BACKOFF_MS must be less than or equal to RETRY_MAX_BACKOFF_MS".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn node_api_config(&self) -> NodeApiConfig {
        NodeApiConfig {
            base_url: self.node.url.clone(),
            success_status: self.node.success_status,
            timeout: Duration::from_millis(self.node.timeout_ms),
            retry: self.retry_policy(),
            ledger_ttl: Duration::from_secs(self.node.ledger_ttl_secs),
        }
    }

    pub fn backup_api_config(&self) -> BackupApiConfig {
        BackupApiConfig {
            recovery_url: self.recovery.url.clone(),
            profile_url: self.node.url.clone(),
            timeout: Duration::from_millis(self.node.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["brightid"];
        argv.extend_from_slice(extra);
        argv.push("status");
        argv.push("abc");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.node.url, "http://node.brightid.org");
        assert_eq!(config.recovery.url, "https://recovery.brightid.org");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.node_api_config().timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_file_then_flag_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[node]\nurl = \"http://test.brightid.org\"\nsuccess_status = 200\n\n[retry]\nmax_attempts = 5"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = parse(&["--config", &path, "--success-status", "204"]);
        let config = args.client_config().unwrap();
        assert_eq!(config.node.url, "http://test.brightid.org");
        assert_eq!(config.node.success_status, 204);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 250);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for flags in [
            vec!["--success-status", "404"],
            vec!["--retry-max-attempts", "0"],
            vec!["--retry-initial-backoff-ms", "5000"],
            vec!["--node-url", " "],
        ] {
            let args = parse(&flags);
            assert!(
                matches!(args.validate(), Err(BrightIdError::Config(_))),
                "{flags:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_keychain_path_needs_password() {
        let args = parse(&["--keychain-path", "/tmp/keychain.json"]);
        assert!(args.validate().is_err());
        let args = parse(&["--keychain-path", "/tmp/keychain.json", "--keychain-password", "pw"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("group=g1").unwrap(),
            ("group".to_string(), Value::from("g1"))
        );
        assert_eq!(
            parse_field("trusted=[\"a\",\"b\"]").unwrap().1,
            serde_json::json!(["a", "b"])
        );
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=x").is_err());
        assert!(parse_field("trusted=[\"a\"").is_err());
    }

    #[test]
    fn test_bare_values_stay_strings() {
        assert_eq!(parse_field("id=123").unwrap().1, Value::from("123"));
        assert_eq!(parse_field("group=true").unwrap().1, Value::from("true"));
        assert_eq!(parse_field("name=null").unwrap().1, Value::from("null"));
        assert_eq!(parse_field("id=\"123\"").unwrap().1, Value::from("123"));

        assert_eq!(parse_json_field("n=5").unwrap().1, Value::from(5));
        assert_eq!(parse_json_field("flag=true").unwrap().1, Value::from(true));
        assert!(parse_json_field("n=five").is_err());
    }

    #[test]
    fn test_operation_subcommand() {
        let args = Args::try_parse_from([
            "brightid",
            "sign",
            "--name",
            "Add Membership",
            "--field",
            "id=u1",
            "--field",
            "group=g1",
            "--json-field",
            "rank=2",
            "--timestamp",
            "1000",
        ])
        .unwrap();
        match args.command {
            Command::Sign(op) => {
                assert_eq!(op.name.as_deref(), Some("Add Membership"));
                assert_eq!(op.fields.len(), 2);
                assert_eq!(op.json_fields, vec![("rank".to_string(), Value::from(2))]);
                assert_eq!(op.timestamp, Some(1000));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_backup_subcommands() {
        let args = Args::try_parse_from([
            "brightid",
            "--recovery-url",
            "http://recovery.test",
            "put-recovery",
            "k1",
            "k2",
            "--data",
            "blob",
        ])
        .unwrap();
        match &args.command {
            Command::PutRecovery { key1, key2, data } => {
                assert_eq!((key1.as_str(), key2.as_str(), data.as_str()), ("k1", "k2", "blob"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        let backup = args.client_config().unwrap().backup_api_config();
        assert_eq!(backup.recovery_url, "http://recovery.test");
        assert_eq!(backup.profile_url, "http://node.brightid.org");

        let args = Args::try_parse_from([
            "brightid", "set-sig", "--id", "u1", "--signing-key", "c2s=",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::SetSig { timestamp: None, .. }
        ));
    }

    #[test]
    fn test_ledger_ttl_override() {
        let config = parse(&["--ledger-ttl-secs", "0"]).client_config().unwrap();
        assert_eq!(config.node_api_config().ledger_ttl, Duration::ZERO);
        assert_eq!(
            ClientConfig::default().node_api_config().ledger_ttl,
            DEFAULT_LEDGER_TTL
        );
    }
}
