//! brightid - command-line client for the BrightID network

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use brightid_client::{
    config::{Args, ClientConfig, Command, OperationArgs},
    keychain::{FileKeychain, Keychain, MemoryKeychain},
    migration::Migrator,
    ops::{Ed25519Signer, OperationSigner},
    state::MemoryStateStore,
    storage::SqliteStorage,
    sign_operation, BackupApi, NodeApi, OperationIntent, OperationKey, OperationName,
    SignedOperation,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(2);
    }
    let config = args.client_config()?;
    let keychain = open_keychain(&args, &config)?;

    match args.command.clone() {
        Command::Keygen { username } => {
            let signer = Ed25519Signer::generate();
            let username = username.unwrap_or_else(|| signer.user_id());
            keychain.save(&username, &signer.secret_key_b64()).await?;
            if config.paths.keychain.is_none() {
                warn!("No KEYCHAIN_PATH configured; the secret key is not persisted");
            }
            print_json(&json!({
                "username": username,
                "publicKey": signer.public_key(),
                "id": signer.user_id(),
            }))?;
        }

        Command::Sign(op) => {
            let record = sign_from_args(&op, keychain.as_ref()).await?;
            print_json(&record)?;
        }

        Command::Submit { op, file } => {
            let record = match file {
                Some(path) => read_record(&path)?,
                None => sign_from_args(&op, keychain.as_ref()).await?,
            };
            let api = NodeApi::new(config.node_api_config())?;
            info!(key = %record.key(), node = %config.node.url, "Submitting operation");

            let response = api.submit(&record).await?;
            print_json(&response)?;
            if !response.success {
                std::process::exit(1);
            }
        }

        Command::Verify { file, public_key } => {
            let record = read_record(&file)?;
            let valid = record.verify(&public_key)?;
            print_json(&json!({ "key": record.key(), "valid": valid }))?;
            if !valid {
                std::process::exit(1);
            }
        }

        Command::Status { key } => {
            let api = NodeApi::new(config.node_api_config())?;
            let state = api.get_operation_state(&OperationKey::from_encoded(key)).await?;
            print_json(&state)?;
        }

        Command::Migrate { storage } => {
            let path = storage
                .or_else(|| config.paths.storage.clone())
                .context("no legacy storage given; pass --storage or set STORAGE_PATH")?;
            let storage = Arc::new(SqliteStorage::open(&path)?);
            let state = Arc::new(MemoryStateStore::new());

            let report = Migrator::new(storage, keychain, state).run().await?;
            print_json(&report)?;
            if !report.all_verified() {
                std::process::exit(1);
            }
        }

        Command::GetRecovery { key1, key2 } => {
            let api = BackupApi::new(config.backup_api_config())?;
            print_json(&api.get_recovery(&key1, &key2).await?)?;
        }

        Command::PutRecovery { key1, key2, data } => {
            let api = BackupApi::new(config.backup_api_config())?;
            api.put_recovery(&key1, &key2, &data).await?;
            info!(url = %config.recovery.url, "Recovery backup stored");
        }

        Command::GetSig { public_key } => {
            let api = BackupApi::new(config.backup_api_config())?;
            print_json(&api.get_sig(&public_key).await?)?;
        }

        Command::SetSig { id, signing_key, timestamp } => {
            let api = BackupApi::new(config.backup_api_config())?;
            let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            api.set_sig(&id, timestamp, &signing_key, keychain.as_ref()).await?;
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("brightid_client={log_level},brightid={log_level},info").into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn open_keychain(args: &Args, config: &ClientConfig) -> anyhow::Result<Arc<dyn Keychain>> {
    match &config.paths.keychain {
        Some(path) => {
            let password = args
                .keychain_password
                .clone()
                .context("KEYCHAIN_PASSWORD is required when KEYCHAIN_PATH is set")?;
            Ok(Arc::new(FileKeychain::new(path.clone(), password)))
        }
        None => Ok(Arc::new(MemoryKeychain::new())),
    }
}

fn build_intent(op: &OperationArgs) -> anyhow::Result<OperationIntent> {
    let name: OperationName = op
        .name
        .as_deref()
        .context("--name is required to sign an operation")?
        .parse()?;

    let mut intent = match op.timestamp {
        Some(timestamp) => OperationIntent::new(name, timestamp),
        None => OperationIntent::now(name),
    };
    for (key, value) in op.fields.iter().chain(&op.json_fields) {
        intent = intent.with(key, value.clone());
    }
    Ok(intent)
}

async fn sign_from_args(op: &OperationArgs, keychain: &dyn Keychain) -> anyhow::Result<SignedOperation> {
    let signer = Ed25519Signer::from_keychain(keychain).await?;
    Ok(sign_operation(build_intent(op)?, &signer)?)
}

fn read_record(path: &Path) -> anyhow::Result<SignedOperation> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing signed record {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
