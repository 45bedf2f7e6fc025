mod cli;
mod commands;
mod config;
mod storage;

use crate::cli::{Command, ConfigCommand, KeyCommand};
use clap::Parser;
use color_eyre::Result;
use credvault_core::storage::KvStore;
use credvault_storage::{envelope::EnvelopeCodec, key_provider::generate_secret};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let mut out = std::io::stdout();
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Key(KeyCommand::Generate) => println!("{}", generate_secret()),
        Command::Health => run_health_check(&config).await?,
        Command::App(cmd) => {
            let repo = storage::repository_from_config(&config).await?;
            commands::handle_app(cmd, &repo, &mut out).await?
        }
        Command::Token(cmd) => {
            let repo = storage::repository_from_config(&config).await?;
            let now_ms = chrono::Utc::now().timestamp_millis();
            commands::handle_token(cmd, &repo, now_ms, &mut out).await?
        }
        Command::Selection(cmd) => {
            let repo = storage::repository_from_config(&config).await?;
            commands::handle_selection(cmd, &repo, &mut out).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info. Logs go to stderr to keep stdout scriptable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("credvault {}", env!("CARGO_PKG_VERSION"));
}

/// Verifies key material, the envelope codec and the record store.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let keys = storage::load_keys(storage::key_provider(config).as_ref()).await?;
    let codec = EnvelopeCodec::new(keys);
    run_codec_health(&codec)?;
    println!("Keys: ok (active key id {})", codec.active_key_id());

    let store = storage::store_from_config(config)?;
    run_store_health(&store).await?;
    println!("Storage: ok");
    Ok(())
}

fn run_codec_health(codec: &EnvelopeCodec) -> Result<()> {
    let sample = json!({"health": "ok"});
    let envelope = codec
        .encrypt(&sample)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let opened: serde_json::Value = codec
        .decrypt(&envelope)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    if opened != sample {
        color_eyre::eyre::bail!("envelope round-trip failed");
    }
    Ok(())
}

async fn run_store_health<S: KvStore>(store: &S) -> Result<()> {
    let health_key = "health:check";
    let payload = json!("ok");
    store
        .set_with_ttl(health_key, payload.clone(), 60)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = store
        .get(health_key)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    store
        .delete(health_key)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if round_trip != Some(payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use credvault_storage::{
        file_store::FileKvStore,
        key_provider::{KeyMaterial, KeyRing},
    };

    use super::*;

    #[tokio::test]
    async fn health_check_with_temp_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKvStore::new(dir.path());
        run_store_health(&store)
            .await
            .expect("health check should succeed");
    }

    #[test]
    fn codec_health_succeeds_with_valid_key() {
        let ring = KeyRing::new(KeyMaterial::derive("v1", "health-check-secret").expect("derive"));
        run_codec_health(&EnvelopeCodec::new(Arc::new(ring))).expect("codec health");
    }
}
