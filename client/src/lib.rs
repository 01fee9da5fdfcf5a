//! Sealroom - Core library
//!
//! End-to-end encryption core for two-member chat rooms relayed over an
//! untrusted real-time channel: identity keys, room key exchange, auth key
//! derivation and per-message protection. The transport itself stays with the
//! caller; the orchestrator only turns relay events into actions.

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod state;

use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_tracing(default_filter: &str) -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to initialise logging: {}", e)))
}

/// Run the client bootstrap
///
/// Loads configuration, opens the key store and makes sure the local user has
/// an identity key pair. Returns the base64 public key for directory publication.
pub async fn run() -> AppResult<String> {
    let config = ClientConfig::from_env()?;
    init_tracing(&config.log_filter)?;

    tracing::info!("Starting Sealroom for {}", config.user_id);

    let state = state::create_shared_state(config).await?;
    let public = state.identity.ensure_identity(&state.config.user_id).await?;

    tracing::info!("Identity ready for {}", state.config.user_id);
    Ok(public.to_base64()?)
}
