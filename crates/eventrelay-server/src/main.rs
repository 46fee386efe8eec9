//! EventRelay server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage, HS256 tokens (development)
//! eventrelay-server --bind 0.0.0.0:8080 --jwt-secret dev-secret
//!
//! # Durable storage, RS256 ID tokens from an identity provider
//! eventrelay-server --db relay.redb --jwt-public-key signer.pem \
//!     --jwt-issuer https://securetoken.google.com/my-project --jwt-audience my-project
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use eventrelay_server::{
    JwtConfig, JwtVerifier, MemoryStorage, RedbStorage, Server, ServerError, ServerRuntimeConfig,
    SessionConfig, Storage, TokenVerifier,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// EventRelay chat relay server
#[derive(Parser, Debug)]
#[command(name = "eventrelay-server")]
#[command(about = "Room-scoped chat relay over WebSocket")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Path to the message database (in-memory when omitted)
    #[arg(long)]
    db: Option<PathBuf>,

    /// HS256 shared secret for identity tokens
    #[arg(long, env = "EVENTRELAY_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// RS256 public key (PEM) for identity tokens
    #[arg(long, conflicts_with = "jwt_secret")]
    jwt_public_key: Option<PathBuf>,

    /// Required token issuer
    #[arg(long)]
    jwt_issuer: Option<String>,

    /// Required token audience
    #[arg(long)]
    jwt_audience: Option<String>,

    /// Messages that may wait for a slow client before deliveries are dropped
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Largest accepted inbound frame, in bytes
    #[arg(long, default_value = "65536")]
    max_frame_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("EventRelay server starting");

    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(jwt_config(&args)?)?);

    let config = ServerRuntimeConfig {
        bind_address: args.bind.clone(),
        session: SessionConfig {
            outbound_capacity: args.outbound_capacity,
            max_frame_bytes: args.max_frame_bytes,
        },
    };

    match &args.db {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using redb storage");
            serve(config, verifier, RedbStorage::open(path)?).await?;
        },
        None => {
            tracing::warn!("No --db given, messages are kept in memory only");
            serve(config, verifier, MemoryStorage::new()).await?;
        },
    }

    Ok(())
}

fn jwt_config(args: &Args) -> Result<JwtConfig, ServerError> {
    let mut config = match (&args.jwt_secret, &args.jwt_public_key) {
        (Some(secret), None) => JwtConfig::hs256(secret.as_bytes()),
        (None, Some(path)) => JwtConfig::rs256_pem_file(path)?,
        _ => {
            return Err(ServerError::Config(
                "exactly one of --jwt-secret or --jwt-public-key is required".to_string(),
            ));
        },
    };

    if let Some(issuer) = &args.jwt_issuer {
        config = config.with_issuer(issuer);
    }
    if let Some(audience) = &args.jwt_audience {
        config = config.with_audience(audience);
    }

    Ok(config)
}

async fn serve<S: Storage>(
    config: ServerRuntimeConfig,
    verifier: Arc<dyn TokenVerifier>,
    storage: S,
) -> Result<(), ServerError> {
    let server = Server::bind(config, verifier, storage).await?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown requested");
        shutdown.cancel();
    });

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await
}
