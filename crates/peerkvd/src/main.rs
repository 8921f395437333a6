//! peerkvd — peerkv server and client daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use peerkv_core::config::PeerkvConfig;
use peerkv_core::{KeyMaterial, TrustRoot};
use peerkv_services::{server, Client, KvServer, ServerRegistry};

mod keygen;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (overrides $PEERKV_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the authoritative server
    Server {
        #[arg(long)]
        port: Option<u16>,

        /// PEM certificate presented to clients
        #[arg(long)]
        cert_path: Option<PathBuf>,

        /// PEM private key used for TLS and value signatures
        #[arg(long)]
        key_path: Option<PathBuf>,

        /// Overwrite KEY with an increasing counter once a second
        #[arg(long, value_name = "KEY")]
        tick_key: Option<String>,
    },

    /// Run a client node: peer listener plus periodic fetch loop
    Client {
        #[arg(long)]
        server_host: Option<String>,

        #[arg(long)]
        server_port: Option<u16>,

        /// PEM certificate of the server, pinned as the only trust root
        #[arg(long)]
        cert_path: Option<PathBuf>,

        /// Key to fetch each round; repeatable
        #[arg(long = "key", value_name = "KEY")]
        keys: Vec<String>,

        #[arg(long)]
        cache_timeout: Option<u64>,
    },

    /// Generate a self-signed certificate and private key (errors if either exists)
    GenKeys {
        #[arg(long)]
        cert_path: PathBuf,

        #[arg(long)]
        key_path: PathBuf,

        #[arg(long, default_value_t = 4096)]
        bits: u32,

        #[arg(long, default_value = "peerkv")]
        common_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Command::GenKeys {
        cert_path,
        key_path,
        bits,
        common_name,
    } = &args.command
    {
        return keygen::generate(cert_path, key_path, *bits, common_name);
    }

    let mut config = load_config(args.config.as_deref())?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    match args.command {
        Command::Server {
            port,
            cert_path,
            key_path,
            tick_key,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(path) = cert_path {
                config.tls.cert_path = path;
            }
            if let Some(path) = key_path {
                config.tls.key_path = path;
            }
            run_server(config, tick_key, shutdown_tx).await
        }
        Command::Client {
            server_host,
            server_port,
            cert_path,
            keys,
            cache_timeout,
        } => {
            if let Some(host) = server_host {
                config.client.server_host = host;
            }
            if let Some(port) = server_port {
                config.client.server_port = port;
            }
            if let Some(path) = cert_path {
                config.tls.cert_path = path;
            }
            if let Some(secs) = cache_timeout {
                config.client.cache_timeout_secs = secs;
            }
            if !keys.is_empty() {
                config.client.fetch_keys = keys;
            }
            run_client(config, shutdown_tx).await
        }
        Command::GenKeys { .. } => Ok(()),
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<PeerkvConfig> {
    if let Some(path) = explicit {
        let mut config = PeerkvConfig::load_file(path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        return Ok(config);
    }
    if let Err(e) = PeerkvConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    Ok(PeerkvConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PeerkvConfig::default()
    }))
}

async fn run_server(
    config: PeerkvConfig,
    tick_key: Option<String>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let keys = KeyMaterial::load(&config.tls.cert_path, &config.tls.key_path)
        .context("failed to load server key material")?;
    tracing::info!(
        cert = %config.tls.cert_path.display(),
        fingerprint = %keys.trust_root()?.fingerprint(),
        "key material loaded"
    );

    let registry = ServerRegistry::new(keys.signing_key.clone());
    server::seed(&registry, &config.server.seed)?;

    let bind = if config.server.bind.is_empty() {
        "0.0.0.0"
    } else {
        config.server.bind.as_str()
    };
    let kv_server = KvServer::bind(
        (bind, config.server.port),
        &keys,
        registry.clone(),
        config.timeouts.clone(),
    )
    .await?;

    let server_task = tokio::spawn(kv_server.run(shutdown_tx.subscribe()));

    let tick_task = tick_key.map(|key| {
        tracing::info!(key = %key, "value writer enabled");
        tokio::spawn(server::tick_loop(
            registry.clone(),
            key,
            Duration::from_secs(1),
            shutdown_tx.subscribe(),
        ))
    });

    match tick_task {
        Some(tick_task) => {
            tokio::select! {
                r = server_task => r.context("server task panicked")??,
                r = tick_task => r.context("value writer panicked")??,
            }
        }
        None => server_task.await.context("server task panicked")??,
    }

    tracing::info!(keys = registry.len(), peers = registry.peer_count(), "server stopped");
    Ok(())
}

async fn run_client(config: PeerkvConfig, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let trust_root = TrustRoot::load(&config.tls.cert_path)
        .with_context(|| format!("failed to load trust root {}", config.tls.cert_path.display()))?;
    tracing::info!(
        server = %format!("{}:{}", config.client.server_host, config.client.server_port),
        fingerprint = %trust_root.fingerprint(),
        "pinned server certificate"
    );

    let client = Client::connect(
        &config.client,
        &config.timeouts,
        trust_root,
        shutdown_tx.subscribe(),
    )
    .await?;

    if config.client.fetch_keys.is_empty() {
        tracing::warn!("no keys configured; serving peers only");
        let mut shutdown = shutdown_tx.subscribe();
        let _ = shutdown.recv().await;
        return Ok(());
    }

    client
        .fetch_loop(
            &config.client.fetch_keys,
            config.client.fetch_interval(),
            config.client.peer_refresh_every,
            shutdown_tx.subscribe(),
        )
        .await
}
