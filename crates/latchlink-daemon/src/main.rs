// ============================================
// File: crates/latchlink-daemon/src/main.rs
// ============================================
//! # latchlink Entry Point
//!
//! ## Creation Reason
//! Command line front end: register this controller with the cloud,
//! find the lock, keep a session open, and send one-shot commands.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading
//! - Registration against the cloud identity service
//! - Long-running session with observation output
//!
//! ## Usage
//! ```bash
//! # Step 1: Register (access token from the vendor account)
//! latchlink register --token <ACCESS_TOKEN>
//!
//! # Step 2: Keep a session open and print activity
//! latchlink run
//!
//! # One-shot commands
//! latchlink lock
//! latchlink unlock --pull
//! latchlink status
//!
//! # Share this host's Bluetooth adapter (build with --features ble)
//! latchlink proxy --listen 0.0.0.0:7600
//!
//! # No hardware: simulated cloud and lock
//! latchlink simulate
//! latchlink simulate --serve 127.0.0.1:7878   # as a radio proxy
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Direct mode and `proxy` need the `ble` feature; builds without it
//!   default to proxy mode
//! - The credential file holds the private key; it is written 0600
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use latchlink_common::time::{Clock, SystemClock, Timestamp};
use latchlink_daemon::config::TransportMode;
use latchlink_daemon::simulator::SimulatedSite;
use latchlink_daemon::{
    ActivityResolver, CloudService, ConnectionState, CredentialStore, DaemonConfig, HttpCloud,
    LifecycleConfig, LockHandle, LockSetup, Observation,
};
use latchlink_transport::{ProxyRadio, ProxyServer, RadioTransport, ScanFilter};

const DEFAULT_CONFIG: &str = "/etc/latchlink/latchlink.toml";

// ============================================
// CLI Definition
// ============================================

/// latchlink smart lock controller
///
/// Quick Start:
///   1. Put the lock serial and device id in the config file
///   2. Run: latchlink register --token <ACCESS_TOKEN>
///   3. Run: latchlink run
#[derive(Parser, Debug)]
#[command(name = "latchlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register this controller with the cloud
    ///
    /// Generates a key pair and obtains a certificate for the configured
    /// lock. Replaces any existing registration.
    Register {
        /// Personal access token with device scopes
        #[arg(short, long)]
        token: String,

        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Remove this controller from the cloud and delete the credential
    Unregister {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// List locks on the account
    Locks {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Scan for advertising locks
    Scan {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Show every advertiser, not just the configured lock
        #[arg(long)]
        all: bool,
    },

    /// Keep a session open and print observations until Ctrl+C
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Show lock state
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Lock
    Lock {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Unlock
    Unlock {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Also pull the latch once unlocked
        #[arg(long)]
        pull: bool,
    },

    /// Pull the latch spring
    Pull {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Refresh and print the known users
    Users {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Show the registered public key (for troubleshooting)
    #[command(hide = true)]
    Pubkey {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Output format: base64, hex (default)
        #[arg(long, default_value = "hex")]
        format: String,
    },

    /// Serve this host's Bluetooth adapter to proxy-mode controllers
    Proxy {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:7600")]
        listen: SocketAddr,
    },

    /// Run against a simulated cloud and lock
    Simulate {
        /// Serve the simulated radio as a proxy on this address
        #[arg(long)]
        serve: Option<SocketAddr>,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging("info");

    let result = match cli.command {
        Commands::Register { token, config } => cmd_register(token, config).await,
        Commands::Unregister { config } => cmd_unregister(config).await,
        Commands::Locks { config } => cmd_locks(config).await,
        Commands::Scan { config, all } => cmd_scan(config, all).await,
        Commands::Run { config } => cmd_run(config).await,
        Commands::Status { config, json } => cmd_status(config, json).await,
        Commands::Lock { config } => one_shot(config, Action::Lock).await,
        Commands::Unlock { config, pull: false } => one_shot(config, Action::Unlock).await,
        Commands::Unlock { config, pull: true } => one_shot(config, Action::UnlockAndPull).await,
        Commands::Pull { config } => one_shot(config, Action::Pull).await,
        Commands::Users { config } => cmd_users(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::Pubkey { config, format } => cmd_pubkey(config, &format).await,
        Commands::Proxy { listen } => cmd_proxy(listen).await,
        Commands::Simulate { serve } => cmd_simulate(serve).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Registers this controller with the cloud.
async fn cmd_register(token: String, config_path: PathBuf) -> anyhow::Result<()> {
    println!("🚀 latchlink Registration");
    println!("════════════════════════════════════════");
    println!();

    let config = load_config(&config_path).await?;
    let device_id = config.lock.require_device_id()?;
    let store = open_store(&config).await?;

    if let Some(existing) = store.current() {
        println!("⚠️  Replacing existing registration {}", existing.mobile_id);
        println!();
    }

    println!("📡 Contacting the cloud...");
    match store.register(&token, device_id).await {
        Ok(record) => {
            println!("✅ Registration successful!");
            println!();
            println!("════════════════════════════════════════");
            println!("   Mobile ID:  {}", record.mobile_id);
            println!("   Lock:       {} ({})", config.lock.name, record.device_id);
            println!("   Key:        {}", record.identity.public_key().fingerprint());
            println!("   Expires:    {}", record.expires_at());
            println!("════════════════════════════════════════");
            println!();
            println!("🎉 Ready. Start a session with:");
            println!();
            println!("   latchlink run");
            println!();
            Ok(())
        }
        Err(e) => {
            println!("❌ Registration failed: {e}");
            println!();
            println!("Please check:");
            println!("  • Does the token carry the device scopes?");
            println!("  • Is lock.device_id correct? (latchlink locks)");
            println!("  • Is there network connectivity?");
            std::process::exit(1);
        }
    }
}

/// Removes this controller's registration.
async fn cmd_unregister(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let store = open_store(&config).await?;
    let Some(record) = store.current() else {
        println!("Not registered, nothing to remove.");
        return Ok(());
    };
    store.unregister().await?;
    println!("🗑️  Controller {} removed", record.mobile_id);
    println!("   Deleted {}", config.storage.credential_path().display());
    Ok(())
}

/// Lists locks on the account.
async fn cmd_locks(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let cloud = HttpCloud::new(&config.cloud)?;
    let locks = cloud.list_locks().await?;

    if locks.is_empty() {
        println!("No locks on this account.");
        return Ok(());
    }
    println!("{:<10} {:<18} NAME", "ID", "SERIAL");
    for lock in locks {
        println!("{:<10} {:<18} {}", lock.id, lock.serial, lock.name);
    }
    Ok(())
}

/// Prints advertisements until the scan window closes.
async fn cmd_scan(config_path: PathBuf, all: bool) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let transport = build_transport(&config).await?;
    let filter = if all {
        ScanFilter::new(config.transport.scan_timeout())
    } else {
        config.scan_filter()?
    };

    println!("📡 Scanning for {}s via {}...", filter.timeout.as_secs(), transport.kind());
    let mut scan = transport.scan(filter).await?;
    let mut found = 0usize;
    while let Some(advert) = scan.next().await {
        found += 1;
        println!(
            "   {}  {:>4} dBm  {}",
            advert.address,
            advert.rssi,
            advert.name.as_deref().unwrap_or("-")
        );
    }
    if found == 0 {
        println!("❌ Nothing found");
    }
    Ok(())
}

/// Keeps the session open and prints observations.
async fn cmd_run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    init_logging(&config.logging.level);

    let handle = build_handle(&config).await?;
    info!("════════════════════════════════════════");
    info!("Lock:       {}", config.lock.name);
    info!("Transport:  {:?}", config.transport.mode);
    info!("════════════════════════════════════════");

    let mut observations = handle.subscribe();
    handle.start().await.context("lock not found")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            observation = observations.recv() => match observation {
                Ok(observation) => print_observation(&observation),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Observer lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.close().await;
    info!("Session closed");
    Ok(())
}

/// Connects, refreshes state and prints it.
async fn cmd_status(config_path: PathBuf, json: bool) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let handle = connected_handle(&config).await?;
    let result = handle.status().await;
    handle.close().await;
    let snapshot = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let show = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    println!();
    println!("{} Status", config.lock.name);
    println!("════════════════════════════════════════");
    println!("   State:      {}", show(snapshot.lock_state.map(|s| s.to_string())));
    println!("   Jammed:     {}", if snapshot.jammed { "⚠️  yes" } else { "no" });
    println!("   Door:       {}", show(snapshot.door_state.map(|d| d.to_string())));
    println!(
        "   Battery:    {}{}",
        show(snapshot.battery_level.map(|l| format!("{l}%"))),
        if snapshot.battery_charging == Some(true) { " (charging)" } else { "" }
    );
    println!("   Last user:  {}", show(snapshot.last_user));
    println!("════════════════════════════════════════");
    Ok(())
}

/// Actuation run by a one-shot command.
#[derive(Debug, Clone, Copy)]
enum Action {
    Lock,
    Unlock,
    UnlockAndPull,
    Pull,
}

/// Connects, runs one actuation and closes.
async fn one_shot(config_path: PathBuf, action: Action) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let handle = connected_handle(&config).await?;
    let result = match action {
        Action::Lock => handle.lock().await,
        Action::Unlock => handle.unlock().await,
        Action::UnlockAndPull => handle.unlock_and_pull().await,
        Action::Pull => handle.pull().await,
    };
    handle.close().await;
    result?;
    match action {
        Action::Lock => println!("🔒 Locked"),
        Action::Unlock => println!("🔓 Unlocked"),
        Action::UnlockAndPull => println!("🚪 Unlocked and pulled"),
        Action::Pull => println!("🚪 Pulled"),
    }
    Ok(())
}

/// Refreshes the user map and prints it.
async fn cmd_users(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let device_id = config.lock.require_device_id()?;
    let cloud: Arc<dyn CloudService> = Arc::new(HttpCloud::new(&config.cloud)?);
    let resolver =
        ActivityResolver::load(cloud, Arc::new(SystemClock), device_id, config.storage.users_path())
            .await;
    let count = resolver.refresh().await?;

    println!("{count} users");
    for (actor, name) in resolver.snapshot().entries() {
        println!("   {actor:>8}  {name}");
    }
    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        return Ok(());
    }

    let config = DaemonConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Lock:");
    println!("   Name:       {}", config.lock.name);
    println!("   Serial:     {}", config.lock.serial.as_deref().unwrap_or("-"));
    println!("   Address:    {}", config.lock.address.as_deref().unwrap_or("-"));
    println!(
        "   Device ID:  {}",
        config.lock.device_id.map_or_else(|| "-".to_string(), |id| id.to_string())
    );
    println!();
    println!("Transport:");
    println!("   Mode:       {:?}", config.transport.mode);
    if let Some(proxy) = &config.transport.proxy_addr {
        println!("   Proxy:      {proxy}");
    }
    println!();
    println!("Lifecycle:");
    println!("   Keep-alive: {}s", config.lifecycle.keepalive_secs);
    println!("   Grace:      {}s", config.lifecycle.grace_secs);
    println!("   Backoff:    {:?}s", config.lifecycle.backoff_secs);
    println!();
    println!("Storage:");
    println!("   Credential: {}", config.storage.credential_path().display());
    println!();
    Ok(())
}

/// Shows the registered public key.
async fn cmd_pubkey(config_path: PathBuf, format: &str) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;
    let store = open_store(&config).await?;
    let Some(record) = store.current() else {
        println!("❌ Not registered. Register first:");
        println!("   latchlink register --token <ACCESS_TOKEN>");
        std::process::exit(1);
    };
    let public_key = record.identity.public_key();
    match format {
        "base64" => println!("{public_key}"),
        _ => println!("{}", hex::encode(public_key.to_bytes())),
    }
    println!("fingerprint {}", public_key.fingerprint());
    println!("expires     {}", record.expires_at());
    Ok(())
}

/// Bridges proxy clients to the local Bluetooth adapter.
async fn cmd_proxy(listen: SocketAddr) -> anyhow::Result<()> {
    let transport = local_radio().await?;
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot bind {listen}"))?;
    println!("📡 Serving the local radio on {listen} (Ctrl+C to stop)");
    let server = ProxyServer::new(transport);
    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
    }
    Ok(())
}

/// Runs the full stack against a simulated cloud and lock.
async fn cmd_simulate(serve: Option<SocketAddr>) -> anyhow::Result<()> {
    let site = SimulatedSite::new(Timestamp::now())?;
    site.cloud.add_user(latchlink_common::types::ActorId(7), "Simulated user");
    site.lock.set_remote_actor(latchlink_common::types::ActorId(7));

    if let Some(addr) = serve {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;
        println!("📡 Serving simulated radio on {addr} (Ctrl+C to stop)");
        println!("   serial {}  device_id {}", site.serial, latchlink_daemon::simulator::SIM_DEVICE_ID);
        let server = ProxyServer::new(Arc::clone(&site.transport));
        tokio::select! {
            result = server.serve(listener) => result?,
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
        }
        return Ok(());
    }

    let (handle, _store) = site.handle(LifecycleConfig::default()).await?;
    let mut observations = handle.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(observation) = observations.recv().await {
            print_observation(&observation);
        }
    });

    handle.start().await?;
    wait_authenticated(&handle, Duration::from_secs(30)).await?;
    handle.unlock_and_pull().await?;
    handle.lock().await?;
    let snapshot = handle.status().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    handle.close().await;
    printer.abort();
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config, falling back to defaults if the file is missing.
async fn load_config(path: &Path) -> anyhow::Result<DaemonConfig> {
    if path.exists() {
        Ok(DaemonConfig::load(path).await?)
    } else {
        info!("Config file not found, using defaults");
        Ok(DaemonConfig::default())
    }
}

async fn open_store(config: &DaemonConfig) -> anyhow::Result<CredentialStore> {
    let cloud: Arc<dyn CloudService> = Arc::new(HttpCloud::new(&config.cloud)?);
    let store = CredentialStore::open(
        cloud,
        Arc::new(SystemClock),
        config.cloud.renewal_margin(),
        config.storage.credential_path(),
    )
    .await?;
    Ok(store)
}

async fn build_transport(config: &DaemonConfig) -> anyhow::Result<Arc<dyn RadioTransport>> {
    match config.transport.mode {
        TransportMode::Proxy => {
            let Some(endpoint) = config.transport.proxy_addr.clone() else {
                bail!("transport.proxy_addr is required in proxy mode");
            };
            let timeout = Duration::from_secs(config.transport.proxy_timeout_secs);
            Ok(Arc::new(ProxyRadio::new(endpoint).with_timeout(timeout)))
        }
        TransportMode::Direct => local_radio().await,
    }
}

#[cfg(feature = "ble")]
async fn local_radio() -> anyhow::Result<Arc<dyn RadioTransport>> {
    let host = latchlink_transport::BtleHost::new()
        .await
        .context("cannot open the Bluetooth adapter")?;
    Ok(Arc::new(latchlink_transport::DirectRadio::new(Arc::new(host))))
}

#[cfg(not(feature = "ble"))]
async fn local_radio() -> anyhow::Result<Arc<dyn RadioTransport>> {
    bail!(
        "this build has no Bluetooth support; rebuild with `--features ble` \
         or set transport.mode = \"proxy\""
    )
}

async fn build_handle(config: &DaemonConfig) -> anyhow::Result<LockHandle> {
    let device_id = config.lock.require_device_id()?;
    let transport = build_transport(config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = open_store(config).await?;
    if !store.is_registered() {
        println!();
        println!("❌ Not registered!");
        println!();
        println!("Run: latchlink register --token <ACCESS_TOKEN>");
        std::process::exit(1);
    }
    let store = Arc::new(store);
    let resolver = Arc::new(
        ActivityResolver::load(
            Arc::clone(store.cloud()),
            Arc::clone(&clock),
            device_id,
            config.storage.users_path(),
        )
        .await,
    );

    Ok(LockHandle::new(LockSetup {
        transport,
        store,
        resolver,
        clock,
        scan: config.scan_filter()?,
        lifecycle: config.lifecycle.clone(),
    }))
}

/// Builds a handle and waits for the first authenticated session.
async fn connected_handle(config: &DaemonConfig) -> anyhow::Result<LockHandle> {
    let handle = build_handle(config).await?;
    handle.start().await.context("lock not found")?;
    let wait = config.lifecycle.connect_timeout() + config.lifecycle.handshake_timeout();
    if let Err(e) = wait_authenticated(&handle, wait).await {
        handle.close().await;
        return Err(e);
    }
    Ok(handle)
}

async fn wait_authenticated(handle: &LockHandle, wait: Duration) -> anyhow::Result<()> {
    let mut state = handle.watch_state();
    let authenticated = state.wait_for(|s| *s == ConnectionState::Authenticated);
    let reached = tokio::time::timeout(wait, authenticated)
        .await
        .map(|r| r.map(drop));
    match reached {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => bail!("session closed before authenticating"),
        Err(_) => bail!(
            "no authenticated session after {}s (state: {})",
            wait.as_secs(),
            handle.state()
        ),
    }
}

fn print_observation(observation: &Observation) {
    match observation {
        Observation::Available => println!("✅ Available"),
        Observation::Unavailable => println!("⚠️  Unavailable"),
        Observation::Snapshot(_) => {}
        Observation::Activity(activity) => println!(
            "🔔 {:?} ({}) by {} via {}",
            activity.kind, activity.state, activity.user, activity.trigger
        ),
        Observation::PersistentError(kind, message) => println!("❌ {kind}: {message}"),
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_authenticated() {
        let site = SimulatedSite::new(Timestamp::from_secs(1_700_000_000)).unwrap();
        let (handle, _store) = site.handle(LifecycleConfig::default()).await.unwrap();

        let err = wait_authenticated(&handle, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("no authenticated session"));

        handle.start().await.unwrap();
        wait_authenticated(&handle, Duration::from_secs(5)).await.unwrap();

        handle.close().await;
        assert!(wait_authenticated(&handle, Duration::from_secs(1)).await.is_err());
    }
}
