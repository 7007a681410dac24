//! QuantumGate developer CLI.
//!
//! A thin driver over [`quantumgate_net::PeerManager`]: generate an
//! identity, listen for inbound peers, or dial an outbound one, and watch
//! the handshake progress through [`quantumgate_core::Status`].

mod config;
mod progress;

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand_core::OsRng;
use socket2::Socket as Socket2;

use config::Config;
use progress::HandshakeProgress;
use quantumgate_core::Status;
use quantumgate_crypto::signatures::SigningKey;
use quantumgate_net::PeerManager;
use quantumgate_transport::{AnySocket, TcpSocket};

/// Developer CLI for running a QuantumGate node.
#[derive(Parser)]
#[command(name = "quantumgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new Ed25519 identity keypair.
    Keygen {
        /// Output file for the private key (defaults to the configured
        /// identity file).
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Listen for inbound peers and run the handshake to completion for
    /// each one.
    Listen {
        /// Override the configured listen address.
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Dial an outbound peer and run the handshake to completion.
    Connect {
        /// Address to connect to.
        #[arg(required = true)]
        addr: String,
    },

    /// Print the effective configuration.
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_env_filter(if cli.verbose { "debug" } else { "info" }).init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Keygen { output } => generate_keypair(output, &config),
        Commands::Listen { bind } => listen(bind, &config),
        Commands::Connect { addr } => connect(&addr, &config),
        Commands::Status => show_status(&config),
    }
}

/// Load the configured identity, generating and persisting a fresh one if
/// the identity file does not yet exist.
fn load_or_generate_identity(config: &Config) -> anyhow::Result<SigningKey> {
    let path = &config.node.identity_file;
    if path.exists() {
        let bytes = std::fs::read(path)?;
        let array: [u8; 32] =
            bytes.as_slice().try_into().map_err(|_| anyhow::anyhow!("identity file {path:?} is not 32 bytes"))?;
        Ok(SigningKey::from_bytes(&array))
    } else {
        let key = SigningKey::generate(&mut OsRng);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, key.to_bytes())?;
        tracing::info!(path = %path.display(), "generated new identity");
        Ok(key)
    }
}

fn generate_keypair(output: Option<String>, config: &Config) -> anyhow::Result<()> {
    let path = output.map(PathBuf::from).unwrap_or_else(|| config.node.identity_file.clone());

    let key = SigningKey::generate(&mut OsRng);
    let verifying_key = key.verifying_key();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, key.to_bytes())?;

    println!("Public key:  {}", hex::encode(verifying_key.to_bytes()));
    println!("Private key: {}", path.display());
    Ok(())
}

fn show_status(config: &Config) -> anyhow::Result<()> {
    println!("QuantumGate node configuration");
    println!("  Listen address:  {}", config.node.listen_addr);
    println!("  Identity file:   {}", config.node.identity_file.display());
    println!("  Log level:       {}", config.logging.level);
    println!(
        "  Thread pools:    {} x {} workers",
        config.settings.local.concurrency.min_thread_pools, config.settings.local.concurrency.min_threads_per_pool
    );
    println!(
        "  Handshake algos: hash={:?} primary={:?} secondary={:?} symmetric={:?}",
        config.settings.local.supported_algorithms.hash,
        config.settings.local.supported_algorithms.primary_asymmetric,
        config.settings.local.supported_algorithms.secondary_asymmetric,
        config.settings.local.supported_algorithms.symmetric
    );
    Ok(())
}

fn listen(bind_override: Option<String>, config: &Config) -> anyhow::Result<()> {
    let identity = load_or_generate_identity(config)?;
    let bind_addr: SocketAddr = match bind_override {
        Some(addr) => addr.parse()?,
        None => config.parse_listen_addr()?,
    };

    let manager = PeerManager::new(config.settings.clone(), identity, Vec::new());
    let listener = StdTcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;
    let listener = Socket2::from(listener);

    println!("Listening on {bind_addr}");
    loop {
        match listener.accept() {
            Ok((socket, addr)) => {
                let Some(peer_addr) = addr.as_socket() else {
                    tracing::warn!("accepted connection with no socket address, dropping");
                    continue;
                };
                let tcp = TcpSocket::from_accepted(socket, peer_addr);
                match manager.admit_inbound(AnySocket::Tcp(tcp), peer_addr) {
                    Ok(luid) => tracing::info!(?luid, %peer_addr, "admitted inbound peer"),
                    Err(e) => tracing::warn!(%peer_addr, error = %e, "rejected inbound peer"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }

        print_peer_table(&manager);
        thread::sleep(Duration::from_millis(500));
    }
}

fn connect(addr: &str, config: &Config) -> anyhow::Result<()> {
    let identity = load_or_generate_identity(config)?;
    let endpoint: SocketAddr = addr.parse()?;

    let manager = PeerManager::new(config.settings.clone(), identity, Vec::new());
    let luid = manager.connect(endpoint)?;
    tracing::info!(?luid, %endpoint, "dialing peer");

    let progress = HandshakeProgress::new(addr);
    let deadline = std::time::Instant::now()
        + Duration::from_secs(config.settings.local.max_handshake_duration_secs);

    loop {
        let Some(peer) = manager.query_peers(&Default::default()).into_iter().find(|p| p.read().luid() == luid) else {
            thread::sleep(Duration::from_millis(50));
            continue;
        };
        let status = peer.read().status();
        progress.update(addr, status);

        match status {
            Status::Ready => {
                progress.finish_ready(addr);
                break;
            }
            Status::Disconnected => {
                progress.finish_disconnected(addr, "handshake aborted");
                break;
            }
            _ if std::time::Instant::now() > deadline => {
                progress.finish_disconnected(addr, "timed out");
                break;
            }
            _ => thread::sleep(Duration::from_millis(50)),
        }
    }

    manager.shutdown();
    Ok(())
}

fn print_peer_table(manager: &PeerManager) {
    let peers = manager.query_peers(&Default::default());
    println!("-- {} peer(s), {} tracked --", peers.len(), manager.peer_count());
    for peer in &peers {
        let peer = peer.read();
        println!(
            "  {:?}  {:<12?}  endpoint={:?}  authenticated={}",
            peer.luid(),
            peer.status(),
            peer.endpoint(),
            peer.is_authenticated()
        );
    }
}
