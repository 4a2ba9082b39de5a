use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{fmt, EnvFilter};

use codedrop_core::{Client, ReceivedFile, ServiceConfig, TransferService};
use storage::{LocalStorage, MemoryStorage, Storage};

#[derive(Parser, Debug)]
#[command(name = "codedrop", version, about = "CodeDrop file hand-off")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Data directory for config and persisted records
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Service address (host:port), defaults to the configured local port
    #[arg(long, global = true)]
    server: Option<String>,

    /// Act as this user ("First Last")
    #[arg(long = "as", global = true)]
    user: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file into the data directory
    Init {
        /// Port the service listens on
        #[arg(long, default_value_t = 7878)]
        port: u16,

        /// Public base URL used in share links
        #[arg(long)]
        public_url: Option<String>,
    },

    /// Run the service
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(long)]
        port: Option<u16>,

        /// Keep users, inboxes and friends in memory only
        #[arg(long)]
        memory: bool,
    },

    /// Register a new user
    Register {
        first_name: String,
        last_name: String,
    },

    /// Check that a user is registered and print the identity to use with --as
    Login {
        first_name: String,
        last_name: String,
    },

    /// Send a file, by code or to a friend's inbox
    Send {
        /// File to send
        file: PathBuf,

        /// Friend to deliver to (requires --as); omit to get a pickup code
        #[arg(long)]
        to: Option<String>,
    },

    /// Pick up a file by code
    Receive {
        code: String,

        /// Output directory for the received file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show whether a code has been picked up
    Status {
        code: String,

        /// Keep polling for up to this many seconds
        #[arg(long, default_value_t = 0)]
        wait: u64,
    },

    /// List your inbox
    Inbox,

    /// Download an inbox item
    Fetch {
        id: String,

        /// Output directory for the received file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show friends and pending requests
    Friends,

    /// Send a friend request
    Request { name: String },

    /// Accept a friend request
    Accept { name: String },

    /// Reject a friend request
    Reject { name: String },

    /// Search registered users by name
    Search {
        query: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    // Determine data directory
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codedrop")
    });

    match cli.cmd {
        Commands::Init { port, public_url } => {
            let mut cfg = ServiceConfig::default().with_data_dir(data_dir.clone());
            cfg.listen_port = port;
            cfg.public_base_url = public_url.unwrap_or_else(|| format!("http://localhost:{}", port));
            cfg.validate()?;
            cfg.ensure_data_dir()?;

            let cfg_path = data_dir.join("config.json");
            let cfg_json = serde_json::to_string_pretty(&cfg)?;
            std::fs::write(&cfg_path, cfg_json)?;

            println!("✓ Initialized");
            println!("  Config: {}", cfg_path.display());
            println!("  Port: {}", cfg.listen_port);
            println!("  Share links: {}", cfg.public_base_url);
        }

        Commands::Serve { port, memory } => {
            let mut cfg = load_config(&data_dir)?;
            if let Some(port) = port {
                cfg.listen_port = port;
            }

            if memory {
                let service = TransferService::new(MemoryStorage::new(), cfg);
                serve(Arc::new(service)).await?;
            } else {
                cfg.ensure_data_dir()?;
                let storage = LocalStorage::new(cfg.data_dir.clone())?;
                let service = TransferService::new(storage, cfg);
                serve(Arc::new(service)).await?;
            }
        }

        cmd => {
            let cfg = load_config(&data_dir)?;
            let addr = cli
                .server
                .clone()
                .unwrap_or_else(|| format!("127.0.0.1:{}", cfg.listen_port));
            let stream = TcpStream::connect(&addr)
                .await
                .with_context(|| format!("Failed to connect to service at {}", addr))?;
            let mut client = Client::new(stream);

            run_client_command(&mut client, cmd, cli.user.as_deref()).await?;
        }
    }

    Ok(())
}

fn load_config(data_dir: &Path) -> Result<ServiceConfig> {
    let cfg_path = data_dir.join("config.json");
    if !cfg_path.exists() {
        tracing::debug!("No config at {}, using defaults", cfg_path.display());
        return Ok(ServiceConfig::default().with_data_dir(data_dir.to_path_buf()));
    }

    let cfg_json = std::fs::read_to_string(&cfg_path)?;
    let cfg: ServiceConfig = serde_json::from_str(&cfg_json)
        .with_context(|| format!("Invalid config file {}", cfg_path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn require_user(user: Option<&str>) -> Result<&str> {
    user.ok_or_else(|| anyhow::anyhow!("This command needs --as \"First Last\""))
}

async fn serve<S>(service: Arc<TransferService<S>>) -> Result<()>
where
    S: Storage + 'static,
{
    let addr = format!("0.0.0.0:{}", service.config().listen_port);
    let listener = TcpListener::bind(&addr).await?;

    println!("✓ Listening on {}", addr);
    println!("  Share links: {}", service.config().public_base_url);
    println!("  Press Ctrl+C to stop");

    loop {
        let (mut stream, peer_addr) = listener.accept().await?;
        tracing::debug!("Incoming connection from {}", peer_addr);

        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = codedrop_core::session::serve_connection(service.as_ref(), &mut stream).await {
                tracing::error!("Connection from {} failed: {}", peer_addr, e);
            }
        });
    }
}

async fn run_client_command(
    client: &mut Client<TcpStream>,
    cmd: Commands,
    user: Option<&str>,
) -> Result<()> {
    match cmd {
        Commands::Register { first_name, last_name } => {
            let name = client.register(&first_name, &last_name).await?;
            println!("✓ Registered {}", name);
            println!("  Use --as \"{}\" for inbox and friend commands", name);
        }

        Commands::Login { first_name, last_name } => {
            let name = client.login(&first_name, &last_name).await?;
            println!("✓ Welcome back, {}", name);
            println!("  Use --as \"{}\" for inbox and friend commands", name);
        }

        Commands::Send { file, to } => {
            let payload = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Not a file: {}", file.display()))?
                .to_string();

            match to {
                Some(recipient) => {
                    let sender = require_user(user)?;
                    let id = client.send_to_friend(sender, &recipient, &filename, payload).await?;
                    println!("✓ Sent {} to {} (item {})", filename, recipient, id);
                }
                None => {
                    let size = payload.len();
                    let (code, share_url) = client.send_anonymous(&filename, payload).await?;
                    println!("✓ {} ({} bytes) is ready for pickup", filename, size);
                    println!("  Code: {}", code);
                    println!("  Link: {}", share_url);
                }
            }
        }

        Commands::Receive { code, output } => {
            let file = client.fetch_by_code(&code).await?;
            save_received(&file, output)?;
        }

        Commands::Status { code, wait } => {
            let mut downloaded = client.download_status(&code).await?;
            let mut waited = 0;
            while !downloaded && waited < wait {
                tokio::time::sleep(Duration::from_secs(1)).await;
                waited += 1;
                downloaded = client.download_status(&code).await?;
            }

            if downloaded {
                println!("✓ Code {} has been picked up", code);
            } else {
                println!("  Code {} has not been picked up", code);
            }
        }

        Commands::Inbox => {
            let user = require_user(user)?;
            let items = client.list_inbox(user).await?;
            println!("Inbox of {}: {} file(s)", user, items.len());
            for item in items {
                println!("  [{}] {} ({} bytes) from {}", item.id, item.filename, item.size, item.sender);
            }
        }

        Commands::Fetch { id, output } => {
            let user = require_user(user)?;
            let file = client.fetch_inbox_item(user, &id).await?;
            save_received(&file, output)?;
        }

        Commands::Friends => {
            let user = require_user(user)?;
            let edges = client.list_friends(user).await?;
            println!("Friends of {}:", user);
            for name in &edges.friends {
                println!("  - {}", name);
            }
            println!("Requests received:");
            for name in &edges.requests_received {
                println!("  - {}", name);
            }
            println!("Requests sent:");
            for name in &edges.requests_sent {
                println!("  - {}", name);
            }
        }

        Commands::Request { name } => {
            client.send_friend_request(require_user(user)?, &name).await?;
            println!("✓ Friend request sent to {}", name);
        }

        Commands::Accept { name } => {
            client.accept_friend_request(require_user(user)?, &name).await?;
            println!("✓ You and {} are now friends", name);
        }

        Commands::Reject { name } => {
            client.reject_friend_request(require_user(user)?, &name).await?;
            println!("✓ Rejected request from {}", name);
        }

        Commands::Search { query, json } => {
            let hits = client.search_users(require_user(user)?, &query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                println!("Found {} user(s):", hits.len());
                for hit in hits {
                    println!("  {} ({:?})", hit.name, hit.status);
                }
            }
        }

        Commands::Init { .. } | Commands::Serve { .. } => {
            anyhow::bail!("init and serve do not talk to a running service");
        }
    }

    Ok(())
}

/// Write a received file into `output` (default: current directory) and
/// print its digest.
fn save_received(file: &ReceivedFile, output: Option<PathBuf>) -> Result<PathBuf> {
    let output_dir = match output {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    // Never let a sender-chosen name escape the output directory
    let name = Path::new(&file.filename)
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid filename: {:?}", file.filename))?;
    let output_path = output_dir.join(name);

    std::fs::write(&output_path, &file.payload)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!("✓ File received: {}", output_path.display());
    if let Some(sender) = &file.sender {
        println!("  From: {}", sender);
    }
    println!("  {} bytes, sha256 {}", file.payload.len(), payload_digest(&file.payload));
    Ok(output_path)
}

fn payload_digest(payload: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
