use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use shield_core::{credentials, KeyHolder, SecureStore, StorePaths};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod manage;
mod server;

#[derive(Parser, Debug)]
#[command(author, version, about = "ReplayShield anti-replay authentication service", long_about = None)]
struct Cli {
    /// Root all state files under this directory instead of the system
    /// layout (/etc, /var/lib, /dev/shm)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the salt and an empty encrypted store
    Init {
        /// Overwrite an existing store, discarding all its data
        #[arg(long)]
        force: bool,
    },
    /// Interactive administration console
    Manage,
    /// Run the authentication endpoint
    Serve {
        #[arg(long, default_value_t = 4444)]
        port: u16,
        /// Address to listen on; keep this on loopback unless the oracle
        /// really must be reachable from elsewhere
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        bind: IpAddr,
    },
    /// Cache the derived admin key for one headless `serve` start
    Password,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = match &cli.root {
        Some(root) => StorePaths::under(root),
        None => StorePaths::system(),
    };
    bootstrap::prepare(&paths)?;
    let store = SecureStore::new(paths);

    match cli.command {
        Commands::Init { force } => init_command(&store, force),
        Commands::Manage => manage::run(&store),
        Commands::Serve { port, bind } => serve_command(store, bind, port).await,
        Commands::Password => password_command(&store),
    }
}

fn init_command(store: &SecureStore, force: bool) -> Result<()> {
    if store.paths().encrypted_store.exists() && !force {
        return Err(anyhow!(
            "store already exists at {}; pass --force to overwrite and discard it",
            store.paths().encrypted_store.display()
        ));
    }
    if force && store.paths().encrypted_store.exists() {
        let confirm = manage::read_line("Type DESTROY to overwrite the existing store: ")?;
        if confirm != "DESTROY" {
            println!("Cancelled.");
            return Ok(());
        }
    }
    let password = prompt_password_twice("Create admin password: ")?;
    credentials::initialize(store, &password, force)?;
    println!(
        "Initialized encrypted store at {}",
        store.paths().encrypted_store.display()
    );
    Ok(())
}

async fn serve_command(store: SecureStore, bind: IpAddr, port: u16) -> Result<()> {
    let key = match server::consume_cached_key(store.paths())? {
        Some(key) => {
            info!("using cached admin key");
            key
        }
        None => {
            let password = prompt_password_once("Admin password: ")?;
            credentials::verify(&store, &password)?
        }
    };

    let holder = Arc::new(KeyHolder::new());
    holder.set(key);
    server::serve(bind, port, Arc::new(store), holder).await
}

fn password_command(store: &SecureStore) -> Result<()> {
    let password = prompt_password_once("Admin password: ")?;
    let key = credentials::verify(store, &password)?;
    let path = server::cache_key(store.paths(), &key)?;
    println!(
        "Admin key cached at {}; the next `serve` consumes it",
        path.display()
    );
    Ok(())
}

pub(crate) fn prompt_password_once(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var("REPLAYSHIELD_ADMIN_PASSWORD") {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    if pw.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    Ok(pw)
}

fn prompt_password_twice(prompt: &str) -> Result<String> {
    let first = prompt_password_once(prompt)?;
    if std::env::var("REPLAYSHIELD_ADMIN_PASSWORD").is_ok_and(|pw| pw == first) {
        return Ok(first);
    }
    let second =
        rpassword::prompt_password("Confirm password: ").map_err(|e| anyhow!("password prompt: {e}"))?;
    if first != second {
        return Err(anyhow!("passwords do not match"));
    }
    Ok(first)
}
