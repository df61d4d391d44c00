//! labsync — laboratory records with live sync.
//!
//! `serve` runs the hosted backend, `local` runs the console against an
//! in-process store, and `connect` runs the console against a remote server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use labsync_app::{console, AppController, ControllerConfig};
use labsync_collab::{AnonymousAuth, MemoryStore, RemoteStore, ServerConfig, StorageConfig, StoreConfig, SyncServer};

#[derive(Parser, Debug)]
#[command(name = "labsync")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:9090")]
        bind: String,

        /// RocksDB directory (in-memory when omitted)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Accept writes from connections that have not signed in
        #[arg(long)]
        no_auth: bool,
    },

    /// Run the console against an in-process store
    Local {
        /// RocksDB directory (in-memory when omitted)
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Run the console against a sync server
    Connect {
        /// Server URL
        #[arg(default_value = "ws://127.0.0.1:9090")]
        url: String,
    },
}

fn store_config(data: Option<PathBuf>) -> StoreConfig {
    match data {
        Some(path) => StoreConfig::persistent(StorageConfig::new(path)),
        None => StoreConfig::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, data, no_auth } => {
            let config = ServerConfig {
                bind_addr: bind,
                require_auth: !no_auth,
                store: store_config(data),
            };
            let server = SyncServer::new(config).context("failed to open the document store")?;
            info!("Starting sync server on {}", server.bind_addr());
            server.run().await.context("sync server stopped")?;
        }

        Commands::Local { data } => {
            let store = Arc::new(MemoryStore::open(store_config(data)).context("failed to open the document store")?);
            let controller = AppController::new(store, Arc::new(AnonymousAuth::new()), ControllerConfig::default());
            // A failed start is shown in the banner; the console still runs.
            let _ = controller.start().await;
            console::run(&controller).await?;
        }

        Commands::Connect { url } => {
            let remote = Arc::new(
                RemoteStore::connect(&url)
                    .await
                    .with_context(|| format!("failed to connect to {url}"))?,
            );
            let controller = AppController::new(remote.clone(), remote, ControllerConfig::default());
            let _ = controller.start().await;
            console::run(&controller).await?;
        }
    }

    Ok(())
}
