//! blobfs -- filesystem-style commands against Azure Blob Storage.
//!
//! Settings come from a YAML file, then from `AZURE_STORAGE_*`
//! environment variables. Ctrl+C cancels the running operation.

use std::path::Path;
use std::sync::Arc;

use blobfs::config::{Config, LoggingConfig};
use blobfs::{AzureBlobService, BlobFileSystem, ByteReader};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command-line arguments for blobfs.
#[derive(Parser, Debug)]
#[command(
    name = "blobfs",
    version,
    about = "Filesystem-style access to Azure Blob Storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "blobfs.example.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List directories and files under a path.
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Write a file's content to stdout.
    Cat { path: String },
    /// Upload a local file, or stdin with `-`.
    Put { source: String, path: String },
    /// Append a local file, or stdin with `-`, as one block.
    Append { source: String, path: String },
    /// Delete a file.
    Rm { path: String },
    /// Ensure a directory's container exists.
    Mkdir { path: String },
    /// Delete a container or everything under a prefix.
    Rmdir { path: String },
    /// Show a file's properties.
    Stat { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if Path::new(&cli.config).exists() {
        blobfs::config::load_config(&cli.config)?
    } else {
        Config::default()
    };
    init_tracing(&config.logging);
    blobfs::metrics::describe_metrics();
    info!("Loaded configuration from {}", cli.config);

    config.storage.apply_env_overrides()?;
    let service = AzureBlobService::connect(&config.storage)?;
    let fs: Arc<dyn BlobFileSystem> = Arc::new(service);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT, cancelling");
            on_interrupt.cancel();
        }
    });

    run(fs.as_ref(), cli.command, &cancel).await
}

async fn run(fs: &dyn BlobFileSystem, command: Command, cancel: &CancellationToken) -> anyhow::Result<()> {
    match command {
        Command::Ls { path } => {
            for dir in fs.get_directories(&path, cancel).await? {
                println!("{:>12}  {:<29}  {}/", "-", "", dir.name);
            }
            for file in fs.get_files(&path, cancel).await? {
                let modified = file
                    .last_modified
                    .map(|dt| dt.to_rfc2822())
                    .unwrap_or_default();
                println!("{:>12}  {:<29}  {}", file.size, modified, file.name);
            }
        }
        Command::Cat { path } => {
            let mut reader = fs.read_file(&path, cancel).await?;
            tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?;
        }
        Command::Put { source, path } => {
            let reader = open_source(&source).await?;
            fs.save_file(&path, reader, cancel).await?;
            info!("Uploaded {} to {}", source, path);
        }
        Command::Append { source, path } => {
            let mut data = Vec::new();
            open_source(&source).await?.read_to_end(&mut data).await?;
            fs.append_file(&path, &data, 0, data.len(), cancel).await?;
            info!("Appended {} bytes to {}", data.len(), path);
        }
        Command::Rm { path } => fs.delete_file(&path, cancel).await?,
        Command::Mkdir { path } => fs.create_directory(&path, cancel).await?,
        Command::Rmdir { path } => fs.delete_directory(&path, cancel).await?,
        Command::Stat { path } => {
            let file = fs.get_file(&path, cancel).await?;
            println!("path:          {}", file.path);
            println!("name:          {}", file.name);
            println!("size:          {}", file.size);
            println!(
                "last-modified: {}",
                file.last_modified
                    .map(|dt| dt.to_rfc2822())
                    .unwrap_or_default()
            );
            println!("blob-type:     {}", file.blob_type);
        }
    }
    Ok(())
}

async fn open_source(source: &str) -> anyhow::Result<ByteReader> {
    if source == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    Ok(Box::new(tokio::fs::File::open(source).await?))
}

/// Install the tracing subscriber. `RUST_LOG` overrides the configured
/// level. Logs go to stderr so `cat` output stays clean.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
