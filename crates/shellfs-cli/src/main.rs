//! shellfs command-line client.
//!
//! Runs one filesystem operation against a remote host and exits.
//!
//! Usage:
//!   shellfs --host build01 stat /etc/hostname
//!   shellfs --host build01 --root /srv/app cat config.toml
//!   shellfs put ./release.tar.gz /srv/app/release.tar.gz
//!
//! Connection settings come from `~/.config/shellfs/config.toml` (or
//! `--config`) and are overridden by flags.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use shellfs_core::{AuthConfig, FsConfig, LocalFile, RemoteFileSystem, RemotePath};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Remote Linux filesystem over SSH.
#[derive(Parser, Debug)]
#[command(name = "shellfs")]
#[command(about = "Remote Linux filesystem over SSH")]
struct Args {
    /// Config file (default: <config dir>/shellfs/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SSH host
    #[arg(long)]
    host: Option<String>,

    /// SSH port
    #[arg(long)]
    port: Option<u16>,

    /// Remote user name
    #[arg(short, long)]
    user: Option<String>,

    /// Remote directory relative paths resolve against
    #[arg(long)]
    root: Option<String>,

    /// Private key file; overrides the configured auth method
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Local staging directory
    #[arg(long)]
    staging: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show attributes of a remote path
    Stat { path: String },
    /// Print a remote file to stdout
    Cat { path: String },
    /// Download a remote path into the staging tree and print its local path
    Get { path: String },
    /// Upload a local file as the content of a remote path
    Put { local: PathBuf, remote: String },
    /// Append a line to a remote file through a staged local copy
    Append { path: String, text: String },
    /// Copy on the remote host
    Cp { source: String, target: String },
    /// Move on the remote host
    Mv { source: String, target: String },
    /// MD5 digest of a remote file
    Md5 { path: String },
    /// Resolve a user (or group with --group) to its numeric id
    Id {
        name: String,
        #[arg(long)]
        group: bool,
    },
    /// Canonical path of a remote path
    Realpath {
        path: String,
        /// Resolve `..` lexically instead of following symbolic links
        #[arg(long)]
        no_follow: bool,
    },
    /// List mounted filesystems
    Mounts,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("{:?}", e);
            eprintln!("shellfs: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<FsConfig> {
    let loaded = match &args.config {
        Some(path) => Some(FsConfig::load(path)?),
        None => FsConfig::load_default()?,
    };

    let mut config = match (loaded, &args.host) {
        (Some(config), _) => config,
        (None, Some(host)) => FsConfig::new(host.clone(), "/"),
        (None, None) => bail!("no config file found; pass --host or --config"),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(user) = &args.user {
        config.username = user.clone();
    }
    if let Some(root) = &args.root {
        config.root_dir = root.clone();
    }
    if let Some(identity) = &args.identity {
        config.auth = AuthConfig::KeyFile {
            path: identity.clone(),
            passphrase: None,
        };
    }
    if let Some(staging) = &args.staging {
        config.staging_dir = Some(staging.clone());
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        root = %config.root_dir,
        "connecting"
    );
    let fs = Arc::new(
        RemoteFileSystem::connect(&config)
            .await
            .with_context(|| format!("connecting to {}", config.host))?,
    );

    let result = dispatch(&fs, args.command).await;
    if let Err(e) = fs.close().await {
        tracing::warn!("close failed: {}", e);
    }
    result
}

async fn dispatch(fs: &Arc<RemoteFileSystem>, command: Command) -> Result<()> {
    match command {
        Command::Stat { path } => {
            let path = RemotePath::from(path);
            let attrs = fs.attributes(&path).await?;
            println!("path:     {}", fs.to_absolute_path(&path));
            println!("kind:     {:?}", attrs.kind());
            println!("size:     {}", attrs.size());
            println!("mode:     {} ({:o})", attrs.permissions(), attrs.permissions().mode());
            println!("owner:    {}:{}", attrs.owner(), attrs.group());
            println!("modified: {}", epoch_secs(attrs.last_modified_time()));
            println!("accessed: {}", epoch_secs(attrs.last_access_time()));
        }
        Command::Cat { path } => {
            let mut stdout = tokio::io::stdout();
            fs.to_output_stream(&RemotePath::from(path), &mut stdout).await?;
        }
        Command::Get { path } => {
            let local = fs.localize(&RemotePath::from(path)).await?;
            println!("{}", local.display());
        }
        Command::Put { local, remote } => {
            let mut file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("opening {}", local.display()))?;
            let size = file.metadata().await?.len();
            fs.from_input_stream(&RemotePath::from(remote), &mut file, size).await?;
        }
        Command::Append { path, text } => {
            let file = LocalFile::open(Arc::clone(fs), &RemotePath::from(path)).await?;
            let writer = file.open_writer(true).await?;
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.close().await?;
        }
        Command::Cp { source, target } => {
            let output = fs
                .copy(&RemotePath::from(source), &RemotePath::from(target))
                .await?;
            print!("{}", output);
        }
        Command::Mv { source, target } => {
            let output = fs
                .move_path(&RemotePath::from(source), &RemotePath::from(target))
                .await?;
            print!("{}", output);
        }
        Command::Md5 { path } => {
            let path = RemotePath::from(path);
            let digest = fs.md5(&path).await?;
            println!("{}  {}", digest, fs.to_absolute_path(&path));
        }
        Command::Id { name, group } => {
            let principal = if group {
                fs.lookup_group(&name).await?
            } else {
                fs.lookup_user(&name).await?
            };
            println!("{} {}", principal.id(), principal);
        }
        Command::Realpath { path, no_follow } => {
            let real = fs.to_real_path(&RemotePath::from(path), !no_follow).await?;
            println!("{}", real);
        }
        Command::Mounts => {
            let mut out = tokio::io::stdout();
            for entry in fs.mount_entries().await? {
                let line = format!(
                    "{} on {} type {} ({})\n",
                    entry.name, entry.dir, entry.fstype, entry.options
                );
                out.write_all(line.as_bytes()).await?;
            }
            out.flush().await?;
        }
    }
    Ok(())
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
