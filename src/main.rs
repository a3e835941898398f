use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use satchel::cache::{CacheManager, CacheStore, SqliteStore};
use satchel::config::Config;
use satchel::http::{Destination, Method, Request};
use satchel::net::HttpFetcher;
use satchel::worker::{Handled, Worker};

#[derive(Parser, Debug)]
#[command(name = "satchel")]
#[command(about = "Offline-first request cache for a single web origin")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/satchel/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Append logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Precache the manifest and activate this version
  Update,
  /// Fetch a URL (or origin-relative path) through the caching strategies
  Fetch {
    url: String,

    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,

    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Show cache generations and their most recent entries
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Cmd::Update => run_update(&config).await,
    Cmd::Fetch {
      url,
      navigate,
      output,
    } => run_fetch(&config, &url, navigate, output.as_deref()).await,
    Cmd::Status => run_status(&config),
  }
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("satchel=info"));

  match log_file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(file);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
  match &config.cache_db {
    Some(path) => SqliteStore::open_at(path),
    None => SqliteStore::open(),
  }
}

/// Install the configured version (all-or-nothing precache), then activate
/// it, purging generations left over from previous versions.
async fn run_update(config: &Config) -> Result<()> {
  let store = open_store(config)?;
  let fetcher = HttpFetcher::new()?;

  let worker = Worker::install(config, store, fetcher).await?;
  let deleted = worker.activate()?;

  println!(
    "Precached {} resources into {}",
    config.precache.len(),
    worker.manager().precache_name()
  );
  if deleted > 0 {
    println!("Removed {} stale generation(s)", deleted);
  }

  Ok(())
}

async fn run_fetch(config: &Config, url: &str, navigate: bool, output: Option<&Path>) -> Result<()> {
  let store = open_store(config)?;
  let fetcher = HttpFetcher::new()?;

  let worker = Worker::resume(config, store, fetcher)?;
  worker.activate()?;

  let target = config
    .origin
    .join(url)
    .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;

  let request = if navigate {
    Request::navigation(target)
  } else {
    Request {
      method: Method::Get,
      destination: Destination::from_path(target.path()),
      url: target,
      navigation: false,
    }
  };

  let response = match worker.handle(request).await? {
    Handled::Response(response) => response,
    Handled::Decline => {
      return Err(eyre!("Request not intercepted (non-GET or non-http scheme)"));
    }
  };

  tracing::info!(status = response.status, bytes = response.body.len(), "request served");

  match output {
    Some(path) => {
      std::fs::write(path, &response.body)
        .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      println!("Saved {} bytes to {} (HTTP {})", response.body.len(), path.display(), response.status);
    }
    None => {
      std::io::stdout()
        .write_all(&response.body)
        .map_err(|e| eyre!("Failed to write body: {}", e))?;
    }
  }

  Ok(())
}

fn run_status(config: &Config) -> Result<()> {
  let store = open_store(config)?;
  let manager = CacheManager::new(store, &config.app, config.version, config.runtime_cap);

  let generations = manager.store().list_generations()?;
  if generations.is_empty() {
    println!("Cache is empty; run `satchel update` to install.");
    return Ok(());
  }

  let live = [manager.precache_name(), manager.runtime_name()];
  for name in generations {
    let count = manager.store().count(&name)?;
    let marker = if live.contains(&name.as_str()) { "" } else { " (stale)" };
    println!("{}{}: {} entries", name, marker, count);

    for entry in manager.store().recent(&name, 5)? {
      println!(
        "  {} {} ({})",
        entry.status,
        entry.url,
        entry.cached_at.format("%Y-%m-%d %H:%M:%S")
      );
    }
  }

  Ok(())
}
