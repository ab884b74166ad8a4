mod api;
mod app;
mod cache;
mod commands;
mod config;
mod event;
mod gate;
mod health;
mod offline;
mod page;
mod services;
mod ui;
mod worker;

use cache::{CacheStore, Destination, FetchRequest, MemoryStorage, SqliteStorage};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use services::Services;
use worker::{ClientMessage, WorkerMessage};

#[derive(Parser, Debug)]
#[command(name = "gbshell")]
#[command(about = "Offline cache and backend-health shell for the gradebook client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/gbshell/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Keep caches in memory instead of the on-disk database
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// Precache the app shell and icons, then activate
  Install,
  /// Prune stale caches and take control
  Activate,
  /// Resolve one request through the worker
  Fetch {
    /// Absolute URL, or a path relative to the origin
    url: String,
    /// Treat as a top-level page navigation
    #[arg(long)]
    navigate: bool,
    /// Treat as an image request
    #[arg(long)]
    image: bool,
  },
  /// Post a raw JSON message to the worker
  Message { json: String },
  /// Drop every cache
  Clean,
  /// List cache buckets
  Buckets,
  /// Run one backend health check
  Health,
  /// Interactive view of a route, its gate and connection state (default)
  Watch {
    /// Route to open first (default: the configured default route)
    #[arg(short, long)]
    route: Option<String>,
  },
}

/// Initialize the tracing subscriber for logging
///
/// The TUI owns the terminal, so logs go to a daily file unless stderr is
/// requested. The returned guard flushes the file writer on drop.
fn init_tracing(log_stderr: bool) -> Result<Option<WorkerGuard>> {
  // Use RUST_LOG env var to control log level (e.g., RUST_LOG=gbshell=debug)
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gbshell=info"));

  if log_stderr {
    tracing_subscriber::registry()
      .with(fmt::layer().with_writer(std::io::stderr))
      .with(filter)
      .init();
    return Ok(None);
  }

  let log_dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("gbshell")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    &log_dir,
    "gbshell.log",
  ));
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();
  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_stderr)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let command = args.command.unwrap_or(CliCommand::Watch { route: None });
  info!(?command, ephemeral = args.ephemeral, "gbshell starting");

  if args.ephemeral {
    run(command, Services::new(config, Arc::new(MemoryStorage::new()))?).await
  } else {
    let store = match &config.cache.database {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open_default()?,
    };
    run(command, Services::new(config, Arc::new(store))?).await
  }
}

async fn run<S: CacheStore>(command: CliCommand, services: Services<S>) -> Result<()> {
  let worker = Arc::clone(&services.worker);

  match command {
    CliCommand::Install => {
      let report = worker.install().await?;
      println!("installed: {} cached, {} failed", report.cached, report.failed.len());
      for path in &report.failed {
        println!("  failed: {}", path);
      }
      println!("worker {}", worker.state());
    }
    CliCommand::Activate => {
      let deleted = worker.activate();
      println!("worker {}, {} stale cache(s) deleted", worker.state(), deleted.len());
      for bucket in deleted {
        println!("  deleted: {}", bucket);
      }
    }
    CliCommand::Fetch {
      url,
      navigate,
      image,
    } => {
      worker.activate();
      let url = services
        .config
        .origin_url()?
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;

      let mut request = if navigate {
        FetchRequest::navigate(url)
      } else {
        FetchRequest::get(url)
      };
      if image {
        request = request
          .with_destination(Destination::Image)
          .with_header("accept", "image/*");
      }

      let key = request.cache_key();
      // Navigations say nothing about the backend; everything else is reported
      let outcome = if navigate {
        worker.handle_fetch(&request).await.map_err(|e| e.to_string())
      } else {
        services.api.send(request).await.map_err(|e| e.to_string())
      };
      match outcome {
        Ok(response) => {
          println!(
            "{} {} ({} bytes)",
            response.status,
            response.content_type().unwrap_or("-"),
            response.body.len()
          );
        }
        Err(e) => println!("failed: {}", e),
      }
      if let Some(entry) = worker.store().match_any(&key)? {
        println!("cached at {}", entry.cached_at.to_rfc3339());
      }

      let snapshot = services.offline.snapshot();
      println!(
        "network offline: {}, backend offline: {}",
        snapshot.network_offline, snapshot.backend_offline
      );
    }
    CliCommand::Message { json } => {
      let mut notices = worker.subscribe();
      worker.handle_message_json(&json)?;
      while let Ok(notice) = notices.try_recv() {
        println!("{}", serde_json::to_string(&notice)?);
      }
    }
    CliCommand::Clean => {
      let mut notices = worker.subscribe();
      worker.handle_message(ClientMessage::CleanCaches {
        version: env!("CARGO_PKG_VERSION").to_string(),
      });
      if let Ok(WorkerMessage::CachesCleaned { timestamp, version }) = notices.try_recv() {
        println!("caches cleaned at {} (v{})", timestamp, version);
      }
    }
    CliCommand::Buckets => {
      let current = worker.names().current();
      for bucket in worker.store().bucket_names()? {
        let marker = if current.contains(&bucket) { "current" } else { "stale" };
        println!("{:<40} {}", bucket, marker);
      }
    }
    CliCommand::Health => {
      let url = services.monitor.probe().url();
      match services.monitor.perform_health_check().await {
        Some(result) => println!(
          "{} {} (failed checks: {})",
          url,
          if result.online { "online" } else { "offline" },
          result.error_count
        ),
        None => println!("{} inconclusive (timed out)", url),
      }
    }
    CliCommand::Watch { route } => {
      let report = worker.install().await?;
      info!(cached = report.cached, failed = report.failed.len(), "worker installed");

      let route = route.unwrap_or_else(|| services.config.routes.default_route.clone());
      let mut app = app::App::new(services);
      app.run(&route).await?;
    }
  }

  Ok(())
}
