use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use offline_agent::agent::OfflineAgent;
use offline_agent::cache::{CacheStorage, SqliteStorage};
use offline_agent::clients::Clients;
use offline_agent::config::{self, Config};
use offline_agent::host::Registration;
use offline_agent::http::Request;
use offline_agent::logging;
use offline_agent::network::HttpNetwork;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "offline-agent")]
#[command(about = "Cache-first offline agent with versioned cache generations")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-agent/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured generation and activate it
  Install,
  /// Fetch URLs (relative to the scope) through the active generation
  Fetch {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// List cache generations in storage
  Caches,
  /// Post a JSON message to the active agent
  Message { payload: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config::data_dir()?.join("logs"))?;

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  let clients = Arc::new(Clients::new());
  let registration = Registration::new(Arc::clone(&network));

  let agent = Arc::new(OfflineAgent::from_config(
    &config,
    Arc::clone(&storage),
    network,
    clients,
  )?);

  match args.command {
    Command::Install => {
      let report = registration.register(agent).await?;
      println!(
        "installed {} ({} assets cached)",
        report.install.generation, report.install.cached
      );
      for name in &report.activation.deleted {
        println!("deleted old cache {}", name);
      }
      for name in &report.activation.failed {
        println!("could not delete old cache {}", name);
      }
    }
    Command::Fetch { urls } => {
      if !registration.resume(Arc::clone(&agent)).await? {
        registration.register(agent).await?;
      }
      for entry in urls {
        let url = config
          .scope
          .join(&entry)
          .map_err(|e| eyre!("Invalid URL '{}': {}", entry, e))?;
        let result = registration.fetch(Request::get(url.clone())).await?;
        let response = result.data;
        println!(
          "{} {} {} [{:?}] {} bytes",
          url,
          response.status().as_u16(),
          response.status_text(),
          result.source,
          response.body_len()
        );
      }
      registration.settle().await;
    }
    Command::Caches => {
      for name in storage.keys()? {
        let marker = if name == config.cache_name { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
    Command::Message { payload } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid JSON message: {}", e))?;
      if !registration.resume(agent).await? {
        return Err(eyre!("{} is not installed", config.cache_name));
      }
      let outcome = registration.post_message(&payload).await?;
      println!("{:?}", outcome);
    }
  }

  Ok(())
}
