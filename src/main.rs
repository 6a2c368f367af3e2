use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use waystation::cache::SqliteStorage;
use waystation::db::Database;
use waystation::lifecycle::DrainOutcome;
use waystation::network::HttpNetwork;
use waystation::queue::SqliteQueue;
use waystation::{logging, Agent, Config, Request};

type CliAgent = Agent<SqliteStorage, SqliteQueue, HttpNetwork>;

#[derive(Parser, Debug)]
#[command(name = "waystation")]
#[command(about = "Request-interception agent with a durable cache and retry queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/waystation/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log level when RUST_LOG is unset
  #[arg(long, default_value = "info")]
  log_level: String,

  /// Also write logs to this file (rotated daily)
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate this version's generation from the manifest
  Install {
    /// Activate right after installing
    #[arg(long)]
    activate: bool,
  },
  /// Make this version's generation current and evict the others
  Activate,
  /// Send a request through the agent
  Fetch {
    /// Absolute URL, or a path resolved against the origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Header as NAME:VALUE, repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Replay queued requests
  Sync {
    /// Sync tag (default: the configured tag)
    #[arg(long)]
    tag: Option<String>,
  },
  /// Build the notification for a push signal
  Push {
    /// Notification text
    text: Option<String>,
  },
  /// Print counters, generations and queue depth
  Stats,
  /// List queued requests
  Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(&args.log_level, args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let agent = open_agent(&config)?;

  match args.command {
    Command::Install { activate } => {
      let report = agent.install().await;
      print_json(&report)?;
      if activate {
        print_json(&agent.activate().await?)?;
      }
    }
    Command::Activate => {
      print_json(&agent.activate().await?)?;
    }
    Command::Fetch {
      url,
      method,
      headers,
      data,
    } => {
      let request = build_request(&config, &url, &method, &headers, data)?;
      let response = agent.fetch(request).await?;
      eprintln!("{} ({})", response.status, response.source);
      for (name, value) in &response.headers {
        eprintln!("{}: {}", name, value);
      }
      println!("{}", String::from_utf8_lossy(&response.body));
    }
    Command::Sync { tag } => {
      let outcome = match tag {
        Some(tag) => agent.sync(&tag).await,
        None => agent.sync_now().await,
      };
      print_json(&outcome)?;
      if let DrainOutcome::Halted { remaining, reason, .. } = outcome {
        return Err(match remaining {
          Some(n) => eyre!("Drain halted with {} requests still queued: {}", n, reason),
          None => eyre!("Drain halted, queue depth unknown: {}", reason),
        });
      }
    }
    Command::Push { text } => {
      print_json(&agent.push(text.as_deref()))?;
    }
    Command::Stats => {
      let summary = serde_json::json!({
        "generation": agent.generation(),
        "stats": agent.stats(),
        "generations": agent.generations()?,
      });
      print_json(&summary)?;
    }
    Command::Queue => {
      print_json(&agent.pending()?)?;
    }
  }

  Ok(())
}

fn open_agent(config: &Config) -> Result<CliAgent> {
  let db = Arc::new(Database::open(config.cache.database.as_deref())?);
  let storage = Arc::new(SqliteStorage::new(Arc::clone(&db)));
  let queue = Arc::new(SqliteQueue::new(db));
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  Agent::new(config, storage, queue, network)
}

fn build_request(
  config: &Config,
  url: &str,
  method: &str,
  headers: &[String],
  data: Option<String>,
) -> Result<Request> {
  let url = match Url::parse(url) {
    Ok(url) => url,
    Err(_) => config
      .origin_url()?
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?,
  };

  let mut request = Request::new(method, url);
  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Header must be NAME:VALUE, got '{}'", header))?;
    request = request.with_header(name.trim(), value.trim());
  }
  if let Some(body) = data {
    request = request.with_body(body);
  }
  Ok(request)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
