mod cache;
mod config;
mod logging;
mod network;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use cache::{
  spawn_control_plane, CacheLayer, CacheStorage, CacheUrlsPayload, ControlMessage, ControlReply,
  HttpRequest, MemoryStorage, PolicyTable, SqliteStorage, StoreNames,
};
use config::Config;
use network::ReqwestNetwork;

#[derive(Parser, Debug)]
#[command(name = "casa-cache")]
#[command(about = "Policy-driven HTTP response cache for the Casa Concierge back office")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/casa-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Use a throwaway in-memory store instead of the SQLite database
  #[arg(long)]
  memory: bool,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a URL through the cache
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// HTTP method; anything but GET bypasses the cache
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Print response headers
    #[arg(short = 'i', long)]
    include: bool,
  },
  /// Warm the static store with the precache list
  Install,
  /// Delete stores left behind by previous versions
  Activate,
  /// Print the total cached body size in bytes
  Size,
  /// Delete every store
  Clear,
  /// Cache the given URLs in the dynamic store
  Prime {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// Send a raw JSON control message, e.g. '{"type":"GET_CACHE_SIZE"}'
  Message { json: String },
  /// Show which policy a URL resolves to
  Resolve { url: String },
  /// List the policy rules in match order
  Policies,
  /// List existing stores
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log, args.verbose)?;

  if args.memory {
    run(Arc::new(MemoryStorage::new()), &config, args.command).await
  } else {
    let storage = SqliteStorage::open(config.storage.path.as_deref())?;
    run(Arc::new(storage), &config, args.command).await
  }
}

fn build_layer<S: CacheStorage>(
  storage: Arc<S>,
  config: &Config,
) -> Result<CacheLayer<S, ReqwestNetwork>> {
  let network = ReqwestNetwork::new(&config.network)?;
  let policies = PolicyTable::from_config(config.policies.as_deref(), config.default_policy.as_ref())?;
  let names = StoreNames::new(&config.namespace, &config.version);

  let mut layer = CacheLayer::new(storage, Arc::new(network), policies, names);
  if let Some(origin) = &config.origin {
    let origin = url::Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;
    layer = layer.with_origin(origin);
  }

  let precache = config
    .precache
    .iter()
    .filter_map(|raw| match layer.resolve_url(raw) {
      Ok(url) => Some(url),
      Err(e) => {
        warn!(url = %raw, error = %e, "Skipping precache entry");
        None
      }
    })
    .collect();

  Ok(layer.with_precache(precache))
}

async fn run<S: CacheStorage>(storage: Arc<S>, config: &Config, command: Command) -> Result<()> {
  let layer = build_layer(storage, config)?;

  match command {
    Command::Fetch {
      url,
      accept,
      method,
      include,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let mut request = HttpRequest::new(method, layer.resolve_url(&url)?);
      if let Some(accept) = accept {
        request = request.with_header("Accept", &accept);
      }

      let result = layer.handle(&request).await?;
      println!("{} ({})", result.response.status, result.source);
      if let Some(captured_at) = result.cached_at {
        println!("captured at {}", captured_at.to_rfc3339());
      }
      if include {
        for (name, value) in &result.response.headers {
          println!("{}: {}", name, value);
        }
        println!();
      }
      match std::str::from_utf8(&result.response.body) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("<{} bytes of binary data>", result.response.body.len()),
      }
    }
    Command::Install => {
      let report = layer.install().await;
      println!("cached {} asset(s)", report.cached);
      for url in &report.failed {
        println!("failed: {}", url);
      }
    }
    Command::Activate => {
      let deleted = layer.activate();
      if deleted.is_empty() {
        println!("no orphaned stores");
      }
      for name in deleted {
        println!("deleted {}", name);
      }
    }
    Command::Size => send(&layer, ControlMessage::GetCacheSize).await?,
    Command::Clear => send(&layer, ControlMessage::ClearCache).await?,
    Command::Prime { urls } => {
      send(
        &layer,
        ControlMessage::CacheUrls {
          payload: CacheUrlsPayload { urls },
        },
      )
      .await?
    }
    Command::Message { json } => send(&layer, ControlMessage::from_json(&json)?).await?,
    Command::Resolve { url } => {
      let request = HttpRequest::get(layer.resolve_url(&url)?);
      let rule = layer.policies().resolve(&request);
      println!("pattern:  {}", rule.pattern);
      println!("strategy: {}", rule.strategy);
      println!("store:    {}", layer.names().name(rule.store));
      println!("max age:  {}ms", rule.max_age.as_millis());
    }
    Command::Policies => {
      let policies = layer.policies();
      for (i, rule) in policies.rules().iter().enumerate() {
        println!(
          "{:>2}. {} -> {} in {} ({}ms)",
          i + 1,
          rule.pattern,
          rule.strategy,
          layer.names().name(rule.store),
          rule.max_age.as_millis()
        );
      }
      let default = policies.resolve_default();
      println!(
        "    default -> {} in {} ({}ms)",
        default.strategy,
        layer.names().name(default.store),
        default.max_age.as_millis()
      );
    }
    Command::Stores => {
      let names = layer.storage().store_names()?;
      let expected = layer.names().expected();
      for name in names {
        let count = layer.storage().open(&name).entries()?.len();
        let marker = if expected.contains(&name) {
          ""
        } else if layer.names().is_orphan(&name) {
          " (orphaned)"
        } else {
          " (foreign)"
        };
        println!("{} {} entries{}", name, count, marker);
      }
    }
  }

  Ok(())
}

/// Deliver a control message through the control plane and print any reply.
async fn send<S: CacheStorage>(
  layer: &CacheLayer<S, ReqwestNetwork>,
  message: ControlMessage,
) -> Result<()> {
  let (handle, task) = spawn_control_plane(layer.clone());

  match handle.request(message).await? {
    Some(reply @ ControlReply::CacheSize { .. }) => {
      println!("{}", serde_json::to_string(&reply)?);
    }
    None => println!("ok"),
  }

  drop(handle);
  task
    .await
    .map_err(|e| eyre!("Control plane task failed: {}", e))?;
  Ok(())
}
