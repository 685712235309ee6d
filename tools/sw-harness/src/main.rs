//! Command-line harness for the AgriMarket offline worker.
//!
//! Runs the worker outside a browser against a live origin, keeping its
//! caches in a JSON snapshot between runs.
//!
//! ## Usage
//!
//! ```bash
//! # Which worker would run on a host?
//! sw-harness classify 192.168.1.5
//!
//! # How is a request routed?
//! sw-harness route https://agrimarket.example/logo.png --destination image
//!
//! # Current cache names
//! sw-harness names --config worker.json
//!
//! # Install the worker for an origin and fetch through it
//! sw-harness fetch --origin https://agrimarket.example / /api/products /logo.png
//!
//! # Same, with the network cut off after install
//! sw-harness fetch --origin https://agrimarket.example --offline /products
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agrimarket_common::{init_logging, LogConfig};
use agrimarket_net::{
    Fetcher, LoaderConfig, NetError, Request, RequestDestination, ResourceLoader, Response, Url,
};
use agrimarket_sw::{
    select_worker, ContainerOptions, Environment, RegistrationOptions, RouteDecision, Router,
    ServiceWorkerContainer, SharedCacheStorage, WorkerConfig,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use http::Method;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sw-harness")]
#[command(about = "Command-line harness for the AgriMarket offline worker")]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print whether a host runs the development or the production worker
    Classify {
        /// Hostname or IP literal
        host: String,
    },

    /// Print the routing decision for a request
    Route {
        /// Request URL
        url: String,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Request destination (image, script, style, document, ...)
        #[arg(short, long, default_value = "")]
        destination: String,
        /// Worker configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the current cache names
    Names {
        /// Worker configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Install the worker for an origin and fetch paths through it
    Fetch {
        /// Origin the worker is registered for
        #[arg(long)]
        origin: String,
        /// Worker configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Cache snapshot file
        #[arg(long)]
        cache_file: Option<PathBuf>,
        /// Cut the network off after install
        #[arg(long)]
        offline: bool,
        /// Paths to request, relative to the origin
        paths: Vec<String>,
    },
}

/// Network that can be switched off.
struct Network {
    loader: ResourceLoader,
    online: AtomicBool,
}

impl Network {
    fn new() -> Result<Self> {
        Ok(Self {
            loader: ResourceLoader::new(LoaderConfig::default())?,
            online: AtomicBool::new(true),
        })
    }

    fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for Network {
    async fn fetch(&self, request: Request) -> std::result::Result<Response, NetError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline(request.url.to_string()));
        }
        self.loader.fetch(request).await
    }
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(WorkerConfig::default()),
    }
}

/// Default snapshot location under the user's local data directory.
fn default_cache_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("agrimarket"))
        .unwrap_or_else(|| PathBuf::from(".agrimarket"))
        .join("sw-cache.json")
}

/// Build the request a page would issue for `url`, guessing the destination
/// from the file extension.
fn request_for(url: Url) -> Request {
    let extension = url
        .path()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "ico" => {
            Request::get(url).destination(RequestDestination::Image)
        }
        "js" | "mjs" => Request::get(url).destination(RequestDestination::Script),
        "css" => Request::get(url).destination(RequestDestination::Style),
        "" | "html" => Request::navigate(url),
        _ => Request::get(url),
    }
}

fn describe(decision: &RouteDecision, config: &WorkerConfig) -> String {
    match decision {
        RouteDecision::Bypass(_) => decision.to_string(),
        RouteDecision::Cache { category, .. } => {
            format!("{decision} -> {}", config.cache_name(*category))
        }
    }
}

fn route(url: &str, method: &str, destination: &str, config: &WorkerConfig) -> Result<String> {
    let router = Router::new(config)?;
    let url = Url::parse(url).with_context(|| format!("invalid URL '{url}'"))?;
    let method: Method = method.to_ascii_uppercase().parse()?;
    let request = Request::new(method, url).destination(destination.parse()?);

    let rule = router.matching_rule(&request).map(|r| r.name).unwrap_or("fallback");
    Ok(format!("{} [{rule}]", describe(&router.route(&request), config)))
}

async fn fetch(
    origin: &str,
    config: WorkerConfig,
    cache_file: PathBuf,
    offline: bool,
    paths: &[String],
) -> Result<()> {
    let origin = Url::parse(origin).with_context(|| format!("invalid origin '{origin}'"))?;
    let Some(hostname) = origin.host_str().map(str::to_string) else {
        bail!("origin '{origin}' has no host");
    };
    let config = Arc::new(config);

    let caches = SharedCacheStorage::default();
    let restored = caches.load(&cache_file).await?;
    info!(path = %cache_file.display(), caches = restored, "Cache snapshot restored");

    let network = Arc::new(Network::new()?);
    let options = ContainerOptions {
        sync_retry: config.sync_retry(),
        ..Default::default()
    };
    let (container, _events) = ServiceWorkerContainer::new(network.clone(), caches.clone(), options);

    let behavior = select_worker(config.clone(), &hostname)?;
    let script = origin.join("/sw.js")?;
    if let Err(e) = container
        .register(script.as_str(), RegistrationOptions::default(), behavior)
        .await
    {
        warn!(error = %e, "Worker not installed, requests go to the network");
    }

    if offline {
        network.go_offline();
        info!("Network cut off");
    }

    let router = Router::new(&config)?;
    let environment = Environment::classify(&hostname);
    for path in paths {
        let url = origin.join(path)?;
        let request = request_for(url.clone());
        let decision = if environment.is_development() {
            "passthrough".to_string()
        } else {
            describe(&router.route(&request), &config)
        };

        match container.handle_fetch(request).await {
            Ok(response) => println!(
                "{} {:>8}B  {url}  {decision}",
                response.status.as_u16(),
                response.content_length()
            ),
            Err(e) => println!("ERR {url}  {decision}: {e}"),
        }
    }

    if let Err(e) = container.wait_for_background().await {
        warn!(error = %e, "Background work did not finish");
    }

    for name in caches.keys().await {
        println!("cache {name}: {} entries", caches.entry_count(&name).await);
    }
    caches.save(&cache_file).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_flags(cli.verbose, cli.json_logs));

    match cli.command {
        Commands::Classify { host } => {
            println!("{}", Environment::classify(&host).as_str());
        }
        Commands::Route {
            url,
            method,
            destination,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            println!("{}", route(&url, &method, &destination, &config)?);
        }
        Commands::Names { config } => {
            let config = load_config(config.as_deref())?;
            for name in config.cache_names().all() {
                println!("{name}");
            }
        }
        Commands::Fetch {
            origin,
            config,
            cache_file,
            offline,
            paths,
        } => {
            let config = load_config(config.as_deref())?;
            let cache_file = cache_file.unwrap_or_else(default_cache_file);
            fetch(&origin, config, cache_file, offline, &paths).await?;
        }
    }

    Ok(())
}
