//! offline-shell - command-line host for the offline cache policy engine.
//!
//! Runs the install / activate / fetch lifecycle against a real origin with
//! caches persisted under the user cache directory, and lets you inspect or
//! prune those caches.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use offline_shell_core::{
    CachePolicyEngine, CacheStorage, DiskStorage, EngineConfig, HttpFetcher, Method, Request,
    Worker,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

/// Directory for an optional rolling log file
const ENV_LOG_DIR: &str = "OFFLINE_SHELL_LOG_DIR";

const LOG_FILE_PREFIX: &str = "offline-shell.log";

const USAGE: &str = "\
Usage: offline-shell <command> [args]

Commands:
  start                          Install the app shell, then prune stale caches
  install                        Cache every manifest asset into the static cache
  activate                       Delete caches not in the current version set
  fetch <url|path> [--method M] [--body]
                                 Route one request through the engine
  caches                         List caches and their entries
  init-config                    Write the default config file

Environment:
  OFFLINE_SHELL_ORIGIN, OFFLINE_SHELL_STATIC_CACHE, OFFLINE_SHELL_RUNTIME_CACHE,
  OFFLINE_SHELL_API_PREFIX       Override config values
  OFFLINE_SHELL_LOG_DIR          Also write logs to a daily file in this directory
  RUST_LOG                       Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    if command == "init-config" {
        let path = EngineConfig::default().save()?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }
    if command == "-h" || command == "--help" {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    let config = EngineConfig::load().context("Failed to load configuration")?;
    let cache_dir = config.cache_dir()?;
    let storage: Arc<dyn CacheStorage> = Arc::new(
        DiskStorage::new(cache_dir.clone())
            .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?,
    );
    let fetcher = Arc::new(HttpFetcher::new()?);

    info!(origin = %config.origin, command = %command, "offline-shell starting");

    match command.as_str() {
        "start" => {
            let worker = Worker::new(config, storage, fetcher);
            let deleted = worker.start().await?;
            eprintln!("Installed and activated; removed {} stale cache(s)", deleted.len());
            for name in deleted {
                eprintln!("  - {}", name);
            }
        }
        "install" => {
            let engine = CachePolicyEngine::new(config, storage, fetcher);
            let manifest = engine.config().manifest.clone();
            engine.install(&manifest).await?;
            eprintln!(
                "Cached {} asset(s) into {}",
                manifest.len(),
                engine.config().static_cache
            );
        }
        "activate" => {
            let engine = CachePolicyEngine::new(config, storage, fetcher);
            let deleted = engine.activate().await?;
            if deleted.is_empty() {
                eprintln!("No stale caches");
            }
            for name in deleted {
                eprintln!("Deleted {}", name);
            }
        }
        "fetch" => {
            let options = FetchOptions::parse(&args[1..])?;
            let url = resolve_target(&config.origin, &options.target)?;
            let engine = CachePolicyEngine::new(config, storage, fetcher);

            let request = Request::new(options.method, url);
            let route = engine.route(&request);
            let response = engine.route_request(&request).await?;
            eprintln!(
                "{} {} -> {} ({} bytes, {})",
                request.method,
                request.url,
                response.status,
                response.body.len(),
                route
            );
            if options.print_body {
                io::stdout().write_all(&response.body)?;
            }
            engine.settle().await;
        }
        "caches" => {
            print_caches(storage.as_ref()).await?;
        }
        other => {
            bail!("Unknown command: {}\n\n{}", other, USAGE);
        }
    }

    Ok(())
}

struct FetchOptions {
    target: String,
    method: Method,
    print_body: bool,
}

impl FetchOptions {
    fn parse(args: &[String]) -> Result<Self> {
        let mut target = None;
        let mut method = Method::Get;
        let mut print_body = false;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--method" | "-X" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--method needs a value"))?;
                    method = value.parse::<Method>().unwrap_or_else(|never| match never {});
                }
                "--body" => print_body = true,
                _ if target.is_none() => target = Some(arg.clone()),
                _ => bail!("Unexpected argument: {}", arg),
            }
        }

        Ok(Self {
            target: target.ok_or_else(|| anyhow::anyhow!("fetch needs a URL or path"))?,
            method,
            print_body,
        })
    }
}

/// Absolute URLs are used as-is; anything else is a path on the origin.
fn resolve_target(origin: &Url, target: &str) -> Result<Url> {
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => origin
            .join(target)
            .with_context(|| format!("Invalid path: {}", target)),
        Err(e) => Err(e).with_context(|| format!("Invalid URL: {}", target)),
    }
}

async fn print_caches(storage: &dyn CacheStorage) -> Result<()> {
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("(no caches)");
        return Ok(());
    }

    for name in names {
        let entries = storage.entries(&name).await?;
        println!("{} ({} entries)", name, entries.len());
        for entry in entries {
            println!(
                "  {} {} [{}] {}",
                entry.response.status,
                entry.key,
                entry.stored_at.format("%Y-%m-%d %H:%M"),
                entry.response.body.len()
            );
        }
    }
    Ok(())
}
