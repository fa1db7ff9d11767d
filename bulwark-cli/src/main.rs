//! `bulwark` command-line front end

mod cli;

use anyhow::{anyhow, bail, Context, Result};
use bulwark_caching::{TieredCache, TieredCacheConfig};
use bulwark_config::{ConfigLoader, NetworkConfig};
use bulwark_http::{
    CachePolicy, ClientRegistry, HttpConfig, HttpMethod, RequestContext, ReqwestTransport,
    TracingTelemetry,
};
use clap::Parser;
use cli::{CacheCommands, Cli, Commands, ConfigCommands};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing; `--log-level` wins over `RUST_LOG`, which wins over `info`
fn init_tracing(log_level: Option<&str>) {
    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", level);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // Logs go to stderr so stdout carries only the response body
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
    debug!("Tracing initialized");
}

fn load_config(config_path: Option<&PathBuf>) -> Result<NetworkConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

/// Split `Name: value` header arguments
fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|header| {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid header '{}', expected 'Name: value'", header))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("Invalid header '{}', name is empty", header);
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn handle_fetch(
    config: &NetworkConfig,
    service: &str,
    endpoint: &str,
    method: HttpMethod,
    cache_policy: CachePolicy,
    cache_key: Option<&String>,
    headers: &[String],
    body: Option<&String>,
) -> Result<()> {
    let transport = ReqwestTransport::new(&HttpConfig::from(config))
        .context("Failed to create HTTP transport")?;
    let registry = ClientRegistry::from_config(
        config,
        Arc::new(transport),
        Arc::new(TracingTelemetry::new()),
    )
    .context("Failed to create service clients")?;

    let client = registry.client(service).ok_or_else(|| {
        anyhow!(
            "Unknown service '{}'. Configured services: {}",
            service,
            registry.names().collect::<Vec<_>>().join(", ")
        )
    })?;

    let mut context = RequestContext::new(method, endpoint).with_cache_policy(cache_policy);
    for (name, value) in parse_headers(headers)? {
        context = context.with_header(name, value);
    }
    if let Some(body) = body {
        let body: Value = serde_json::from_str(body).context("Failed to parse request body JSON")?;
        context = context.with_body(body);
    }
    if let Some(key) = cache_key {
        context = context.with_cache_key(key.clone());
    }

    info!("{} {} via service '{}' ({})", method, endpoint, service, cache_policy);
    let result: Result<Value, _> = client.request(context).await;

    // Let the background disk write land before the process exits
    client.cache().flush().await;

    let value = result.with_context(|| format!("Request to {} failed", endpoint))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to format response")?
    );
    Ok(())
}

fn handle_config_sample(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = NetworkConfig::generate_sample();

    match output {
        None => {
            print!("{}", sample);
            Ok(())
        }
        Some(path) => {
            if path.exists() && !force {
                bail!(
                    "File {:?} already exists. Use --force to overwrite.",
                    path
                );
            }
            std::fs::write(path, sample)
                .with_context(|| format!("Failed to write configuration to {:?}", path))?;
            println!("Sample configuration written to {:?}", path);
            Ok(())
        }
    }
}

fn handle_config_validate(config_path: Option<&PathBuf>) -> Result<()> {
    let path = config_path.ok_or_else(|| anyhow!("Pass the file to validate with --config"))?;
    let config = ConfigLoader::new()
        .from_file(path)
        .with_context(|| format!("Configuration {:?} is invalid", path))?;

    println!("Configuration {:?} is valid", path);
    println!("  cache_dir: {}", config.cache_dir.display());
    for (name, service) in &config.services {
        println!(
            "  {}: {} retries, breaker opens after {} failures, {} req/min, cache ttl {:?}",
            name,
            service.max_retries,
            service.circuit_failure_threshold,
            service.max_requests_per_minute,
            service.cache_ttl
        );
    }
    Ok(())
}

async fn handle_cache_clear(config: &NetworkConfig, service: &str) -> Result<()> {
    let service_config = config
        .service(service)
        .ok_or_else(|| anyhow!("Unknown service '{}'", service))?;
    let directory = config.cache_dir_for(service);

    if !directory.exists() {
        println!("Nothing cached for '{}'", service);
        return Ok(());
    }

    clear_cache_dir(service_config, &directory).await?;
    println!("Cleared cache for '{}' at {}", service, directory.display());
    Ok(())
}

async fn clear_cache_dir(
    service_config: &bulwark_config::ServiceConfig,
    directory: &Path,
) -> Result<()> {
    let cache = TieredCache::new(TieredCacheConfig::for_service(service_config, directory))
        .context("Failed to open cache")?;
    cache.clear().await.context("Failed to clear cache")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_deref());

    match &cli.command {
        Some(Commands::Fetch {
            service,
            endpoint,
            method,
            cache_policy,
            cache_key,
            headers,
            body,
        }) => {
            let config = load_config(cli.config.as_ref())?;
            handle_fetch(
                &config,
                service,
                endpoint,
                *method,
                *cache_policy,
                cache_key.as_ref(),
                headers,
                body.as_ref(),
            )
            .await
        }
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Sample { output, force } => handle_config_sample(output.as_ref(), *force),
            ConfigCommands::Validate => handle_config_validate(cli.config.as_ref()),
        },
        Some(Commands::Cache { cache_cmd }) => match cache_cmd {
            CacheCommands::Clear { service } => {
                let config = load_config(cli.config.as_ref())?;
                handle_cache_clear(&config, service).await
            }
        },
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
