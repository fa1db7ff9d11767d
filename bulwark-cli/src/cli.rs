//! CLI argument parsing definitions

use bulwark_http::{CachePolicy, HttpMethod};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Issue a request through a service's resilient client and print the JSON body
    Fetch {
        /// Logical service whose breaker, throttle and cache are used
        #[arg(long, value_name = "NAME", default_value = "default")]
        service: String,

        /// Absolute URL, or a path resolved against the service base URL
        endpoint: String,

        /// HTTP method
        #[arg(long, value_name = "METHOD", default_value = "GET")]
        method: HttpMethod,

        /// Cache policy: network-first, cache-first, network-only
        #[arg(long, value_name = "POLICY", default_value = "network-first")]
        cache_policy: CachePolicy,

        /// Cache key to use instead of METHOD:url
        #[arg(long, value_name = "KEY")]
        cache_key: Option<String>,

        /// Extra request header (example: --header 'Accept: application/json')
        #[arg(long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// JSON request body
        #[arg(long, value_name = "JSON")]
        body: Option<String>,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },

    /// Fallback cache administration
    Cache {
        #[command(subcommand)]
        cache_cmd: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print a sample configuration file
    Sample {
        /// Write to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration given with --config
    Validate,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Delete every cached response of a service
    Clear {
        /// Logical service name
        #[arg(long, value_name = "NAME")]
        service: String,
    },
}
