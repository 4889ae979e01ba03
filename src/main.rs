//! wgmux entry point
//!
//! # Usage
//!
//! ```bash
//! # Front several WireGuard backends on one endpoint
//! wgmux server /etc/wgmux/server.json
//!
//! # Forward a local WireGuard endpoint to an upstream wgmux server
//! wgmux client /etc/wgmux/client.json
//! ```
//!
//! Environment:
//! - `RUST_LOG`: log filter (default `info`)
//! - `MWGP_CACHE_FILE`: override the session cache path
//! - `MWGP_NO_CACHE`: disable session caching
//! - `MWGP_SKIP_LOAD_CACHE`: keep writing the cache but start empty

use anyhow::Result;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wgmux::{load_config, Client, ClientConfig, Server, ServerConfig};

/// Exit code for command-line usage errors
const EXIT_USAGE: i32 = 22;

enum Command {
    Server(String),
    Client(String),
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("-h" | "--help") => {
            print_help();
            std::process::exit(0);
        }
        Some("-v" | "--version") => {
            println!("wgmux v{}", wgmux::VERSION);
            std::process::exit(0);
        }
        Some(subcommand @ ("server" | "client")) => {
            if args.len() != 2 {
                eprintln!("expected 1 argument as config file");
                std::process::exit(EXIT_USAGE);
            }
            let config_path = args[1].clone();
            if subcommand == "server" {
                Command::Server(config_path)
            } else {
                Command::Client(config_path)
            }
        }
        Some(other) => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(EXIT_USAGE);
        }
        None => {
            print_help();
            std::process::exit(EXIT_USAGE);
        }
    }
}

fn print_help() {
    println!(
        r#"wgmux v{} - multiplexing WireGuard proxy

USAGE:
    wgmux server <config.json>    Start the server deployment
    wgmux client <config.json>    Start the client deployment

OPTIONS:
    -h, --help       Print help information
    -v, --version    Print version information

ENVIRONMENT:
    RUST_LOG               Log filter (default: info)
    MWGP_CACHE_FILE        Override the session cache path
    MWGP_NO_CACHE          Disable session caching
    MWGP_SKIP_LOAD_CACHE   Do not load the session cache at startup
"#,
        wgmux::VERSION
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let command = parse_args();
    if let Err(e) = run(command).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Server(path) => {
            let config: ServerConfig = load_config(&path)?;
            let server = Server::new(config)?;
            server.run().await?;
        }
        Command::Client(path) => {
            let config: ClientConfig = load_config(&path)?;
            let client = Client::new(config)?;
            client.run().await?;
        }
    }
    Ok(())
}
