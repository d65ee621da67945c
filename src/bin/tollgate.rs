use std::path::PathBuf;

use clap::Parser;
use tollgate::{ProxyConfig, ProxyState, serve, tls};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "TLS-terminating reverse proxy")]
struct Args {
    /// TOML configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// HTTPS listener port.
    #[arg(long)]
    listen_port: Option<u16>,
    /// Upstream base URL; repeat the flag for each backend.
    #[arg(long = "backend")]
    backends: Vec<String>,
    /// Shared secret clients must present in X-API-Key.
    #[arg(long)]
    api_key: Option<String>,
    /// PEM certificate for the listener.
    #[arg(long)]
    cert_file: Option<PathBuf>,
    /// PEM private key for the listener.
    #[arg(long)]
    key_file: Option<PathBuf>,
    /// Verbose logging, including the per-sweep backend status table.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match args.config.as_deref() {
        Some(path) => ProxyConfig::load(path)?,
        None => {
            let api_key = args
                .api_key
                .clone()
                .ok_or("either --config or --api-key is required")?;
            ProxyConfig::new(api_key, args.backends.clone())
        }
    };
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }
    if args.config.is_some() && !args.backends.is_empty() {
        config.backend_urls = args.backends.clone();
    }
    if let Some(api_key) = args.api_key {
        config.api_key = api_key;
    }
    if let Some(cert_file) = args.cert_file {
        config.cert_file = cert_file;
    }
    if let Some(key_file) = args.key_file {
        config.key_file = key_file;
    }
    config.debug |= args.debug;
    config.validate()?;

    let default_level = if config.debug { "tollgate=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tls::ensure_self_signed(&config.cert_file, &config.key_file)?;

    let state = ProxyState::new(config)?;
    serve(state).await?;
    Ok(())
}
