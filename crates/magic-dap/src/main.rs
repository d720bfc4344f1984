use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use magic_config::DapConfig;
use magic_dap::Backend;
use magic_script::lite::LiteEngine;
use magic_script::DirectoryResolver;

/// Debug adapter for magic-api scripts.
///
/// Speaks DAP over stdio unless `--listen` is given.
#[derive(Debug, Parser)]
#[command(name = "magic-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `MAGIC_DAP_CONFIG` is used as a fallback. When neither are provided
    /// the adapter uses in-memory defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept DAP clients on this TCP address instead of stdio.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory scripts are resolved from (`<id>.ms`, optional `<id>.json`).
    #[arg(long, default_value = ".")]
    scripts: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    magic_dap::hardening::init(&config, Arc::new(|message| eprintln!("{message}")));

    let backend = Backend::new(
        Arc::new(DirectoryResolver::new(cli.scripts)),
        Arc::new(LiteEngine::new()),
    )
    .with_config(config.debug.clone());

    match cli.listen {
        Some(addr) => magic_dap::server::serve_tcp(addr, backend).await,
        None => magic_dap::server::run_stdio(backend).await,
    }
}

fn load_config(cli_path: Option<PathBuf>) -> DapConfig {
    let path = cli_path.or_else(|| std::env::var_os("MAGIC_DAP_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return DapConfig::default();
    };

    match DapConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "magic-dap: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            DapConfig::default()
        }
    }
}
