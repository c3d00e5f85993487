use std::env;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use treeplex::config::{DEFAULT_CONFIG_FILE, Settings};
use treeplex::error::{Result, TreeplexError};
use treeplex::lifecycle::LifecycleManager;
use treeplex::persist::{Location, Session};
use treeplex::probe::ExtensionProbe;
use treeplex::rewrite::IdentifierRewriter;
use treeplex::server;
use treeplex::tables::TableSet;

const USAGE: &str = "usage: treeplex [--config FILE] serve | probe | rewrite <prefix> <sql>";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut config_file = DEFAULT_CONFIG_FILE.to_string();
    if let Some(position) = args.iter().position(|arg| arg == "--config") {
        if position + 1 >= args.len() {
            return Err(TreeplexError::InvalidArgument(USAGE.into()));
        }
        config_file = args.remove(position + 1);
        args.remove(position);
    }
    let settings = Settings::load(&config_file)?;

    match args.first().map(String::as_str) {
        Some("serve") | None => serve(settings).await,
        Some("probe") => probe(&settings),
        Some("rewrite") if args.len() == 3 => {
            let rewriter = IdentifierRewriter::new(args[1].as_str(), TableSet::logical())
                .quoted(settings.rewrite.quote_identifiers);
            println!("{}", rewriter.rewrite(&args[2]));
            Ok(())
        }
        _ => Err(TreeplexError::InvalidArgument(USAGE.into())),
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let bind = settings.server.bind.clone();
    let manager = Arc::new(LifecycleManager::new(settings)?);
    let app = server::router(manager);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "treeplex listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// Prints what a fresh session offers before anything is created.
fn probe(settings: &Settings) -> Result<()> {
    let session = Session::open(Location::Memory)?;
    let probe = ExtensionProbe::new(settings.extensions.disabled.iter().cloned());
    let extensions = probe.probe(&session)?;
    let json = serde_json::to_string_pretty(extensions.as_ref())
        .map_err(|e| TreeplexError::InvalidArgument(e.to_string()))?;
    println!("{}", json);
    Ok(())
}
