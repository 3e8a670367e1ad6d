//! Nutrition Edge - Entry point
//!
//! Runs the edge pipeline in front of a catch-all 404 handler. Useful for
//! checking a configuration end to end before wiring real handlers.

use std::path::PathBuf;

use anyhow::Context;
use nutrition_edge::prelude::*;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
    /// Start from the development preset.
    development: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut development = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--dev" => development = true,
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("nutrition-edge {}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self {
            config,
            development,
        }
    }
}

fn print_help() {
    println!(
        r"Nutrition Edge - HTTP edge pipeline

USAGE:
    nutrition-edge [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
        --dev              Start from the development preset
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    EDGE__SERVER__HTTP_ADDR          Listen address (default: 0.0.0.0:8080)
    EDGE__AUTH__JWT_SECRET           HS256 signing secret (required with auth)
    EDGE__RATE_LIMIT__STORE          memory | redis
    EDGE__RATE_LIMIT__REDIS_URL      Redis URL for the shared store
    EDGE__TELEMETRY__ENVIRONMENT     production enables strict validation

A .env file in the working directory is read first.
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_dotenv();
    loader = if args.development {
        loader.with_development()
    } else {
        loader.with_defaults()
    };
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    let config = loader.with_env_prefix("EDGE").load()?;

    let sink = init_telemetry(&config.telemetry)?;
    let edge = Edge::with_sink(&config, sink)?;
    let server = EdgeServer::bind(&config.server, edge).await?;

    tracing::info!(
        addr = %server.local_addr()?,
        environment = %config.telemetry.environment,
        "Starting nutrition edge"
    );
    server.serve(not_found, shutdown_signal()).await?;
    Ok(())
}
