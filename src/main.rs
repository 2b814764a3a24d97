use clap::Parser;
use tracing_subscriber::EnvFilter;

use camera_relay::cli::{Args, Command};
use camera_relay::client::{run_viewer, spawn_stdin_intents};
use camera_relay::server;

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    match args.command {
        Command::Serve(serve_args) => {
            let config = serve_args.resolve()?;
            server::serve(&config).await?;
        }
        Command::Watch(watch_args) => {
            let intents = spawn_stdin_intents();
            run_viewer(watch_args.viewer_config(), intents).await?;
        }
    }

    Ok(())
}
