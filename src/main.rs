use clap::Parser;
use intraday_tick_feed::cli::Cli;
use tracing::error;

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(error) = intraday_tick_feed::run(Cli::parse()).await {
        error!(%error, "tick feed exited with an error");
        std::process::exit(1);
    }
}

// Logs go to stderr so stdout carries only the JSON feed.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(cfg!(debug_assertions))
        .with_writer(std::io::stderr)
        .init()
}
