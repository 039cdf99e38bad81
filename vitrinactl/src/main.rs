use clap::Parser;
use tracing_subscriber::EnvFilter;
use vitrinactl::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(err) = vitrinactl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
