use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use proxy_chat_client::{
    cli::Cli,
    client::{self, SessionEnd},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // Logs share the terminal with the chat prompt, so stay quiet by default.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = Cli::parse().into_config();
    debug!(?config, "resolved configuration");

    match client::run(config).await {
        Ok(SessionEnd::ConnectFailed) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
