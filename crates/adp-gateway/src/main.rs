use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use adp_client::AdpClient;

mod handlers;
mod openai;
mod server;
mod state;

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "adp-gateway")]
#[command(about = "OpenAI-compatible gateway for the Tencent ADP chat service")]
#[command(version)]
struct Cli {
    /// Tencent Cloud secret id
    #[arg(long, env = "SECRET_ID")]
    secret_id: String,

    /// Tencent Cloud secret key
    #[arg(long, env = "SECRET_KEY")]
    secret_key: String,

    /// ADP application (bot) key
    #[arg(long, env = "ADP_BOT_APP_KEY")]
    bot_app_key: String,

    /// Bind host
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(long, env = "PORT", default_value_t = 3100)]
    port: u16,

    /// Log filter (RUST_LOG syntax)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    let client = Arc::new(AdpClient::new(
        cli.secret_id,
        cli.secret_key,
        cli.bot_app_key,
    ));
    let state = AppState {
        client: Arc::clone(&client),
    };

    let addr = format!("{}:{}", cli.host, cli.port);
    tracing::info!(%addr, "starting adp gateway");

    if let Err(error) = server::run(state, &addr).await {
        tracing::error!(%error, "server exited");
        std::process::exit(1);
    }
}
