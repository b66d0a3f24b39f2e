use magnet_relay::{config::Settings, error::StartupError, server};
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "magnet_relay=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        error!("server error: {error}");
        eprintln!("Server error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let settings = Settings::from_env()?;
    server::serve(settings).await
}
