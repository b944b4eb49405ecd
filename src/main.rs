use tubedrop::config::AppConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tubedrop=debug,tower_http=info".to_string()),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Could not resolve the working directory: {error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = tubedrop::run(config).await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}
