//! `ponder gateway`: start the HTTP API server.

use ponder_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Ponder Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.default_provider, config.default_model);
    match &config.retrieval.url {
        Some(url) => println!("   Retrieval: {url}"),
        None => println!("   Retrieval: not configured"),
    }

    ponder_gateway::start(config).await?;

    Ok(())
}
