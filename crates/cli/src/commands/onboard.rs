//! `ponder onboard`: first-time setup.

use ponder_config::AppConfig;
use std::path::Path;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();

    println!("Ponder: First-Time Setup");
    println!("========================\n");

    let created = write_default_config(&config_dir)?;
    let config_path = config_dir.join("config.toml");

    if created {
        println!("  Created config.toml at: {}", config_path.display());
        println!("\n  Next steps:");
        println!("   1. Edit {} and add your API key", config_path.display());
        println!("   2. Set [retrieval] url to your document search service");
        println!("   3. Run: ponder chat\n");
    } else {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run onboard.\n");
    }

    Ok(())
}

/// Write `config.toml` into `dir` unless one is already there.
///
/// Returns whether a file was written.
fn write_default_config(dir: &Path) -> std::io::Result<bool> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("config.toml");
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    Ok(true)
}
