//! `kaputa onboard` — First-time setup.

use kaputa_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Kaputa — First-Time Setup");
    println!("=========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    } else {
        println!("Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\nConfig already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created config.toml at: {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Add your API key to {} (or export GEMINI_API_KEY)", config_path.display());
    println!("  2. Optionally set [search] api_key to enable web search");
    println!("  3. Run: kaputa chat\n");

    Ok(())
}
