pub mod chat;
pub mod models;
pub mod onboard;

use kaputa_config::AppConfig;

/// Load config and refuse to continue without an API key.
pub fn load_config_with_key() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export GEMINI_API_KEY='AIza...'   (recommended)");
        eprintln!("    export KAPUTA_API_KEY='...'       (generic, highest priority)");
        eprintln!("    export OPENAI_API_KEY='sk-...'    (OpenAI-compatible providers)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        eprintln!("  Get a Gemini key at: https://aistudio.google.com/app/apikey");
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    Ok(config)
}
