//! `kaputa models` — List models that support content generation.

use kaputa_core::provider::ModelInfo;

use super::load_config_with_key;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_with_key()?;

    if let Some(masked) = config.masked_api_key() {
        println!("Using API key: {masked}");
    }
    println!("Provider:      {}", config.default_provider);
    println!();

    let router = kaputa_providers::router::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;

    let models = provider
        .list_models()
        .await
        .map_err(|e| format!("Could not list models: {e}"))?;

    let usable = generation_models(&models);
    if usable.is_empty() {
        eprintln!("No models supporting 'generateContent' were found for this key.");
        eprintln!("Check that the key is valid and has access to the generative API.");
        return Ok(());
    }

    println!("Models supporting 'generateContent':");
    for name in usable {
        println!("  - {name}");
    }

    Ok(())
}

fn generation_models(models: &[ModelInfo]) -> Vec<&str> {
    models
        .iter()
        .filter(|m| m.supports_generation())
        .map(|m| m.name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, methods: &[&str]) -> ModelInfo {
        ModelInfo {
            name: name.into(),
            supported_methods: methods.iter().map(|m| (*m).into()).collect(),
        }
    }

    #[test]
    fn only_generation_models_are_listed() {
        let models = [
            model("models/gemini-2.0-flash", &["generateContent", "countTokens"]),
            model("models/text-embedding-004", &["embedContent"]),
            model("models/gemini-1.5-pro", &["generateContent"]),
        ];
        assert_eq!(
            generation_models(&models),
            ["models/gemini-2.0-flash", "models/gemini-1.5-pro"]
        );
    }

    #[test]
    fn empty_listing_yields_nothing() {
        assert!(generation_models(&[]).is_empty());
    }
}
