//! `memloop config`: Configuration management commands.

use memloop_config::AppConfig;

use super::CliResult;

pub async fn validate() -> CliResult {
    println!("Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    if let Err(e) = config.validate() {
        println!("   Invalid: {e}");
        return Err(e.into());
    }

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set MEMLOOP_API_KEY or OPENAI_API_KEY)");
    }
    if config.context.reserved_for_response >= config.context.window_tokens / 2 {
        warnings.push("Response reservation takes half the context window or more");
    }

    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   Warning: {w}");
        }
    }

    println!();
    println!("   Model:      {}", config.provider.model);
    println!("   Embeddings: {}", config.provider.embedding_model);
    println!("   Storage:    {}", config.memory.storage_dir.display());
    println!("   Window:     {} tokens", config.context.window_tokens);
    Ok(())
}

pub async fn show() -> CliResult {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> CliResult {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn defaults() -> CliResult {
    print!("{}", AppConfig::default_toml());
    Ok(())
}
