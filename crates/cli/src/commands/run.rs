//! `memloop run`: Drive a task to completion.

use std::sync::Arc;

use memloop_agent::{AgentContext, FinishTool, FunctionLoop, LogType, LoopConfig};
use memloop_config::AppConfig;
use memloop_core::tool::ToolRegistry;

use super::{CliResult, chunker_config, load_config, open_storage};

pub async fn run(context: &str, goal: Option<String>, max_iterations: Option<u32>) -> CliResult {
    let config = load_config()?;

    // Check for API key early: give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    MEMLOOP_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = memloop_providers::build_provider(&config)?;
    let embedder = memloop_providers::build_embedder(&config)?;
    let tokenizer = memloop_providers::build_tokenizer(config.memory.tokenizer)?;

    let mut ctx = AgentContext::open(
        context,
        open_storage(&config),
        embedder,
        tokenizer,
        chunker_config(&config),
    )
    .await?;

    if let Some(goal) = goal {
        ctx.push_goal(goal);
    }
    if ctx.manager().messages(LogType::Persistent).is_empty() {
        return Err(format!("Context '{context}' has no goal yet; pass one with --goal").into());
    }

    let mut tools = ToolRegistry::new();
    tools.register(Box::new(FinishTool))?;

    let mut agent = FunctionLoop::new(provider, Arc::new(tools), LoopConfig::from_config(&config));
    if let Some(max) = max_iterations {
        agent = agent.with_max_iterations(max);
    }

    eprintln!("  Context:   {}", ctx.id());
    eprintln!("  Model:     {}", config.provider.model);
    eprintln!("  Storage:   {}", config.memory.storage_dir.display());
    eprintln!();

    let output = agent.run(&mut ctx).await?;
    match &output.output {
        serde_json::Value::String(answer) => println!("{answer}"),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    eprintln!();
    eprintln!("  Finished via {} after {} iterations", output.function, output.iterations);
    Ok(())
}
