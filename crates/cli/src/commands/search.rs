//! `memloop search`: Query one log of a context.

use clap::ValueEnum;
use memloop_agent::LogType;
use memloop_core::message::Message;
use memloop_core::storage;
use memloop_memory::{Collection, SearchHit};

use super::{CliResult, load_config, open_storage};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogArg {
    Persistent,
    Temporary,
}

impl From<LogArg> for LogType {
    fn from(arg: LogArg) -> Self {
        match arg {
            LogArg::Persistent => LogType::Persistent,
            LogArg::Temporary => LogType::Temporary,
        }
    }
}

pub async fn run(context: &str, query: &str, log: LogArg, limit: usize, unique: bool) -> CliResult {
    let config = load_config()?;
    let embedder = memloop_providers::build_embedder(&config)?;
    let tokenizer = memloop_providers::build_tokenizer(config.memory.tokenizer)?;

    let log = LogType::from(log);
    let path = storage::join(context, log.as_str());
    let collection = Collection::open(path, open_storage(&config), embedder, tokenizer).await?;
    if collection.is_empty() {
        println!("No chunks indexed in {context}/{log}.");
        return Ok(());
    }

    println!("Searching {context}/{log} ({} chunks) for \"{query}\"", collection.len());
    println!();

    let limit = (limit > 0).then_some(limit);
    let hits = if unique {
        collection.search_unique(query, limit).await?
    } else {
        collection.search(query, limit).await?
    };

    for (rank, hit) in hits.iter().enumerate() {
        println!("  {:>2}. [score: {:.3}] #{} {}", rank + 1, hit.score, hit.position, preview(hit));
    }
    Ok(())
}

/// One-line summary of a hit: the chunk's message when it parses as one.
fn preview(hit: &SearchHit<'_>) -> String {
    let text = match serde_json::from_str::<Message>(&hit.document.text) {
        Ok(message) => match &message.function_call {
            Some(call) => format!("{:?} → {}({})", message.role, call.name, call.arguments),
            None => format!("{:?}: {}", message.role, message.content),
        },
        Err(_) => hit.document.text.clone(),
    };
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let mut cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        cut.push('…');
        cut
    }
}
