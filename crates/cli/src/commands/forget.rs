//! `memloop forget`: Delete a context.

use memloop_agent::AgentContext;

use super::{CliResult, load_config, open_storage};

pub async fn run(context: &str) -> CliResult {
    let config = load_config()?;
    let storage = open_storage(&config);

    if AgentContext::forget(storage.as_ref(), context).await? {
        println!("Forgot context '{context}'.");
    } else {
        println!("Nothing stored for context '{context}'.");
    }
    Ok(())
}
