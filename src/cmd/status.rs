//! `cirun status` and `cirun reset` — inspect or clear the persisted
//! state document.

use anyhow::{Context, Result};
use console::style;

use cirun::config::Config;
use cirun::store::{FileStore, get_typed, keys};
use cirun_common::{ClosingState, ItemData, Queue};

pub async fn cmd_status(config: &Config) -> Result<()> {
    if !config.state_file.exists() {
        println!("{} no state file", style("Stopped").dim());
        return Ok(());
    }
    let store = FileStore::open(&config.state_file).await?;

    let running = get_typed::<bool>(&store, keys::IS_RUNNING)
        .await?
        .unwrap_or(false);
    if running {
        println!("{}", style("Running").red().bold());
    } else {
        println!("{}", style("Stopped").dim());
    }

    if let Some(run_id) = get_typed::<String>(&store, keys::RUN_ID).await? {
        println!("  run: {run_id}");
    }
    if let Some(queue) = get_typed::<Queue>(&store, keys::QUEUE).await? {
        println!("  queue: {}/{}", queue.index + 1, queue.len());
    }
    if let Some(item) = get_typed::<ItemData>(&store, keys::CURRENT_ITEM).await? {
        println!("  item: {} ({})", item.item, item.chg);
    }
    if let Some(closing) = get_typed::<ClosingState>(&store, keys::CLOSING).await? {
        println!(
            "  closing: {} (resume at {})",
            closing.chg, closing.resume_index
        );
    }
    Ok(())
}

pub fn cmd_reset(config: &Config) -> Result<()> {
    if config.state_file.exists() {
        std::fs::remove_file(&config.state_file).with_context(|| {
            format!("Failed to remove state file {}", config.state_file.display())
        })?;
        println!("{} state cleared", style("Reset").red().bold());
    } else {
        println!("{} nothing to clear", style("Reset").dim());
    }
    Ok(())
}
