//! `cirun run` — drive a parsed update through the engine against the
//! simulated instance and print what happened.
//!
//! Real deployments put the engine behind a browser; the CLI rehearses
//! the same orchestration with scripted page agents, which is enough to
//! see navigation order, retries, and closure boundaries before anything
//! touches a live instance.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use cirun::agents::{SimNavigator, SimWorld, sim::wait_until_stopped};
use cirun::config::Config;
use cirun::navigator::TraceNavigator;
use cirun::orchestrator::Orchestrator;
use cirun::parser::parse_update_text;
use cirun::store::FileStore;
use cirun::timer::TokioTimers;
use cirun_common::{Message, Origin, StateStore, TimerService};

use super::parse::read_input;

pub async fn cmd_run(
    config: &Config,
    input: &Path,
    existing: Vec<String>,
    delay_ms: Option<u64>,
) -> Result<()> {
    config.ensure_directories()?;
    let mut settings = config.load_settings()?;
    if let Some(ms) = delay_ms {
        settings.between_item_delay_ms = ms;
    }

    let text = read_input(input)?;
    let parsed = parse_update_text(&text);
    if parsed.item.is_empty() && parsed.items.is_empty() {
        bail!("No configuration item found in input");
    }

    println!(
        "{} {} ({} item(s), change {})",
        style("Rehearsing").red().bold(),
        style(&parsed.header).bold(),
        parsed.items.len().max(1),
        if parsed.chg.is_empty() {
            "-"
        } else {
            parsed.chg.as_str()
        },
    );

    let store: Arc<dyn StateStore> = Arc::new(FileStore::open(&config.state_file).await?);
    let (tx, rx) = mpsc::channel(64);
    let timers: Arc<dyn TimerService> = Arc::new(TokioTimers::new(tx.clone()));
    let trace = Arc::new(TraceNavigator::new());
    let world = Arc::new(
        SimWorld::new(store.clone(), tx.clone())
            .with_existing(existing)
            .with_close_notes(&settings.close_notes),
    );
    let navigator = Arc::new(SimNavigator::new(trace.clone(), world.clone()));

    let item_count = parsed.items.len().max(1) as u64;
    let budget =
        Duration::from_millis(2 * item_count * (settings.effective_delay_ms() + 8_000));

    let engine = Orchestrator::new(store.clone(), timers, navigator, settings);
    let handle = engine.spawn(tx, rx);

    let ack = handle.request(Message::StartRun { value: true }).await;
    if !ack.ok {
        bail!("Start rejected: {}", ack.error.unwrap_or_default());
    }
    let ack = handle
        .request(Message::RunUpdate {
            data: parsed,
            origin: Some(Origin { tab: 1, window: 1 }),
        })
        .await;
    if !ack.ok {
        bail!("Run rejected: {}", ack.error.unwrap_or_default());
    }

    let completed = wait_until_stopped(store.as_ref(), budget).await;
    handle.abort();

    println!();
    println!("{}", style("Pages").bold());
    for line in world.journal() {
        println!("  {line}");
    }
    println!("{}", style("Navigations").bold());
    for url in trace.visited_urls() {
        println!("  {url}");
    }

    if !completed {
        bail!("Run did not complete within {budget:?}");
    }
    println!("{}", style("Run complete").red().bold());
    Ok(())
}
