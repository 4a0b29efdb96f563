//! Scripted page agents for rehearsal runs.
//!
//! `SimWorld` models the target instance: which items already have a
//! record, and which list loads stay undecided for a few passes. The
//! `SimNavigator` watches the engine's navigations and lets the world
//! react the way the real page agents would - reading current-step data
//! from the store and reporting back over the event channel.

use crate::agents::contract::ListVerdict;
use crate::navigator::TraceNavigator;
use crate::orchestrator::Event;
use crate::store::{get_typed, keys};
use anyhow::Result;
use async_trait::async_trait;
use cirun_common::{
    ClosingState, ItemData, Message, Origin, PageNavigator, StateStore, TabId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct SimWorld {
    store: Arc<dyn StateStore>,
    events: mpsc::Sender<Event>,
    /// Items that already have a record in the instance.
    existing: Mutex<HashSet<String>>,
    /// Items whose list page stays undecided for N passes before a clear
    /// verdict is reached.
    undecided_passes: Mutex<HashMap<String, u32>>,
    close_notes: String,
    journal: Mutex<Vec<String>>,
}

impl SimWorld {
    pub fn new(store: Arc<dyn StateStore>, events: mpsc::Sender<Event>) -> Self {
        Self {
            store,
            events,
            existing: Mutex::new(HashSet::new()),
            undecided_passes: Mutex::new(HashMap::new()),
            close_notes: String::new(),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Seed items that already exist in the instance.
    pub fn with_existing<I, S>(self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut existing) = self.existing.lock() {
            existing.extend(items.into_iter().map(|s| s.into().to_uppercase()));
        }
        self
    }

    /// Make an item's list page stay undecided for `passes` loads.
    pub fn with_undecided(self, item: &str, passes: u32) -> Self {
        if let Ok(mut map) = self.undecided_passes.lock() {
            map.insert(item.to_uppercase(), passes);
        }
        self
    }

    pub fn with_close_notes(mut self, notes: &str) -> Self {
        self.close_notes = notes.to_string();
        self
    }

    /// What the simulated pages did, in order.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn log(&self, line: String) {
        info!("{line}");
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(line);
        }
    }

    /// A page finished loading; run the agent that lives on it.
    pub async fn activate(&self, url: &str) {
        if url.contains("task_ci_list.do") {
            if url.contains("ci_item.nameSTARTSWITH") {
                self.run_list_agent().await;
            } else {
                self.run_closure_agent().await;
            }
        } else if url.contains("task_ci.do") {
            self.run_add_agent().await;
        } else {
            debug!(url, "no agent for this page");
        }
    }

    fn list_verdict(&self, item: &str) -> ListVerdict {
        if let Ok(mut passes) = self.undecided_passes.lock() {
            if let Some(remaining) = passes.get_mut(item) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return ListVerdict::undecided("rows_still_rendering");
                }
            }
        }
        let exists = self
            .existing
            .lock()
            .map(|set| set.contains(item))
            .unwrap_or(false);
        if exists {
            ListVerdict::Match
        } else {
            ListVerdict::NoRows
        }
    }

    async fn run_list_agent(&self) {
        let Ok(Some(data)) = get_typed::<ItemData>(self.store.as_ref(), keys::CURRENT_ITEM).await
        else {
            debug!("list agent found no current item; staying quiet");
            return;
        };
        match self.list_verdict(&data.item) {
            ListVerdict::Match => {
                self.log(format!("list: matched row for {}; opening record", data.item));
                self.run_form_agent(&data).await;
            }
            ListVerdict::NoRows => {
                self.log(format!("list: no rows for {}; requesting add page", data.item));
                self.send(Message::OpenAddPage).await;
            }
            ListVerdict::Undecided { reason } => {
                self.log(format!("list: undecided for {} ({reason})", data.item));
                self.send(Message::RequestListRetry {
                    run_id: Some(data.run_id.clone()),
                    reason: Some(reason),
                })
                .await;
            }
        }
    }

    /// The record form fills its fields and reports the item done.
    async fn run_form_agent(&self, data: &ItemData) {
        self.log(format!(
            "form: {} <- status '{}', location '{}', contact '{}'",
            data.item, data.current_status, data.location, data.contact
        ));
        self.send(Message::FinishedOne {
            run_id: Some(data.run_id.clone()),
        })
        .await;
    }

    /// The add page creates the relationship record, then lands on the
    /// record form which completes the item.
    async fn run_add_agent(&self) {
        let Ok(Some(data)) = get_typed::<ItemData>(self.store.as_ref(), keys::CURRENT_ITEM).await
        else {
            return;
        };
        if let Ok(mut existing) = self.existing.lock() {
            existing.insert(data.item.to_uppercase());
        }
        self.log(format!("add: created relationship for {}", data.item));
        self.run_form_agent(&data).await;
    }

    /// The change-request page walks to its change task and closes it,
    /// echoing the persisted resume index back to the engine.
    async fn run_closure_agent(&self) {
        let Ok(Some(closing)) = get_typed::<ClosingState>(self.store.as_ref(), keys::CLOSING).await
        else {
            debug!("closure agent found no closing state; staying quiet");
            return;
        };
        self.log(format!(
            "close: {} task closed with notes '{}'",
            closing.chg, self.close_notes
        ));
        self.send(Message::CloseTaskDone {
            run_id: Some(closing.run_id.clone()),
            resume_index: Some(closing.resume_index),
            skipped: None,
        })
        .await;
    }

    async fn send(&self, msg: Message) {
        let _ = self
            .events
            .send(Event::Message { msg, reply: None })
            .await;
    }
}

/// Navigator that records like [`TraceNavigator`] and wakes the simulated
/// world on every page load.
pub struct SimNavigator {
    inner: Arc<TraceNavigator>,
    world: Arc<SimWorld>,
}

impl SimNavigator {
    pub fn new(inner: Arc<TraceNavigator>, world: Arc<SimWorld>) -> Self {
        Self { inner, world }
    }
}

#[async_trait]
impl PageNavigator for SimNavigator {
    async fn navigate(&self, reuse: Option<TabId>, url: &str) -> Result<TabId> {
        let tab = self.inner.navigate(reuse, url).await?;
        let world = self.world.clone();
        let url = url.to_string();
        // the agent activates after the navigation returns, exactly like
        // a page loading behind the engine's back
        tokio::spawn(async move {
            world.activate(&url).await;
        });
        Ok(tab)
    }

    async fn close(&self, tab: TabId) -> Result<()> {
        self.inner.close(tab).await
    }

    async fn focus(&self, origin: Origin) -> Result<()> {
        self.inner.focus(origin).await
    }

    async fn set_indicator(&self, running: bool) -> Result<()> {
        self.inner.set_indicator(running).await
    }
}

/// Poll the store until the lifecycle flag clears. Returns `false` on
/// timeout.
pub async fn wait_until_stopped(store: &dyn StateStore, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let running = get_typed::<bool>(store, keys::IS_RUNNING)
            .await
            .ok()
            .flatten()
            .unwrap_or(false);
        if !running {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Orchestrator;
    use crate::settings::Settings;
    use crate::store::MemoryStore;
    use crate::timer::TokioTimers;
    use cirun_common::{ParsedUpdate, TimerService};

    struct Rig {
        store: Arc<MemoryStore>,
        nav: Arc<TraceNavigator>,
        world: Arc<SimWorld>,
        handle: crate::orchestrator::OrchestratorHandle,
    }

    fn rig(settings: Settings, build: impl FnOnce(SimWorld) -> SimWorld) -> Rig {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(64);
        let timers: Arc<dyn TimerService> = Arc::new(TokioTimers::new(tx.clone()));
        let nav = Arc::new(TraceNavigator::new());
        let world = Arc::new(build(SimWorld::new(store.clone(), tx.clone())));
        let navigator = Arc::new(SimNavigator::new(nav.clone(), world.clone()));
        let engine = Orchestrator::new(store.clone(), timers, navigator, settings);
        let handle = engine.spawn(tx, rx);
        Rig {
            store,
            nav,
            world,
            handle,
        }
    }

    fn two_items() -> ParsedUpdate {
        ParsedUpdate {
            chg: "CHG0001".into(),
            item: "CI-1".into(),
            items: vec!["CI-1".into(), "CI-2".into()],
            current_status: "In Stock".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn existing_and_missing_items_take_different_paths() {
        let settings = Settings::default().with_delay_ms(1000);
        let rig = rig(settings, |w| w.with_existing(["CI-1"]));

        let ack = rig.handle.request(Message::StartRun { value: true }).await;
        assert!(ack.ok);
        let ack = rig
            .handle
            .request(Message::RunUpdate {
                data: two_items(),
                origin: Some(Origin { tab: 1, window: 1 }),
            })
            .await;
        assert!(ack.ok);

        assert!(
            wait_until_stopped(rig.store.as_ref(), Duration::from_secs(10)).await,
            "run never completed; journal: {:?}",
            rig.world.journal()
        );

        let journal = rig.world.journal();
        // CI-1 existed: matched and filled. CI-2 did not: created first.
        assert!(journal.iter().any(|l| l.contains("matched row for CI-1")));
        assert!(
            journal
                .iter()
                .any(|l| l.contains("created relationship for CI-2"))
        );
        // the add page was visited exactly once
        let add_visits = rig
            .nav
            .visited_urls()
            .iter()
            .filter(|u| u.ends_with("task_ci.do"))
            .count();
        assert_eq!(add_visits, 1);
        rig.handle.abort();
    }

    #[tokio::test]
    async fn undecided_list_retries_until_decided() {
        let settings = Settings::default().with_delay_ms(1000);
        let rig = rig(settings, |w| {
            w.with_existing(["CI-1"]).with_undecided("CI-1", 2)
        });

        rig.handle.request(Message::StartRun { value: true }).await;
        let ack = rig
            .handle
            .request(Message::RunUpdate {
                data: ParsedUpdate {
                    chg: "CHG0001".into(),
                    item: "CI-1".into(),
                    items: vec!["CI-1".into()],
                    ..Default::default()
                },
                origin: None,
            })
            .await;
        assert!(ack.ok);

        assert!(
            wait_until_stopped(rig.store.as_ref(), Duration::from_secs(15)).await,
            "run never completed; journal: {:?}",
            rig.world.journal()
        );

        let journal = rig.world.journal();
        let undecided = journal.iter().filter(|l| l.contains("undecided")).count();
        assert_eq!(undecided, 2);
        assert!(journal.iter().any(|l| l.contains("matched row for CI-1")));
        // each retry re-visited the same list URL
        let list_visits = rig
            .nav
            .visited_urls()
            .iter()
            .filter(|u| u.contains("ci_item.nameSTARTSWITH"))
            .count();
        assert_eq!(list_visits, 3);
        rig.handle.abort();
    }

    #[tokio::test]
    async fn auto_close_visits_change_request_between_boundaries() {
        let settings = Settings::default()
            .with_delay_ms(1000)
            .with_auto_close(true);
        let rig = rig(settings, |w| {
            w.with_existing(["CI-1"]).with_close_notes("done")
        });

        rig.handle.request(Message::StartRun { value: true }).await;
        let ack = rig
            .handle
            .request(Message::RunUpdate {
                data: ParsedUpdate {
                    chg: "CHG0001".into(),
                    item: "CI-1".into(),
                    items: vec!["CI-1".into()],
                    ..Default::default()
                },
                origin: None,
            })
            .await;
        assert!(ack.ok);

        assert!(
            wait_until_stopped(rig.store.as_ref(), Duration::from_secs(10)).await,
            "run never completed; journal: {:?}",
            rig.world.journal()
        );
        let journal = rig.world.journal();
        assert!(
            journal
                .iter()
                .any(|l| l.contains("close: CHG0001 task closed with notes 'done'"))
        );
        rig.handle.abort();
    }
}
