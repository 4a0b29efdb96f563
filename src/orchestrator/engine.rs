//! The run orchestrator: a persistent, resumable state machine over the
//! durable store.
//!
//! The engine is a single-threaded reactor over one event queue. Handlers
//! run to completion; the only suspension points are store and navigator
//! awaits. Because a second event's handler may be queued while one is
//! running, every handler re-reads current state at its top and
//! re-validates run identity and queue ownership just before writing -
//! the store is the only authority, values captured before an await are
//! never trusted.
//!
//! Nothing thrown by a handler escapes: the dispatch layer converts
//! errors into a logged error plus a negative acknowledgment. The worst
//! outcome of any failure is an abandoned run that a user stop/restart
//! clears.

use crate::errors::EngineError;
use crate::orchestrator::pages;
use crate::settings::Settings;
use crate::store::{STATE_VERSION, get_typed, keys, put_typed};
use anyhow::Result;
use chrono::Utc;
use cirun_common::{
    Ack, ClosingState, ItemData, Message, Origin, PageNavigator, ParsedUpdate, PendingAdvance,
    Queue, RetryState, RunBase, RunPhase, StateStore, TabId, TimerKind, TimerService,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// List retries stop after this many attempts; past the cap the run is
/// stuck and needs manual handling.
const LIST_RETRY_CAP: u32 = 4;
/// Requests arriving closer together than this are duplicate signals
/// from overlapping observers in the page agent.
const LIST_RETRY_DEBOUNCE_MS: i64 = 700;
/// Linear backoff: base + step * (attempt - 1). The target page's own
/// render latency is roughly constant per attempt, so the delay grows
/// linearly rather than exponentially.
const LIST_RETRY_BASE_MS: i64 = 1200;
const LIST_RETRY_STEP_MS: i64 = 900;

/// Everything the engine reacts to.
#[derive(Debug)]
pub enum Event {
    /// A request from a page agent or the UI surface, with an optional
    /// reply channel for the acknowledgment.
    Message {
        msg: Message,
        reply: Option<oneshot::Sender<Ack>>,
    },
    /// A one-shot wake-up armed through the timer service.
    TimerFired { kind: TimerKind, run_id: String },
    /// The browser reported a tab gone.
    TabClosed { tab: TabId },
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    timers: Arc<dyn TimerService>,
    navigator: Arc<dyn PageNavigator>,
    settings: Settings,
    /// The reusable worker tab. In-memory only: a restart loses it, which
    /// is one reason startup always forces stopped state.
    worker_tab: Option<TabId>,
}

/// Handle to a spawned engine: send events, request acknowledgments.
pub struct OrchestratorHandle {
    events: mpsc::Sender<Event>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Send a request and wait for its acknowledgment.
    pub async fn request(&self, msg: Message) -> Ack {
        let (tx, rx) = oneshot::channel();
        let event = Event::Message {
            msg,
            reply: Some(tx),
        };
        if self.events.send(event).await.is_err() {
            return Ack::err("engine stopped");
        }
        rx.await.unwrap_or_else(|_| Ack::err("engine stopped"))
    }

    /// A sender for feeding events from collaborators (timers, agents).
    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    pub fn abort(self) {
        self.task.abort();
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerService>,
        navigator: Arc<dyn PageNavigator>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            timers,
            navigator,
            settings,
            worker_tab: None,
        }
    }

    /// Run the reactor on a background task. `events` must be the sender
    /// side of `rx` so collaborators created from the handle reach the
    /// same queue.
    pub fn spawn(mut self, events: mpsc::Sender<Event>, mut rx: mpsc::Receiver<Event>) -> OrchestratorHandle {
        let task = tokio::spawn(async move {
            self.reset_on_startup().await;
            while let Some(event) = rx.recv().await {
                self.handle_event(event).await;
            }
        });
        OrchestratorHandle { events, task }
    }

    /// Process one event to completion.
    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Message { msg, reply } => {
                let name = message_name(&msg);
                debug!(message = name, "handling message");
                let response = match self.handle_message(msg).await {
                    Ok(ack) => ack,
                    Err(err) => {
                        error!(message = name, %err, "message handler failed");
                        Ack::err(err.to_string())
                    }
                };
                if let Some(reply) = reply {
                    let _ = reply.send(response);
                }
            }
            Event::TimerFired { kind, run_id } => {
                if let Err(err) = self.handle_timer(kind, &run_id).await {
                    error!(kind = kind.as_str(), %err, "timer handler failed");
                }
            }
            Event::TabClosed { tab } => {
                if self.worker_tab == Some(tab) {
                    debug!(tab, "worker tab closed");
                    self.worker_tab = None;
                }
            }
        }
    }

    /// Invoked whenever the host process is (re)initialized. No in-memory
    /// state survived, so any in-flight run is unrecoverable; force
    /// stopped state rather than resuming broken.
    pub async fn reset_on_startup(&mut self) {
        info!("startup: forcing stopped state");
        self.worker_tab = None;
        if let Err(err) = self.set_running(false).await {
            warn!(%err, "startup reset failed");
        }
    }

    pub async fn handle_message(&mut self, msg: Message) -> Result<Ack> {
        match msg {
            Message::StartRun { value } => {
                self.set_running(value).await?;
                Ok(Ack::ok())
            }
            Message::StopNow => {
                self.stop_now().await?;
                Ok(Ack::ok())
            }
            other => {
                if !self.is_running().await? {
                    return Ok(Ack::err("stopped"));
                }
                match other {
                    Message::RunUpdate { data, origin } => self.run_update(data, origin).await,
                    Message::OpenAddPage => {
                        let url = pages::add_url(&self.settings.instance_url);
                        self.navigate(&url).await?;
                        Ok(Ack::ok())
                    }
                    Message::FinishedOne { run_id } => {
                        self.handle_finished_one(run_id.as_deref()).await?;
                        Ok(Ack::ok())
                    }
                    Message::RequestListRetry { run_id, reason } => {
                        self.handle_list_retry(run_id.as_deref(), reason.as_deref())
                            .await?;
                        Ok(Ack::ok())
                    }
                    Message::CloseTaskDone {
                        run_id,
                        resume_index,
                        skipped,
                    } => {
                        self.handle_close_task_done(
                            run_id.as_deref(),
                            resume_index,
                            skipped.as_deref(),
                        )
                        .await?;
                        Ok(Ack::ok())
                    }
                    // handled in the outer match
                    Message::StartRun { .. } | Message::StopNow => Ok(Ack::ok()),
                }
            }
        }
    }

    // -- lifecycle -------------------------------------------------------

    /// Begin or end the run lifecycle. Idempotent in both directions.
    async fn set_running(&mut self, value: bool) -> Result<()> {
        // leftovers from a previous run must never bleed into a new one
        self.clear_run_state().await;
        if let Err(err) = self.store.remove(&[keys::RUN_ID]).await {
            warn!(%err, "failed to clear run identity");
        }
        if value {
            put_typed(self.store.as_ref(), keys::IS_RUNNING, &true).await?;
            info!("run lifecycle started");
        } else {
            if let Err(err) = self.store.remove(&[keys::IS_RUNNING]).await {
                warn!(%err, "failed to clear lifecycle flag");
            }
            info!("run lifecycle stopped");
        }
        if let Err(err) = self.navigator.set_indicator(value).await {
            warn!(%err, "failed to update running indicator");
        }
        Ok(())
    }

    /// User-initiated abort: stop and close the worker tab.
    async fn stop_now(&mut self) -> Result<()> {
        self.set_running(false).await?;
        if let Some(tab) = self.worker_tab.take() {
            if let Err(err) = self.navigator.close(tab).await {
                warn!(tab, %err, "failed to close worker tab");
            }
        }
        Ok(())
    }

    /// Cancel pending timers and purge every run-derived key. Failures
    /// are logged and swallowed; cleanup must never stall the loop.
    async fn clear_run_state(&self) {
        for kind in [TimerKind::Advance, TimerKind::ListRetry] {
            if let Err(err) = self.timers.cancel(kind).await {
                warn!(kind = kind.as_str(), %err, "failed to cancel timer");
            }
        }
        if let Err(err) = self.store.remove(keys::RUN_SCOPED).await {
            warn!(%err, "failed to purge run state");
        }
    }

    // -- starting a run --------------------------------------------------

    async fn run_update(&mut self, data: ParsedUpdate, origin: Option<Origin>) -> Result<Ack> {
        let mut items = data.items.clone();
        if items.is_empty() && !data.item.is_empty() {
            items.push(data.item.clone());
        }
        if items.is_empty() {
            return Ok(Ack::err(EngineError::NoItems.to_string()));
        }

        // a new run must not inherit old state even if stop was never
        // called cleanly
        self.clear_run_state().await;

        let store = self.store.clone();
        let run_id = match get_typed::<String>(store.as_ref(), keys::RUN_ID).await? {
            Some(existing) => existing,
            None => {
                let fresh = Uuid::new_v4().to_string();
                put_typed(store.as_ref(), keys::RUN_ID, &fresh).await?;
                fresh
            }
        };
        put_typed(store.as_ref(), keys::STATE_VERSION, &STATE_VERSION).await?;
        if let Some(origin) = origin {
            put_typed(store.as_ref(), keys::ORIGIN, &origin).await?;
        }
        if self.settings.starts_with_affect() {
            put_typed(store.as_ref(), keys::PHASE, &RunPhase::Affect).await?;
        }

        let base = RunBase {
            run_id: run_id.clone(),
            chg: data.chg,
            current_status: data.current_status,
            to_client: data.to_client,
            contact: data.contact,
            location: data.location,
            other_desc: data.other_desc,
            overrides: data.overrides,
        };

        let count = items.len();
        if count > 1 {
            put_typed(store.as_ref(), keys::BASE, &base).await?;
            let queue = Queue {
                items,
                index: 0,
                run_id: run_id.clone(),
            };
            put_typed(store.as_ref(), keys::QUEUE, &queue).await?;
            self.set_current_index(0, &run_id).await?;
        } else {
            let item_data = base.resolve(&items[0]);
            put_typed(store.as_ref(), keys::CURRENT_ITEM, &item_data).await?;
            let url =
                pages::list_url(&self.settings.instance_url, &item_data.item, &item_data.chg);
            self.navigate(&url).await?;
        }
        info!(%run_id, count, "run started");
        Ok(Ack::ok())
    }

    // -- advancing the queue ---------------------------------------------

    /// Materialize the item at `index` and navigate to its list page.
    /// Guarded by two identity checks: the supplied run id must match the
    /// persisted identity, and the queue must still belong to that run.
    async fn set_current_index(&mut self, index: usize, run_id: &str) -> Result<()> {
        let store = self.store.clone();
        if get_typed::<String>(store.as_ref(), keys::RUN_ID)
            .await?
            .as_deref()
            != Some(run_id)
        {
            debug!(run_id, "advance for a superseded run; ignored");
            return Ok(());
        }
        let Some(queue) = get_typed::<Queue>(store.as_ref(), keys::QUEUE).await? else {
            debug!("no queue to advance");
            return Ok(());
        };
        if queue.run_id != run_id {
            debug!("queue belongs to a different run; ignored");
            return Ok(());
        }
        let Some(item) = queue.items.get(index).cloned() else {
            warn!(index, len = queue.len(), "advance index out of bounds");
            return Ok(());
        };
        let Some(base) = get_typed::<RunBase>(store.as_ref(), keys::BASE).await? else {
            warn!("queue without base data; cannot materialize item");
            return Ok(());
        };

        let item_data = base.resolve(&item);
        put_typed(store.as_ref(), keys::CURRENT_ITEM, &item_data).await?;
        put_typed(store.as_ref(), keys::QUEUE, &Queue { index, ..queue }).await?;
        info!(run_id, index, item = %item_data.item, "advancing to item");
        let url = pages::list_url(&self.settings.instance_url, &item_data.item, &item_data.chg);
        self.navigate(&url).await
    }

    /// Arm a delayed advance instead of moving immediately: the target
    /// application needs settle time after a form submission before the
    /// next navigation is safe.
    async fn schedule_next_ci(&mut self, index: usize, run_id: &str) -> Result<()> {
        let pending = PendingAdvance {
            index,
            run_id: run_id.to_string(),
            scheduled_at: Utc::now(),
        };
        put_typed(self.store.as_ref(), keys::PENDING_ADVANCE, &pending).await?;
        let delay = chrono::Duration::milliseconds(self.settings.effective_delay_ms() as i64);
        self.timers
            .schedule(TimerKind::Advance, run_id, Utc::now() + delay)
            .await?;
        debug!(run_id, index, "scheduled delayed advance");
        Ok(())
    }

    // -- phase and completion logic --------------------------------------

    async fn handle_finished_one(&mut self, run_id: Option<&str>) -> Result<()> {
        let store = self.store.clone();
        let Some(current_run) = get_typed::<String>(store.as_ref(), keys::RUN_ID).await? else {
            return Ok(());
        };
        if run_id.is_some_and(|id| id != current_run) {
            debug!("finished-one from a superseded run; ignored");
            return Ok(());
        }

        let queue = get_typed::<Queue>(store.as_ref(), keys::QUEUE)
            .await?
            .filter(|q| !q.is_empty());
        let Some(queue) = queue else {
            // single-item run
            let current = get_typed::<ItemData>(store.as_ref(), keys::CURRENT_ITEM)
                .await?
                .unwrap_or_default();
            if self.should_auto_close(&current.chg)
                && self
                    .start_close_phase(&current_run, &current.item, &current.chg, 0)
                    .await?
            {
                return Ok(());
            }
            return self.finish_run(&current_run).await;
        };
        if queue.run_id != current_run {
            debug!("finished-one against a foreign queue; ignored");
            return Ok(());
        }

        let base = get_typed::<RunBase>(store.as_ref(), keys::BASE)
            .await?
            .unwrap_or_default();
        let current_item = queue
            .items
            .get(queue.index)
            .cloned()
            .unwrap_or_default();
        let current_chg = base.chg_for(&current_item);

        let next = queue.index + 1;
        if next < queue.len() {
            // a change-request boundary inside the queue closes the
            // finished request before the next one begins
            let next_chg = base.chg_for(&queue.items[next]);
            if current_chg != next_chg
                && self.should_auto_close(&current_chg)
                && self
                    .start_close_phase(&current_run, &current_item, &current_chg, next as u32)
                    .await?
            {
                return Ok(());
            }
            return self.schedule_next_ci(next, &current_run).await;
        }

        let phase = get_typed::<RunPhase>(store.as_ref(), keys::PHASE).await?;
        if phase == Some(RunPhase::Affect)
            && !self.settings.affect_only
            && !self.settings.update_only
        {
            put_typed(store.as_ref(), keys::PHASE, &RunPhase::Update).await?;
            info!(run_id = %current_run, "affect pass complete; starting update pass");
            return self.schedule_next_ci(0, &current_run).await;
        }

        if !self.settings.affect_only
            && self.should_auto_close(&current_chg)
            && self
                .start_close_phase(
                    &current_run,
                    &current_item,
                    &current_chg,
                    queue.len() as u32,
                )
                .await?
        {
            return Ok(());
        }
        self.finish_run(&current_run).await
    }

    fn should_auto_close(&self, chg: &str) -> bool {
        self.settings.auto_close && !chg.is_empty() && !self.settings.skips_auto_close(chg)
    }

    // -- closure sub-flow ------------------------------------------------

    /// Divert into the change-task closure sub-flow. Returns `true` when
    /// closure is (or already was) in progress for this run, `false` when
    /// the guards reject it and the caller should proceed normally.
    async fn start_close_phase(
        &mut self,
        run_id: &str,
        item: &str,
        chg: &str,
        resume_index: u32,
    ) -> Result<bool> {
        if !self.settings.auto_close || chg.is_empty() {
            return Ok(false);
        }
        let store = self.store.clone();
        if let Some(existing) = get_typed::<ClosingState>(store.as_ref(), keys::CLOSING).await? {
            if existing.run_id == run_id {
                debug!(run_id, "closure already in progress");
                return Ok(true);
            }
        }

        // closure supersedes any pending advance or list retry
        for kind in [TimerKind::Advance, TimerKind::ListRetry] {
            if let Err(err) = self.timers.cancel(kind).await {
                warn!(kind = kind.as_str(), %err, "failed to cancel timer");
            }
        }
        if let Err(err) = store.remove(&[keys::PENDING_ADVANCE]).await {
            warn!(%err, "failed to drop pending advance");
        }

        let closing = ClosingState {
            run_id: run_id.to_string(),
            item: item.to_string(),
            chg: chg.to_string(),
            started_at: Utc::now(),
            resume_index,
        };
        put_typed(store.as_ref(), keys::CLOSING, &closing).await?;
        info!(run_id, chg, resume_index, "entering change-task closure");
        let url = pages::change_request_url(&self.settings.instance_url, chg);
        self.navigate(&url).await?;
        Ok(true)
    }

    async fn handle_close_task_done(
        &mut self,
        run_id: Option<&str>,
        resume_index: Option<u32>,
        skipped: Option<&str>,
    ) -> Result<()> {
        let store = self.store.clone();
        let Some(current_run) = get_typed::<String>(store.as_ref(), keys::RUN_ID).await? else {
            return Ok(());
        };
        if run_id.is_some_and(|id| id != current_run) {
            debug!("close-task-done from a superseded run; ignored");
            return Ok(());
        }
        let Some(closing) = get_typed::<ClosingState>(store.as_ref(), keys::CLOSING).await? else {
            debug!("close-task-done without closure in progress; ignored");
            return Ok(());
        };
        if closing.run_id != current_run {
            return Ok(());
        }
        if let Some(reason) = skipped {
            // the review log is the only artifact of a missed auto-close
            warn!(chg = %closing.chg, reason, "auto-close skipped; resuming main loop");
        }
        let Some(resume_index) = resume_index else {
            debug!("close-task-done without resume index; ignored");
            return Ok(());
        };
        store.remove(&[keys::CLOSING]).await?;

        let queue = get_typed::<Queue>(store.as_ref(), keys::QUEUE)
            .await?
            .filter(|q| !q.is_empty());
        match queue {
            Some(_) => self.schedule_next_ci(resume_index as usize, &current_run).await,
            None => self.finish_run(&current_run).await,
        }
    }

    // -- list-page retry protocol ----------------------------------------

    /// The list agent asked for another look instead of guessing. A wrong
    /// guess creates a duplicate record or silently skips an existing
    /// one, so re-asking always wins over proceeding.
    async fn handle_list_retry(
        &mut self,
        run_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<()> {
        let store = self.store.clone();
        let Some(current_run) = get_typed::<String>(store.as_ref(), keys::RUN_ID).await? else {
            return Ok(());
        };
        if run_id.is_some_and(|id| id != current_run) {
            debug!("list-retry from a superseded run; ignored");
            return Ok(());
        }

        let now = Utc::now();
        let mut retry = get_typed::<RetryState>(store.as_ref(), keys::RETRY)
            .await?
            .unwrap_or_else(|| RetryState {
                run_id: current_run.clone(),
                count: 0,
                last_attempt_at: now,
            });
        if retry.run_id != current_run {
            // stale counter from a superseded run; persist the reset
            // before evaluating the new count
            retry = RetryState {
                run_id: current_run.clone(),
                count: 0,
                last_attempt_at: now,
            };
            put_typed(store.as_ref(), keys::RETRY, &retry).await?;
        }

        if retry.count > 0
            && now - retry.last_attempt_at
                < chrono::Duration::milliseconds(LIST_RETRY_DEBOUNCE_MS)
        {
            debug!("duplicate list-retry inside cooldown; ignored");
            return Ok(());
        }
        if retry.count >= LIST_RETRY_CAP {
            warn!(
                run_id = %current_run,
                count = retry.count,
                reason = reason.unwrap_or(""),
                "list retry cap reached; manual intervention required"
            );
            return Ok(());
        }

        let count = retry.count + 1;
        put_typed(
            store.as_ref(),
            keys::RETRY,
            &RetryState {
                run_id: current_run.clone(),
                count,
                last_attempt_at: now,
            },
        )
        .await?;
        let capped = count.min(LIST_RETRY_CAP);
        let delay_ms = LIST_RETRY_BASE_MS + LIST_RETRY_STEP_MS * i64::from(capped - 1);
        self.timers
            .schedule(
                TimerKind::ListRetry,
                &current_run,
                now + chrono::Duration::milliseconds(delay_ms),
            )
            .await?;
        info!(
            run_id = %current_run,
            count,
            delay_ms,
            reason = reason.unwrap_or(""),
            "list retry armed"
        );
        Ok(())
    }

    // -- timer consumption -----------------------------------------------

    async fn handle_timer(&mut self, kind: TimerKind, run_id: &str) -> Result<()> {
        if !self.is_running().await? {
            debug!(kind = kind.as_str(), "timer fired while stopped; ignored");
            return Ok(());
        }
        let store = self.store.clone();
        if get_typed::<String>(store.as_ref(), keys::RUN_ID)
            .await?
            .as_deref()
            != Some(run_id)
        {
            debug!(kind = kind.as_str(), "timer from a superseded run; ignored");
            return Ok(());
        }

        match kind {
            TimerKind::Advance => {
                let Some(pending) =
                    get_typed::<PendingAdvance>(store.as_ref(), keys::PENDING_ADVANCE).await?
                else {
                    return Ok(());
                };
                if pending.run_id != run_id {
                    return Ok(());
                }
                let queue = get_typed::<Queue>(store.as_ref(), keys::QUEUE)
                    .await?
                    .filter(|q| !q.is_empty());
                match queue {
                    Some(queue) if pending.index < queue.len() => {
                        self.set_current_index(pending.index, run_id).await?;
                        // the marker is single-use
                        if let Err(err) = store.remove(&[keys::PENDING_ADVANCE]).await {
                            warn!(%err, "failed to drop pending advance");
                        }
                    }
                    _ => {
                        // the resume point is past the end of the queue
                        self.finish_run(run_id).await?;
                    }
                }
            }
            TimerKind::ListRetry => {
                let Some(item) =
                    get_typed::<ItemData>(store.as_ref(), keys::CURRENT_ITEM).await?
                else {
                    return Ok(());
                };
                if item.run_id != run_id {
                    return Ok(());
                }
                info!(item = %item.item, "re-navigating to list for another look");
                let url = pages::list_url(&self.settings.instance_url, &item.item, &item.chg);
                self.navigate(&url).await?;
            }
        }
        Ok(())
    }

    // -- completion ------------------------------------------------------

    async fn finish_run(&mut self, run_id: &str) -> Result<()> {
        info!(run_id, "run complete");
        let origin = get_typed::<Origin>(self.store.as_ref(), keys::ORIGIN)
            .await
            .ok()
            .flatten();
        self.set_running(false).await?;
        if let Some(origin) = origin {
            if let Err(err) = self.navigator.focus(origin).await {
                warn!(%err, "failed to restore focus to origin");
            }
        }
        Ok(())
    }

    // -- helpers ---------------------------------------------------------

    async fn is_running(&self) -> Result<bool> {
        Ok(get_typed::<bool>(self.store.as_ref(), keys::IS_RUNNING)
            .await?
            .unwrap_or(false))
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let tab = self.navigator.navigate(self.worker_tab, url).await?;
        self.worker_tab = Some(tab);
        Ok(())
    }
}

fn message_name(msg: &Message) -> &'static str {
    match msg {
        Message::StartRun { .. } => "start_run",
        Message::StopNow => "stop_now",
        Message::RunUpdate { .. } => "run_update",
        Message::OpenAddPage => "open_add_page",
        Message::FinishedOne { .. } => "finished_one",
        Message::RequestListRetry { .. } => "request_list_retry",
        Message::CloseTaskDone { .. } => "close_task_done",
    }
}
