//! Navigator implementation that records every action and surfaces it
//! through tracing. This is the rehearsal surface: a real browser driver
//! implements the same [`PageNavigator`] contract out of process.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use cirun_common::{Origin, PageNavigator, TabId};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// One recorded navigator action.
#[derive(Debug, Clone, PartialEq)]
pub enum NavEvent {
    Navigate { tab: TabId, url: String },
    Close(TabId),
    Focus(Origin),
    Indicator(bool),
}

/// Records navigations and logs them. Reused by tests as the recording
/// mock and by the CLI rehearsal mode as the visible output.
#[derive(Debug, Default)]
pub struct TraceNavigator {
    next_tab: AtomicU64,
    events: Mutex<Vec<NavEvent>>,
}

impl TraceNavigator {
    pub fn new() -> Self {
        Self {
            next_tab: AtomicU64::new(1),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Everything recorded so far, in order.
    pub fn events(&self) -> Vec<NavEvent> {
        self.events.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// URLs of all navigations, in order.
    pub fn visited_urls(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                NavEvent::Navigate { url, .. } => Some(url),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: NavEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("navigator log poisoned"))?
            .push(event);
        Ok(())
    }
}

#[async_trait]
impl PageNavigator for TraceNavigator {
    async fn navigate(&self, reuse: Option<TabId>, url: &str) -> Result<TabId> {
        let tab = match reuse {
            Some(tab) => tab,
            None => self.next_tab.fetch_add(1, Ordering::SeqCst),
        };
        info!(tab, url, "navigate");
        self.record(NavEvent::Navigate {
            tab,
            url: url.to_string(),
        })?;
        Ok(tab)
    }

    async fn close(&self, tab: TabId) -> Result<()> {
        info!(tab, "close tab");
        self.record(NavEvent::Close(tab))
    }

    async fn focus(&self, origin: Origin) -> Result<()> {
        info!(tab = origin.tab, window = origin.window, "restore focus");
        self.record(NavEvent::Focus(origin))
    }

    async fn set_indicator(&self, running: bool) -> Result<()> {
        info!(running, "indicator");
        self.record(NavEvent::Indicator(running))
    }
}
