//! Tab-side reconciliation of change events.
//!
//! [`TabSync`] decides what a tab should do when another tab reports a change,
//! when the tab's visibility changes, and when the periodic liveness check had
//! to rebuild the handle. [`TabSync::run`] drives it from live inputs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::notify::{ChangeEvent, ChannelReceiver};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// What the host should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Re-read data into the current views
    RefreshData,
    /// Rebuild the whole page state
    FullReload,
}

#[derive(Debug, Clone)]
pub struct TabSync {
    visibility: Visibility,
    pending_reload: bool,
}

impl TabSync {
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            pending_reload: false,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn has_pending_reload(&self) -> bool {
        self.pending_reload
    }

    /// Another tab changed the data.
    pub fn on_change(&mut self, event: &ChangeEvent) -> Option<SyncAction> {
        match self.visibility {
            Visibility::Visible => Some(SyncAction::RefreshData),
            Visibility::Hidden => {
                debug!(operation = ?event.operation, "tab hidden, deferring reload");
                self.pending_reload = true;
                None
            }
        }
    }

    pub fn on_visibility(&mut self, visibility: Visibility) -> Option<SyncAction> {
        let was = std::mem::replace(&mut self.visibility, visibility);
        if visibility == Visibility::Hidden || was == Visibility::Visible {
            return None;
        }
        if std::mem::take(&mut self.pending_reload) {
            Some(SyncAction::FullReload)
        } else {
            Some(SyncAction::RefreshData)
        }
    }

    /// Result of a periodic handle check.
    pub fn on_liveness(&self, rebuilt: bool) -> Option<SyncAction> {
        rebuilt.then_some(SyncAction::RefreshData)
    }

    /// Drive the state machine until any input or the action sink closes.
    pub async fn run(
        mut self,
        store: Arc<Store>,
        mut changes: ChannelReceiver,
        mut visibility: watch::Receiver<Visibility>,
        liveness_interval: Duration,
        actions: mpsc::Sender<SyncAction>,
    ) {
        let mut ticker = interval_at(Instant::now() + liveness_interval, liveness_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Visibility first: events are judged against the latest state.
            let action = tokio::select! {
                biased;
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *visibility.borrow_and_update();
                    self.on_visibility(current)
                }
                event = changes.recv() => match event {
                    Some(event) => self.on_change(&event),
                    None => break,
                },
                _ = ticker.tick() => match store.revalidate().await {
                    Ok(rebuilt) => self.on_liveness(rebuilt),
                    Err(e) => {
                        warn!(error = %e, "liveness check could not reinitialize the database");
                        None
                    }
                },
            };

            if let Some(action) = action {
                debug!(?action, "tab sync action");
                if actions.send(action).await.is_err() {
                    break;
                }
            }
        }
    }
}
