//! Change-feed translation: raw watch events → decoded entities delivered to a callback.

use futures::StreamExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use versa_core::{codec, EventType, Gvr, WorkloadEntity};
use versa_kubehub::WatchStream;

/// Callback receiving each decoded event, in feed order.
pub type EventCallback = Box<dyn FnMut(EventType, WorkloadEntity) + Send + 'static>;

/// Listener lifecycle as seen through a [`WatchHandle`].
///
/// Opening the feed happens inside `watch` before any handle exists: a failed open is the
/// returned error, a successful one yields a handle in `Listening`. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchState {
    Listening,
    Closed,
}

/// Handle to one background listener.
pub struct WatchHandle {
    state: watch::Receiver<WatchState>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == WatchState::Closed
    }

    /// Wait until the listener reports `Closed`, keeping the handle.
    pub async fn wait_closed(&mut self) {
        // A dropped sender means the task is gone, which only happens after `Closed` or a panic.
        let _ = self.state.wait_for(|s| *s == WatchState::Closed).await;
    }

    /// Wait for the listener task to finish (cancellation or end of feed).
    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "watch listener task failed");
        }
    }
}

pub(crate) fn spawn_listener(
    kind: String,
    gvr: Gvr,
    namespace: String,
    mut feed: WatchStream,
    cancel: CancellationToken,
    mut on_event: EventCallback,
) -> WatchHandle {
    let (state_tx, state_rx) = watch::channel(WatchState::Listening);
    let task = tokio::spawn(async move {
        info!(gvr = %gvr, ns = %namespace, "watch listening");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(gvr = %gvr, ns = %namespace, "watch cancelled");
                    break;
                }
                next = feed.next() => match next {
                    None => {
                        debug!(gvr = %gvr, ns = %namespace, "watch feed closed");
                        break;
                    }
                    Some(Ok(ev)) => {
                        match codec::decode(&kind, &ev.object) {
                            Ok(entity) => {
                                counter!("watch_events_total", 1u64);
                                on_event(ev.event_type, entity);
                            }
                            Err(e) => {
                                counter!("watch_events_dropped_total", 1u64);
                                warn!(gvr = %gvr, error = %e, "dropping undecodable watch event");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        counter!("watch_events_dropped_total", 1u64);
                        warn!(gvr = %gvr, error = %e, "watch stream error");
                    }
                },
            }
        }
        // Release the subscription before reporting Closed.
        drop(feed);
        let _ = state_tx.send(WatchState::Closed);
        info!(gvr = %gvr, ns = %namespace, "watch closed");
    });
    WatchHandle { state: state_rx, task }
}
