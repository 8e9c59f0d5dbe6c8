//! Worker-to-UI handoff. The worker never touches UI state; it pushes
//! messages into a bounded channel that the UI drains on its own tick.
//! Progress travels separately on a watch channel, so the newest count is
//! never lost to a full queue.

use std::sync::Arc;

use tokio::sync::mpsc::{self, Receiver, Sender, error::TryRecvError};
use tokio::sync::watch;

use crate::batch::ProgressFn;
use crate::error::CommentaryError;
use crate::worker::RunSummary;

/// Capacity of the status/terminal message queue.
pub const UI_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub item: String,
    pub completed: usize,
    pub total: usize,
}

impl ProgressEvent {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "Processing: {} ({}/{})",
            self.item, self.completed, self.total
        )
    }
}

#[derive(Debug)]
pub enum UiMessage {
    Status(String),
    Finished(Box<RunSummary>),
    Cancelled,
    Failed(String),
}

impl UiMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Cancelled | Self::Failed(_))
    }
}

/// Worker-side handle.
#[derive(Clone)]
pub struct UiSender {
    tx: Sender<UiMessage>,
    progress: Arc<watch::Sender<Option<ProgressEvent>>>,
}

/// UI-side handle.
pub struct UiReceiver {
    rx: Receiver<UiMessage>,
    progress: watch::Receiver<Option<ProgressEvent>>,
}

pub fn ui_channel(capacity: usize) -> (UiSender, UiReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (progress_tx, progress_rx) = watch::channel(None);
    (
        UiSender {
            tx,
            progress: Arc::new(progress_tx),
        },
        UiReceiver {
            rx,
            progress: progress_rx,
        },
    )
}

impl UiSender {
    /// Replaces the previous progress value; never blocks.
    pub fn progress(&self, item: &str, completed: usize, total: usize) {
        self.progress.send_replace(Some(ProgressEvent {
            item: item.to_string(),
            completed,
            total,
        }));
    }

    pub fn status(&self, message: impl Into<String>) {
        if self.tx.try_send(UiMessage::Status(message.into())).is_err() {
            tracing::debug!("ui queue full, status update dropped");
        }
    }

    /// Deliver a must-arrive message from async code.
    pub async fn send(&self, message: UiMessage) -> Result<(), CommentaryError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| CommentaryError::Config("ui receiver dropped".to_string()))
    }

    /// Deliver a must-arrive message from plain thread code (outside a runtime).
    pub fn send_blocking(&self, message: UiMessage) -> Result<(), CommentaryError> {
        self.tx
            .blocking_send(message)
            .map_err(|_| CommentaryError::Config("ui receiver dropped".to_string()))
    }

    /// Adapt into a batch progress callback.
    pub fn progress_fn(&self) -> ProgressFn {
        let sender = self.clone();
        Arc::new(move |item: &str, completed: usize, total: usize| {
            sender.progress(item, completed, total)
        })
    }
}

/// What one UI tick found in the queue.
#[derive(Debug, Default)]
pub struct Drained {
    /// Newest progress since the previous drain, if any.
    pub latest_progress: Option<ProgressEvent>,
    /// Everything else, in arrival order.
    pub updates: Vec<UiMessage>,
    /// The worker side is gone.
    pub disconnected: bool,
}

impl UiReceiver {
    /// Non-blocking: take everything queued right now.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        {
            let latest = self.progress.borrow_and_update();
            if latest.has_changed() {
                drained.latest_progress = latest.clone();
            }
        }
        loop {
            match self.rx.try_recv() {
                Ok(message) => drained.updates.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drained.disconnected = true;
                    break;
                }
            }
        }
        drained
    }
}

/// Translate phase-local progress into run-level progress.
pub fn overall_progress(completed: usize, offset: usize, overall_total: usize) -> (usize, usize) {
    if overall_total == 0 {
        return (0, 0);
    }
    (overall_total.min(offset + completed), overall_total)
}

/// Wrap a run-level callback so a phase reports against the run total: the
/// phase's own completed count is shifted by `offset` (items finished in
/// earlier phases) and its own total is ignored.
pub fn offset_progress(inner: ProgressFn, offset: usize, overall_total: usize) -> ProgressFn {
    Arc::new(move |item: &str, completed: usize, _phase_total: usize| {
        let (done, total) = overall_progress(completed, offset, overall_total);
        if total > 0 {
            inner(item, done, total);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn offset_maps_phase_progress_to_run_total() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let inner: ProgressFn = Arc::new(move |item: &str, done: usize, total: usize| {
            sink.lock().unwrap().push((item.to_string(), done, total));
        });
        let cb = offset_progress(inner, 2, 5);
        cb("ATTRIBUTION", 1, 3);
        cb("ATTRIBUTION", 3, 3);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ("ATTRIBUTION".to_string(), 3, 5),
                ("ATTRIBUTION".to_string(), 5, 5)
            ]
        );
    }

    #[test]
    fn overall_progress_clamps() {
        assert_eq!(overall_progress(10, 4, 5), (5, 5));
        assert_eq!(overall_progress(1, 0, 0), (0, 0));
    }

    #[test]
    fn drain_keeps_latest_progress_and_all_updates() {
        let (tx, mut rx) = ui_channel(16);
        tx.progress("AAPL", 1, 3);
        tx.status("Generating commentary...");
        tx.progress("MSFT", 2, 3);
        let drained = rx.drain();
        assert_eq!(drained.latest_progress.unwrap().item, "MSFT");
        assert_eq!(drained.updates.len(), 1);
        assert!(!drained.disconnected);

        drop(tx);
        assert!(rx.drain().disconnected);
    }

    #[test]
    fn full_queue_keeps_latest_progress() {
        let (tx, mut rx) = ui_channel(1);
        tx.status("one");
        tx.status("two, dropped");
        tx.progress("A", 1, 2);
        tx.progress("B", 2, 2);

        let drained = rx.drain();
        let last = drained.latest_progress.unwrap();
        assert_eq!((last.item.as_str(), last.completed, last.total), ("B", 2, 2));
        assert_eq!(drained.updates.len(), 1);
        // Already seen.
        assert!(rx.drain().latest_progress.is_none());
    }

    #[test]
    fn final_progress_survives_worker_exit() {
        let (tx, mut rx) = ui_channel(4);
        tx.progress("LAST", 3, 3);
        drop(tx);

        let drained = rx.drain();
        assert_eq!(drained.latest_progress.unwrap().completed, 3);
        assert!(drained.disconnected);
    }

    #[test]
    fn percent_and_status_line() {
        let e = ProgressEvent {
            item: "AAPL".into(),
            completed: 1,
            total: 4,
        };
        assert_eq!(e.percent(), 25.0);
        assert_eq!(e.status_line(), "Processing: AAPL (1/4)");
    }
}
