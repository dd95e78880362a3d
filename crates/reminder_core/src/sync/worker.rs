use crate::error::AppError;
use crate::store::ChangeFeed;
use crate::sync::Synchronizer;
use crossbeam_channel::{Sender, bounded, select};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// Runs a synchronizer over a change feed on a background thread.
///
/// One thread consumes the feed, so events are handled strictly in emission
/// order.
pub struct SyncWorker {
    stop: Sender<()>,
    thread: Option<JoinHandle<ChangeFeed>>,
}

impl SyncWorker {
    pub fn spawn(synchronizer: Arc<Synchronizer>, feed: ChangeFeed) -> Self {
        let (stop, stop_requested) = bounded::<()>(1);
        let thread = std::thread::spawn(move || {
            loop {
                select! {
                    recv(feed.receiver()) -> event => match event {
                        Ok(event) => {
                            synchronizer.process(&event);
                        }
                        Err(_) => break,
                    },
                    recv(stop_requested) -> _ => {
                        synchronizer.drain(&feed);
                        break;
                    }
                }
            }
            debug!("sync worker stopped");
            feed
        });

        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Finishes the events already queued, stops the thread and hands the
    /// feed back.
    pub fn stop(mut self) -> Result<ChangeFeed, AppError> {
        let _ = self.stop.send(());
        let thread = self
            .thread
            .take()
            .ok_or_else(|| AppError::invalid_data("sync worker already stopped"))?;
        thread
            .join()
            .map_err(|_| AppError::invalid_data("sync worker panicked"))
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.stop.send(());
            let _ = thread.join();
        }
    }
}
