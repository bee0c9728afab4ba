use std::sync::Arc;
use std::time::Duration;

use chain_rpc::{ChainStorageFetcher, StoragePath};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ChainStorageWatcher {
    fetcher: Arc<dyn ChainStorageFetcher>,
    poll_interval: Duration,
}

// cancel() stops the polling task; dropping the handle leaves it running
#[derive(Debug)]
pub struct FeedHandle {
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl ChainStorageWatcher {
    pub fn new(fetcher: Arc<dyn ChainStorageFetcher>) -> Self {
        Self::with_poll_interval(fetcher, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(fetcher: Arc<dyn ChainStorageFetcher>, poll_interval: Duration) -> Self {
        Self {
            fetcher,
            poll_interval,
        }
    }

    /// Delivers each newly published value under `path`, skipping heights already seen.
    pub fn watch_latest<T, F>(&self, path: StoragePath, on_update: F) -> FeedHandle
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + 'static,
    {
        let fetcher = Arc::clone(&self.fetcher);
        let poll_interval = self.poll_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<(u64, String)> = None;
            loop {
                interval.tick().await;
                let cell = match fetcher.fetch_data(&path).await {
                    Ok(Some(cell)) => cell,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%path, error = %err, "storage fetch failed");
                        continue;
                    }
                };
                let height = cell.block_height;
                let Some(raw) = cell.latest() else { continue };
                let stale = match &last {
                    Some((last_height, last_raw)) => {
                        height < *last_height || (height == *last_height && raw == last_raw)
                    }
                    None => false,
                };
                if stale {
                    continue;
                }
                match serde_json::from_str::<T>(raw) {
                    Ok(value) => {
                        trace!(%path, height, "storage update delivered");
                        last = Some((height, raw.to_string()));
                        on_update(value);
                    }
                    Err(err) => {
                        // remember the height so a broken write is not
                        // retried every tick
                        warn!(%path, height, error = %err, "undecodable storage value skipped");
                        last = Some((height, raw.to_string()));
                    }
                }
            }
        });
        FeedHandle { task }
    }
}
