use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logdeck_logs::EntryStore;

/// How often the ingest rate is sampled
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

const MAX_TEXT_WIDTH: usize = 40;

#[derive(Debug, Default)]
struct StatsInner {
    logs_per_second: f64,
    last_filter_time: Duration,
}

/// Ingest rate and filter timing shown in the prompt bar
#[derive(Clone, Debug, Default)]
pub struct Stats {
    inner: Arc<RwLock<StatsInner>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs_per_second(&self) -> f64 {
        self.inner.read().logs_per_second
    }

    pub fn set_logs_per_second(&self, rate: f64) {
        self.inner.write().logs_per_second = rate;
    }

    pub fn last_filter_time(&self) -> Duration {
        self.inner.read().last_filter_time
    }

    pub fn set_last_filter_time(&self, elapsed: Duration) {
        self.inner.write().last_filter_time = elapsed;
    }

    /// e.g. `120 l/s [1.2ms]`
    pub fn text(&self) -> String {
        let inner = self.inner.read();
        let mut text = format!(
            "{:.0} l/s [{:?}]",
            inner.logs_per_second, inner.last_filter_time
        );
        text.truncate(MAX_TEXT_WIDTH);
        text
    }

    /// Sample the store size every `SAMPLE_INTERVAL` until cancelled
    pub fn spawn_sampler(&self, store: EntryStore, cancel: CancellationToken) -> JoinHandle<()> {
        let stats = self.clone();
        let mut last_count = store.count();
        let mut last_sample = Instant::now();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let count = store.count();
                        let now = Instant::now();
                        stats.set_logs_per_second(rate(
                            count.saturating_sub(last_count),
                            now - last_sample,
                        ));
                        last_count = count;
                        last_sample = now;
                    }
                }
            }
        })
    }
}

/// Entries per second over `elapsed`
pub fn rate(delta: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    delta as f64 / secs
}
