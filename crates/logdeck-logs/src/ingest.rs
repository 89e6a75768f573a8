use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::LineSource;
use crate::store::EntryStore;

/// Screen refreshes per second; staged lines are flushed twice as often
pub const UPDATE_RATE: u32 = 10;

/// Capacity added to the staging buffer when it fills up
const STAGING_INCREMENT: usize = 1000;

/// Interval between two flushes of staged lines into the store
pub fn flush_interval() -> Duration {
    Duration::from_secs(1) / (UPDATE_RATE * 2)
}

/// Drain `source` into `store`.
///
/// Lines are staged by a reader task and inserted in batches on every
/// flush tick. The returned handle resolves once the source has ended (or
/// `cancel` fired) and the last staged batch is in the store.
pub fn stream_to_store<S>(source: S, store: EntryStore, cancel: CancellationToken) -> JoinHandle<()>
where
    S: LineSource + 'static,
{
    let staged: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let reader_done = CancellationToken::new();

    let reader = tokio::spawn(read_lines(
        source,
        Arc::clone(&staged),
        cancel,
        reader_done.clone(),
    ));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = reader_done.cancelled() => break,
                _ = ticker.tick() => flush(&staged, &store),
            }
        }

        if let Err(e) = reader.await {
            warn!(error = %e, "line reader failed");
        }
        flush(&staged, &store);
    })
}

async fn read_lines<S: LineSource>(
    mut source: S,
    staged: Arc<Mutex<Vec<Vec<u8>>>>,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    let name = source.name().to_string();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = source.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let mut staged = staged.lock();
                if staged.len() == staged.capacity() {
                    staged.reserve_exact(STAGING_INCREMENT);
                }
                staged.push(line);
            }
            Ok(None) => {
                info!(source = %name, "input ended");
                break;
            }
            Err(e) => {
                error!(source = %name, error = %e, "reading input");
                break;
            }
        }
    }

    if let Err(e) = source.close().await {
        warn!(source = %name, error = %e, "closing input");
    }
    done.cancel();
}

fn flush(staged: &Mutex<Vec<Vec<u8>>>, store: &EntryStore) {
    let batch = std::mem::take(&mut *staged.lock());
    if batch.is_empty() {
        return;
    }

    let inserted = store.insert_batch(&batch);
    debug!(staged = batch.len(), inserted, "flushed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    use crate::source::ReaderSource;
    use crate::store::DEFAULT_MAX_SORT;

    #[test]
    fn test_flush_interval_is_twice_the_update_rate() {
        assert_eq!(flush_interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_finite_source_lands_in_store() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        let input: &[u8] = b"{\"msg\":\"a\"}\n\n{\"msg\":\"b\"}\nplain\n";

        let handle = stream_to_store(
            ReaderSource::new("stdin", input),
            store.clone(),
            CancellationToken::new(),
        );
        handle.await.unwrap();

        assert_eq!(store.count(), 3);
        assert_eq!(store.known_fields_match("m"), vec!["msg".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_flushes_staged_lines() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        let (reader, mut writer) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let handle = stream_to_store(
            ReaderSource::new("pipe", BufReader::new(reader)),
            store.clone(),
            cancel.clone(),
        );

        writer.write_all(b"one\ntwo\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.count(), 2);

        // the writer stays open, only the token stops ingestion
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.count(), 2);
    }
}
