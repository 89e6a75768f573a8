use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::source::LineSource;

/// Lines buffered between the source workers and the consumer
pub const LINE_BUFFER: usize = 1000;

/// Interval between flushes (and heartbeats) on the consumer side
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on a source's close
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Fans many line sources into one stream of trimmed, non-empty lines
pub struct Multiplexer {
    sources: Vec<Box<dyn LineSource>>,
    follow: bool,
    flush_interval: Duration,
}

impl Multiplexer {
    pub fn new(follow: bool) -> Self {
        Self {
            sources: Vec::new(),
            follow,
            flush_interval: FLUSH_INTERVAL,
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn add(&mut self, source: impl LineSource + 'static) {
        self.sources.push(Box::new(source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Start one worker per source. Workers stop at end of input, on a
    /// read error, or when `cancel` fires; each closes its own source.
    pub fn spawn(self, cancel: CancellationToken) -> MuxHandle {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);

        let workers = self
            .sources
            .into_iter()
            .map(|source| {
                tokio::spawn(drain(source, tx.clone(), self.follow, cancel.clone()))
            })
            .collect();

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        MuxHandle {
            rx,
            ticker,
            backlogged: false,
            workers,
        }
    }
}

async fn drain<S: LineSource>(
    mut source: S,
    tx: mpsc::Sender<String>,
    follow: bool,
    cancel: CancellationToken,
) {
    let name = source.name().to_string();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = source.next_line() => line,
        };

        match line {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(text.to_string()) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                if follow {
                    warn!(source = %name, "stream ended");
                } else {
                    debug!(source = %name, "stream ended");
                }
                break;
            }
            Err(e) => {
                error!(source = %name, error = %e, "reading line from logs");
                break;
            }
        }
    }

    match tokio::time::timeout(CLOSE_TIMEOUT, source.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(source = %name, error = %e, "closing source"),
        Err(_) => warn!(source = %name, "closing source timed out"),
    }
}

/// Consumer side of a running multiplexer
pub struct MuxHandle {
    rx: mpsc::Receiver<String>,
    ticker: Interval,
    backlogged: bool,
    workers: Vec<JoinHandle<()>>,
}

impl MuxHandle {
    /// Wait for the next flush tick and return every buffered line.
    ///
    /// An empty batch means a quiet tick. `None` once every worker has
    /// exited and the buffer is drained.
    pub async fn next_batch(&mut self) -> Option<Vec<String>> {
        // a full buffer is drained again without waiting for the tick
        if !self.backlogged {
            self.ticker.tick().await;
        }

        let mut batch = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(line) => {
                    batch.push(line);
                    if batch.len() >= LINE_BUFFER {
                        self.backlogged = true;
                        return Some(batch);
                    }
                }
                Err(TryRecvError::Empty) => {
                    self.backlogged = false;
                    return Some(batch);
                }
                Err(TryRecvError::Disconnected) => {
                    self.backlogged = false;
                    return (!batch.is_empty()).then_some(batch);
                }
            }
        }
    }

    /// Write every line to `out`, one per line, until all sources are done.
    ///
    /// Each tick ends with a zero-byte write so that a closed downstream
    /// pipe is noticed even when no lines arrive.
    pub async fn pipe_to<W>(mut self, out: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;

        while let Some(batch) = self.next_batch().await {
            for line in &batch {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                written += 1;
            }
            let _heartbeat = out.write(&[]).await?;
            out.flush().await?;
        }

        Ok(written)
    }

    /// Wait for every worker to finish
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "source worker failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::source::{ReaderSource, SourceError};

    /// Source fed from a channel; endless while the sender lives
    struct ChannelSource {
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    #[async_trait]
    impl LineSource for ChannelSource {
        fn name(&self) -> &str {
            "channel"
        }

        async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
            Ok(self.rx.recv().await)
        }

        async fn close(&mut self) -> Result<(), SourceError> {
            self.rx.close();
            Ok(())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl LineSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
            Err(SourceError::Transport("connection reset".to_string()))
        }

        async fn close(&mut self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    async fn collect_until(handle: &mut MuxHandle, want: usize) -> Vec<String> {
        let mut lines = Vec::new();
        while lines.len() < want {
            match tokio::time::timeout(Duration::from_secs(2), handle.next_batch()).await {
                Ok(Some(batch)) => lines.extend(batch),
                Ok(None) => break,
                Err(_) => panic!("timed out with {:?}", lines),
            }
        }
        lines
    }

    #[tokio::test]
    async fn test_follow_mode_keeps_running_until_cancelled() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut mux = Multiplexer::new(true).with_flush_interval(Duration::from_millis(10));
        mux.add(ReaderSource::new("a", &b"a1\n  a2  \n"[..]));
        mux.add(ReaderSource::new("b", &b"b1\n\n\nb2\n"[..]));
        mux.add(ChannelSource { rx });
        let mut handle = mux.spawn(cancel.clone());

        let lines = collect_until(&mut handle, 4).await;
        assert_eq!(lines.len(), 4);
        let from_a: Vec<_> = lines.iter().filter(|l| l.starts_with('a')).collect();
        let from_b: Vec<_> = lines.iter().filter(|l| l.starts_with('b')).collect();
        assert_eq!(from_a, vec!["a1", "a2"]);
        assert_eq!(from_b, vec!["b1", "b2"]);

        // finite sources are done, the endless one keeps the mux alive
        for _ in 0..3 {
            let batch = handle.next_batch().await;
            assert_eq!(batch, Some(Vec::new()));
        }

        tx.send(b"c1".to_vec()).unwrap();
        assert_eq!(collect_until(&mut handle, 1).await, vec!["c1"]);

        cancel.cancel();
        let end = tokio::time::timeout(Duration::from_secs(2), async {
            while handle.next_batch().await.is_some() {}
        })
        .await;
        assert!(end.is_ok());
        handle.join().await;
    }

    #[tokio::test]
    async fn test_failing_source_does_not_stop_siblings() {
        let mut mux = Multiplexer::new(false).with_flush_interval(Duration::from_millis(10));
        mux.add(FailingSource);
        mux.add(ReaderSource::new("ok", &b"x\ny\n"[..]));

        let mut out = Vec::new();
        let written = mux
            .spawn(CancellationToken::new())
            .pipe_to(&mut out)
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(out, b"x\ny\n");
    }

    #[tokio::test]
    async fn test_no_sources_ends_immediately() {
        let mux = Multiplexer::new(true);
        assert!(mux.is_empty());
        let mut handle = mux.spawn(CancellationToken::new());
        assert_eq!(handle.next_batch().await, None);
    }
}
