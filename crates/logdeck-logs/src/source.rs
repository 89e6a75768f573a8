use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("reading line: {0}")]
    Io(#[from] io::Error),

    #[error("binding {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server on {addr} stopped: {message}")]
    Server { addr: SocketAddr, message: String },

    #[error("{0}")]
    Transport(String),
}

/// A producer of raw log lines, finite or endless
#[async_trait]
pub trait LineSource: Send {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Next line without its terminator, `None` at end of input
    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError>;

    /// Release the underlying resources. Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), SourceError>;
}

#[async_trait]
impl LineSource for Box<dyn LineSource> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        (**self).next_line().await
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        (**self).close().await
    }
}

/// Line source over any buffered async reader (stdin, pipes, sockets)
pub struct ReaderSource<R> {
    name: String,
    reader: Option<R>,
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: Some(reader),
        }
    }
}

#[async_trait]
impl<R> LineSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_source_strips_terminators() {
        let input: &[u8] = b"one\ntwo\r\n\nlast";
        let mut source = ReaderSource::new("test", input);

        assert_eq!(source.next_line().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(source.next_line().await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(source.next_line().await.unwrap(), Some(Vec::new()));
        assert_eq!(source.next_line().await.unwrap(), Some(b"last".to_vec()));
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_source_close_is_idempotent() {
        let input: &[u8] = b"one\ntwo\n";
        let mut source = ReaderSource::new("test", input);

        source.close().await.unwrap();
        source.close().await.unwrap();
        assert_eq!(source.next_line().await.unwrap(), None);
    }
}
