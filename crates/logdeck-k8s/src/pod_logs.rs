use std::pin::Pin;

use async_trait::async_trait;
use futures::AsyncBufReadExt;
use futures::io::AsyncBufRead;

use logdeck_logs::{LineSource, SourceError};

/// Line source over one pod's log stream. Lines are raw bytes; invalid
/// UTF-8 passes through for the store to keep as opaque text.
pub struct PodLogSource {
    name: String,
    reader: Option<Pin<Box<dyn AsyncBufRead + Send>>>,
}

impl PodLogSource {
    pub fn new<R>(name: impl Into<String>, stream: R) -> Self
    where
        R: AsyncBufRead + Send + 'static,
    {
        Self {
            name: name.into(),
            reader: Some(Box::pin(stream)),
        }
    }
}

#[async_trait]
impl LineSource for PodLogSource {
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
