//! Streaming line reader
//!
//! Reads an input file sequentially, splits it into lines and pushes them
//! into the bounded pipeline queue. Reports consumed source bytes through a
//! callback after each line has been committed downstream, so resume offsets
//! only ever point at fully-handled data.
//!
//! Handling at the byte level:
//! - lines are split on `\n`; a single trailing `\r` is stripped
//! - a UTF-8 BOM at the start of the file is skipped exactly once
//! - a final line without a terminating `\n` is still emitted
//!
//! The queue is bounded; the reader prefers a non-blocking `try_send` and
//! falls back to an awaiting send when the queue is full, which is where
//! backpressure from slow workers lands.

use crate::constants::reader::{SEGMENT_SIZE, UTF8_BOM};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Streaming reader for one input file
#[derive(Debug, Clone)]
pub struct LineReader {
    segment_size: usize,
}

impl Default for LineReader {
    fn default() -> Self {
        Self {
            segment_size: SEGMENT_SIZE,
        }
    }
}

impl LineReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the internal read buffer size (mainly for tests)
    #[must_use]
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size.max(16);
        self
    }

    /// Stream `path` line by line into `tx`
    ///
    /// `on_bytes_read` receives the number of source bytes whose consumption
    /// has been committed, once per emitted line (delimiter included).
    /// Returns on EOF, on cancellation, or when the receiving side is gone;
    /// I/O errors propagate to the caller.
    pub async fn run<F>(
        &self,
        path: &Path,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
        mut on_bytes_read: F,
    ) -> io::Result<()>
    where
        F: FnMut(u64) + Send,
    {
        let file = File::open(path).await?;
        let mut reader = BufReader::with_capacity(self.segment_size, file);

        let mut buf: Vec<u8> = Vec::with_capacity(8192);
        let mut first_line = true;
        let mut emitted: u64 = 0;

        loop {
            buf.clear();
            let consumed = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Reader cancelled after {} line(s)", emitted);
                    return Ok(());
                }
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if consumed == 0 {
                break; // EOF
            }

            let mut slice = buf.as_slice();
            if slice.last() == Some(&b'\n') {
                slice = &slice[..slice.len() - 1];
            }
            if slice.last() == Some(&b'\r') {
                slice = &slice[..slice.len() - 1];
            }
            if first_line {
                first_line = false;
                if let Some(rest) = slice.strip_prefix(UTF8_BOM) {
                    slice = rest;
                    // A file holding nothing but a BOM yields zero lines
                    if slice.is_empty() && buf.len() == UTF8_BOM.len() {
                        on_bytes_read(consumed as u64);
                        continue;
                    }
                }
            }

            let line = String::from_utf8_lossy(slice).into_owned();
            match tx.try_send(line) {
                Ok(()) => {}
                Err(TrySendError::Full(line)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Reader cancelled while waiting for queue space");
                            return Ok(());
                        }
                        sent = tx.send(line) => {
                            if sent.is_err() {
                                debug!("Line queue closed; reader stopping early");
                                return Ok(());
                            }
                        }
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Line queue closed; reader stopping early");
                    return Ok(());
                }
            }

            emitted += 1;
            on_bytes_read(consumed as u64);
        }

        debug!("Reader finished: {} line(s) emitted", emitted);
        Ok(())
    }
}
