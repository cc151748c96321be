//! Collector: drains worker outputs in round-robin order and writes them
//! to the sink.
//!
//! The drain order mirrors the dispatcher's assignment order exactly, and
//! each worker is strictly FIFO, so the concatenated output reproduces the
//! original input line order even though workers ran concurrently.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineError;
use crate::pool::BufferPool;

pub(crate) struct Collector<'a, W> {
    outputs: Vec<mpsc::Receiver<BytesMut>>,
    sink: &'a mut W,
    pool: Arc<BufferPool>,
    cancel: CancellationToken,
}

impl<'a, W: AsyncWrite + Unpin> Collector<'a, W> {
    pub(crate) fn new(
        outputs: Vec<mpsc::Receiver<BytesMut>>,
        sink: &'a mut W,
        pool: Arc<BufferPool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outputs,
            sink,
            pool,
            cancel,
        }
    }

    /// Drain until every output queue has closed, or cancellation fires.
    /// Sink failures are fatal and surface as the run error.
    pub(crate) async fn run(&mut self) -> Result<(), PipelineError> {
        let total = self.outputs.len();
        let mut open = vec![true; total];
        let mut remaining = total;
        let mut cursor = 0usize;

        while remaining > 0 {
            if !open[cursor] {
                cursor = (cursor + 1) % total;
                continue;
            }

            let received = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                buffer = self.outputs[cursor].recv() => buffer,
            };

            match received {
                Some(buffer) => {
                    let written = self.sink.write_all(&buffer).await;
                    self.pool.release(buffer);
                    written.map_err(PipelineError::Write)?;
                }
                None => {
                    open[cursor] = false;
                    remaining -= 1;
                }
            }
            cursor = (cursor + 1) % total;
        }

        self.sink.flush().await.map_err(PipelineError::Write)
    }
}
