//! Worker: parses blocks into records and encodes them into output
//! buffers.
//!
//! A worker owns one parser and one encoder, so its hot path touches no
//! shared state besides the pools. It consumes its input queue strictly
//! FIFO and emits exactly one output buffer per block, which is the
//! invariant the collector's round-robin drain relies on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::encode::Encoder;
use crate::parser::model::{Record, Stat};
use crate::parser::RecordParser;
use crate::pool::{BufferPool, ChunkPool};

/// What a worker hands back when its task finishes.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WorkerReport {
    pub stat: Stat,
    pub encode_errors: u64,
}

pub(crate) struct Worker<P> {
    id: usize,
    parser: P,
    encoder: Box<dyn Encoder>,
    input: mpsc::Receiver<BytesMut>,
    output: mpsc::Sender<BytesMut>,
    buffers: Arc<BufferPool>,
    chunks: Arc<ChunkPool>,
    cancel: CancellationToken,
    encode_errors: u64,
}

impl<P: RecordParser> Worker<P> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        parser: P,
        encoder: Box<dyn Encoder>,
        input: mpsc::Receiver<BytesMut>,
        output: mpsc::Sender<BytesMut>,
        buffers: Arc<BufferPool>,
        chunks: Arc<ChunkPool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            parser,
            encoder,
            input,
            output,
            buffers,
            chunks,
            cancel,
            encode_errors: 0,
        }
    }

    pub(crate) async fn run(mut self) -> WorkerReport {
        loop {
            let block = tokio::select! {
                _ = self.cancel.cancelled() => break,
                block = self.input.recv() => match block {
                    Some(block) => block,
                    None => break, // input closed: clean shutdown
                },
            };

            let mut chunk = self.chunks.acquire();
            self.parser.parse(&block, &mut chunk);
            self.buffers.release(block);

            let mut out = self.buffers.acquire();
            for record in chunk.records() {
                self.encode_record(record, &mut out);
            }
            self.chunks.release(chunk);

            let delivered = tokio::select! {
                _ = self.cancel.cancelled() => false,
                sent = self.output.send(out) => sent.is_ok(),
            };
            if !delivered {
                break;
            }
        }

        WorkerReport {
            stat: self.parser.stat(),
            encode_errors: self.encode_errors,
        }
    }

    /// Encode one record, absorbing both encoder errors and encoder panics.
    ///
    /// A panic (a user value's custom rendering blowing up) must not take
    /// the worker down; partial output is rolled back to the record
    /// boundary and an explicit marker line is emitted in its place.
    fn encode_record(&mut self, record: &Record, out: &mut BytesMut) {
        let mark = out.len();
        let encoder = &mut self.encoder;
        let result = panic::catch_unwind(AssertUnwindSafe(|| encoder.handle(record, out)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.encode_errors += 1;
                out.truncate(mark);
                tracing::warn!(worker = self.id, error = %e, "encoder rejected record");
            }
            Err(payload) => {
                self.encode_errors += 1;
                out.truncate(mark);
                let message = panic_message(payload.as_ref());
                out.extend_from_slice(format!("!PANIC={message}\n").as_bytes());
                tracing::error!(worker = self.id, panic = %message, "encoder panicked, emitted marker");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
