//! Pipeline orchestration: scanner, dispatcher, workers, collector.
//!
//! # Architecture
//!
//! ```text
//! source -> Scanner -> Dispatcher -> Worker 0..N (parse + encode) -> Collector -> sink
//! ```
//!
//! One tokio task per stage, bounded queues everywhere, ownership of every
//! buffer handed off through the channels. Worker queues are capacity 1 in
//! both directions, and the collector drains outputs in the dispatcher's
//! assignment order, which restores global input order without any
//! sequence numbers.

pub mod scan;

mod collect;
mod dispatch;
mod worker;

pub use scan::BlockScanner;

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::encode::EncoderFactory;
use crate::level::{parse_level, LevelFn};
use crate::parser::model::Stat;
use crate::parser::JsonRecordParser;
use crate::pipeline::collect::Collector;
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::worker::Worker;
use crate::pool::{BufferPool, ChunkPool};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("source read failed: {0}")]
    Read(#[source] io::Error),
    #[error("sink write failed: {0}")]
    Write(#[source] io::Error),
    #[error("pipeline stage failed: {0}")]
    Stage(String),
    #[error("multiple stage failures: {}", join_failures(.0))]
    Multiple(Vec<PipelineError>),
}

fn join_failures(errors: &[PipelineError]) -> String {
    let mut out = String::new();
    for (i, error) in errors.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        out.push_str(&error.to_string());
    }
    out
}

/// Counters accumulated across every worker in one run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub stat: Stat,
    /// Records the encoders rejected or panicked on.
    pub encode_errors: u64,
}

/// A configured, runnable reprocessing pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    encoders: Arc<dyn EncoderFactory>,
    level_fn: Arc<LevelFn>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;
        Ok(Self {
            config,
            encoders,
            level_fn: Arc::new(parse_level),
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the built-in level parser.
    pub fn with_level_parser(mut self, level_fn: Arc<LevelFn>) -> Self {
        self.level_fn = level_fn;
        self
    }

    /// Attach an external cancellation token. Cancelling it makes every
    /// stage unblock promptly and the run return without an error.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this pipeline.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline until the source is exhausted, cancellation fires,
    /// or an I/O error shuts it down.
    ///
    /// Per-line and per-field problems are counted in the returned stats,
    /// never fatal. The error case aggregates every distinct stage failure.
    pub async fn run<R, W>(&self, source: R, sink: &mut W) -> Result<PipelineStats, PipelineError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let cancel = self.cancel.clone();
        let buffers = Arc::new(BufferPool::new(self.config.max_pooled_buffer));
        let chunks = Arc::new(ChunkPool::new(self.config.max_pooled_records));

        tracing::debug!(workers = self.config.workers, "starting pipeline");

        // Stage plumbing. Capacity 1 end to end: one block in flight plus
        // one queued per worker is the whole backpressure story.
        let (block_tx, block_rx) = mpsc::channel::<BytesMut>(1);
        let mut inputs = Vec::with_capacity(self.config.workers);
        let mut outputs = Vec::with_capacity(self.config.workers);
        let mut worker_handles = Vec::with_capacity(self.config.workers);

        for id in 0..self.config.workers {
            let (in_tx, in_rx) = mpsc::channel(1);
            let (out_tx, out_rx) = mpsc::channel(1);
            let parser = JsonRecordParser::from_config(&self.config, Arc::clone(&self.level_fn));
            let worker = Worker::new(
                id,
                parser,
                self.encoders.build(),
                in_rx,
                out_tx,
                Arc::clone(&buffers),
                Arc::clone(&chunks),
                cancel.clone(),
            );
            worker_handles.push(tokio::spawn(worker.run()));
            inputs.push(in_tx);
            outputs.push(out_rx);
        }

        let scan_handle = {
            let pool = Arc::clone(&buffers);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut scanner = BlockScanner::new(source, pool);
                loop {
                    let advanced = tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        advanced = scanner.next() => advanced,
                    };
                    if !advanced {
                        break;
                    }
                    let block = scanner.block();
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        sent = block_tx.send(block) => {
                            if sent.is_err() {
                                // Downstream is gone; nothing left to feed.
                                return Ok(());
                            }
                        }
                    }
                }
                // Dropping block_tx here closes the dispatcher's input and
                // cascades shutdown even when we stopped on a read error.
                match scanner.into_err() {
                    Some(e) => Err(PipelineError::Read(e)),
                    None => Ok(()),
                }
            })
        };

        let dispatch_handle = tokio::spawn(
            Dispatcher::new(block_rx, inputs, Arc::clone(&buffers), cancel.clone()).run(),
        );

        // The collector runs here, on the caller.
        let mut collector = Collector::new(outputs, sink, Arc::clone(&buffers), cancel.clone());
        let collect_result = collector.run().await;
        if collect_result.is_err() {
            // A dead sink must also stop the upstream stages, which would
            // otherwise block forever on their full queues.
            cancel.cancel();
        }

        let mut failures = Vec::new();
        if let Err(e) = collect_result {
            failures.push(e);
        }
        match scan_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(e),
            Err(join) => failures.push(PipelineError::Stage(join.to_string())),
        }
        if let Err(join) = dispatch_handle.await {
            failures.push(PipelineError::Stage(join.to_string()));
        }

        let mut stats = PipelineStats::default();
        for handle in worker_handles {
            match handle.await {
                Ok(report) => {
                    stats.stat.merge(&report.stat);
                    stats.encode_errors += report.encode_errors;
                }
                Err(join) => failures.push(PipelineError::Stage(join.to_string())),
            }
        }

        tracing::debug!(
            lines = stats.stat.lines_total,
            invalid = stats.stat.lines_invalid,
            failures = failures.len(),
            "pipeline finished"
        );

        match failures.len() {
            0 => Ok(stats),
            1 => Err(failures.remove(0)),
            _ => Err(PipelineError::Multiple(failures)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EncodeError, Encoder, JsonEncoder};
    use crate::parser::model::Record;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Serves a byte string `chunk` bytes per read, exercising arbitrary
    /// read boundaries end to end.
    struct ChunkedReader {
        data: Vec<u8>,
        offset: usize,
        chunk: usize,
    }

    impl ChunkedReader {
        fn new(data: &[u8], chunk: usize) -> Self {
            Self {
                data: data.to_vec(),
                offset: 0,
                chunk,
            }
        }
    }

    impl AsyncRead for ChunkedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let remaining = self.data.len() - self.offset;
            let n = remaining.min(self.chunk).min(buf.remaining());
            if n > 0 {
                let offset = self.offset;
                buf.put_slice(&self.data[offset..offset + n]);
                self.offset += n;
            }
            Poll::Ready(Ok(()))
        }
    }

    struct PanickingEncoder;

    impl Encoder for PanickingEncoder {
        fn handle(&mut self, record: &Record, out: &mut BytesMut) -> Result<(), EncodeError> {
            if record.message.as_ref() == "bad" {
                panic!("cannot render this one");
            }
            JsonEncoder.handle(record, out)
        }
    }

    struct PanickingFactory;

    impl EncoderFactory for PanickingFactory {
        fn build(&self) -> Box<dyn Encoder> {
            Box::new(PanickingEncoder)
        }
    }

    fn pipeline(workers: usize) -> Pipeline {
        let config = PipelineConfig {
            workers,
            ..PipelineConfig::default()
        };
        Pipeline::new(config, Arc::new(JsonEncoder)).unwrap()
    }

    async fn run_to_string(pipeline: &Pipeline, input: &'static [u8]) -> (String, PipelineStats) {
        let mut sink = Vec::new();
        let stats = pipeline.run(input, &mut sink).await.unwrap();
        (String::from_utf8(sink).unwrap(), stats)
    }

    fn messages(output: &str) -> Vec<String> {
        output
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["msg"].as_str().unwrap().to_owned()
            })
            .collect()
    }

    // ─── Ordering ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_two_lines_four_workers_keep_order() {
        let p = pipeline(4);
        let (output, stats) = run_to_string(&p, b"{\"msg\":\"a\"}\n{\"msg\":\"b\"}\n").await;
        assert_eq!(messages(&output), ["a", "b"]);
        assert_eq!(stats.stat.lines_total, 2);
    }

    #[tokio::test]
    async fn test_many_lines_keep_order_across_chunked_reads() {
        let mut input = Vec::new();
        for i in 0..200 {
            input.extend_from_slice(format!("{{\"msg\":\"line-{i}\"}}\n").as_bytes());
        }

        for chunk in [1, 7, 64, 4096] {
            let p = pipeline(3);
            let mut sink = Vec::new();
            let stats = p
                .run(ChunkedReader::new(&input, chunk), &mut sink)
                .await
                .unwrap();
            assert_eq!(stats.stat.lines_total, 200, "chunk size {chunk}");

            let output = String::from_utf8(sink).unwrap();
            let expected: Vec<String> = (0..200).map(|i| format!("line-{i}")).collect();
            assert_eq!(messages(&output), expected, "chunk size {chunk}");
        }
    }

    #[tokio::test]
    async fn test_worker_count_does_not_change_output() {
        let mut input = Vec::new();
        for i in 0..50 {
            input.extend_from_slice(
                format!("{{\"level\":\"warn\",\"msg\":\"m{i}\",\"seq\":{i}}}\n").as_bytes(),
            );
        }
        let input: &'static [u8] = input.leak();

        let (single, _) = run_to_string(&pipeline(1), input).await;
        let (parallel, _) = run_to_string(&pipeline(8), input).await;
        assert_eq!(single, parallel);
    }

    // ─── End of stream ──────────────────────────────────────────

    #[tokio::test]
    async fn test_missing_final_newline_still_emits_record() {
        let p = pipeline(2);
        let (output, stats) = run_to_string(&p, b"{\"msg\":\"a\"}\n{\"msg\":\"b\"}").await;
        assert_eq!(messages(&output), ["a", "b"]);
        assert_eq!(stats.stat.lines_total, 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let p = pipeline(2);
        let (output, stats) = run_to_string(&p, b"").await;
        assert!(output.is_empty());
        assert_eq!(stats.stat.lines_total, 0);
    }

    // ─── Degraded input ─────────────────────────────────────────

    #[tokio::test]
    async fn test_invalid_lines_counted_not_fatal() {
        let p = pipeline(2);
        let (output, stats) =
            run_to_string(&p, b"not a json object\n{\"msg\":\"ok\"}\n").await;
        assert_eq!(messages(&output), ["ok"]);
        assert_eq!(stats.stat.lines_total, 2);
        assert_eq!(stats.stat.lines_invalid, 1);
    }

    #[tokio::test]
    async fn test_field_errors_counted_in_summary() {
        let p = pipeline(2);
        let (output, stats) = run_to_string(&p, b"{\"level\":123,\"msg\":\"x\"}\n").await;
        assert_eq!(stats.stat.field_errors, 1);
        assert!(output.contains("\"level\":\"INFO\""));
    }

    #[tokio::test]
    async fn test_encoder_panic_becomes_marker_line() {
        let config = PipelineConfig {
            workers: 2,
            ..PipelineConfig::default()
        };
        let p = Pipeline::new(config, Arc::new(PanickingFactory)).unwrap();
        let (output, stats) =
            run_to_string(&p, b"{\"msg\":\"fine\"}\n{\"msg\":\"bad\"}\n{\"msg\":\"also fine\"}\n")
                .await;

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"fine\""));
        assert_eq!(lines[1], "!PANIC=cannot render this one");
        assert!(lines[2].contains("\"also fine\""));
        assert_eq!(stats.encode_errors, 1);
    }

    // ─── Cancellation and configuration ─────────────────────────

    #[tokio::test]
    async fn test_pre_cancelled_run_returns_clean() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let p = pipeline(2).with_cancellation(cancel);

        let mut sink = Vec::new();
        let stats = p
            .run(&b"{\"msg\":\"never\"}\n"[..], &mut sink)
            .await
            .unwrap();
        assert_eq!(stats.encode_errors, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let config = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        let err = Pipeline::new(config, Arc::new(JsonEncoder)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("workers"));
    }

    #[tokio::test]
    async fn test_custom_level_parser_applies() {
        let custom: Arc<LevelFn> = Arc::new(|token| {
            if token == "notice" {
                Ok(crate::level::Level(2))
            } else {
                parse_level(token)
            }
        });
        let p = pipeline(1).with_level_parser(custom);
        let (output, _) = run_to_string(&p, b"{\"level\":\"notice\",\"msg\":\"x\"}\n").await;
        assert!(output.contains("\"level\":\"INFO+2\""));
    }
}
