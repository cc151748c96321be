//! Dispatcher: assigns blocks to workers in fixed round-robin order.
//!
//! Each worker input queue is bounded at capacity 1, so at most one block
//! is in flight and one queued per worker; a slow worker throttles the
//! scanner instead of letting blocks pile up. The collector drains worker
//! outputs in the same fixed order, which is what restores global line
//! order.

use bytes::BytesMut;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pool::BufferPool;

pub(crate) struct Dispatcher {
    blocks: mpsc::Receiver<BytesMut>,
    inputs: Vec<mpsc::Sender<BytesMut>>,
    pool: Arc<BufferPool>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        blocks: mpsc::Receiver<BytesMut>,
        inputs: Vec<mpsc::Sender<BytesMut>>,
        pool: Arc<BufferPool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            blocks,
            inputs,
            pool,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut cursor = 0usize;
        loop {
            let block = tokio::select! {
                _ = self.cancel.cancelled() => break,
                block = self.blocks.recv() => match block {
                    Some(block) => block,
                    None => break, // upstream exhausted
                },
            };

            let target = cursor;
            cursor = (cursor + 1) % self.inputs.len();

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                sent = self.inputs[target].send(block) => {
                    if let Err(mpsc::error::SendError(block)) = sent {
                        // The worker already exited and dropped its receiver;
                        // a send never blocks on a dead worker. Skip its share
                        // and keep going.
                        tracing::debug!(worker = target, "worker input closed, dropping block");
                        self.pool.release(block);
                    }
                }
            }
        }
        // Dropping the senders closes every worker's input queue, which
        // cascades shutdown through the workers to the collector.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::default())
    }

    fn block(data: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(data);
        buf
    }

    #[tokio::test]
    async fn test_round_robin_assignment() {
        let (block_tx, block_rx) = mpsc::channel(8);
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        let dispatcher = Dispatcher::new(
            block_rx,
            vec![tx_a, tx_b],
            pool(),
            CancellationToken::new(),
        );
        let handle = tokio::spawn(dispatcher.run());

        for data in [&b"0"[..], b"1", b"2", b"3"] {
            block_tx.send(block(data)).await.unwrap();
        }
        drop(block_tx);
        handle.await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap().as_ref(), b"0");
        assert_eq!(rx_a.recv().await.unwrap().as_ref(), b"2");
        assert!(rx_a.recv().await.is_none(), "inputs must close on shutdown");
        assert_eq!(rx_b.recv().await.unwrap().as_ref(), b"1");
        assert_eq!(rx_b.recv().await.unwrap().as_ref(), b"3");
        assert!(rx_b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dead_worker_is_skipped_without_deadlock() {
        let (block_tx, block_rx) = mpsc::channel(8);
        let (tx_a, rx_a) = mpsc::channel::<BytesMut>(1);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        drop(rx_a); // worker A exited before receiving anything

        let dispatcher = Dispatcher::new(
            block_rx,
            vec![tx_a, tx_b],
            pool(),
            CancellationToken::new(),
        );
        let handle = tokio::spawn(dispatcher.run());

        for data in [&b"0"[..], b"1", b"2", b"3"] {
            block_tx.send(block(data)).await.unwrap();
        }
        drop(block_tx);
        handle.await.unwrap();

        // Worker A's share is dropped; worker B still receives its own.
        assert_eq!(rx_b.recv().await.unwrap().as_ref(), b"1");
        assert_eq!(rx_b.recv().await.unwrap().as_ref(), b"3");
        assert!(rx_b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let cancel = CancellationToken::new();
        let (block_tx, block_rx) = mpsc::channel(8);
        let (tx_a, mut rx_a) = mpsc::channel::<BytesMut>(1);

        let dispatcher = Dispatcher::new(block_rx, vec![tx_a], pool(), cancel.clone());
        let handle = tokio::spawn(dispatcher.run());

        cancel.cancel();
        handle.await.unwrap();

        // Queue closed without any block delivered.
        assert!(rx_a.recv().await.is_none());
        drop(block_tx);
    }
}
