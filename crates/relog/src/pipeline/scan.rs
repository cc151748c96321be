//! Block scanner: splits a raw byte stream into newline-aligned blocks.
//!
//! A block contains only whole lines, so every downstream parse works on
//! self-contained input and no line is ever split across two blocks. The
//! only exception is a final unterminated line at end of stream, which is
//! still emitted as its own block.

use std::io;
use std::mem;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::pool::BufferPool;

/// Smallest amount of spare capacity to ask for before a read.
const MIN_READ_CAPACITY: usize = 4096;

/// Splits an async byte source into newline-terminated blocks drawn from a
/// buffer pool.
///
/// Two buffers drive the state machine: the "current" buffer being filled,
/// and a "pending" leftover holding whatever followed the last newline of
/// the previous read. The pending leftover becomes the start of the next
/// block, so bytes are never re-read and never dropped.
pub struct BlockScanner<R> {
    source: R,
    pool: Arc<BufferPool>,
    current: BytesMut,
    pending: Option<BytesMut>,
    err: Option<io::Error>,
    done: bool,
    eof: bool,
}

impl<R: AsyncRead + Unpin> BlockScanner<R> {
    pub fn new(source: R, pool: Arc<BufferPool>) -> Self {
        Self {
            source,
            pool,
            current: BytesMut::new(),
            pending: None,
            err: None,
            done: false,
            eof: false,
        }
    }

    /// Advance to the next block. Returns `true` when [`block`](Self::block)
    /// holds a fresh block, `false` on end of stream or read error.
    pub async fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        let mut current = match self.pending.take() {
            Some(leftover) => leftover,
            None => {
                if self.eof {
                    self.done = true;
                    return false;
                }
                self.pool.acquire()
            }
        };

        loop {
            if self.eof {
                // Source already exhausted: the leftover is the final,
                // unterminated line.
                self.done = true;
                if current.is_empty() {
                    self.pool.release(current);
                    return false;
                }
                self.current = current;
                return true;
            }

            // Keep the tail writable; doubling keeps long lines from
            // degrading into byte-at-a-time reads.
            if current.capacity() == current.len() {
                let grow = current.capacity().max(MIN_READ_CAPACITY);
                current.reserve(grow);
            }

            let before = current.len();
            match self.source.read_buf(&mut current).await {
                Ok(0) => {
                    self.eof = true;
                }
                Ok(_) => {
                    // Only the newly read segment can contain an unseen
                    // newline; take the last one so a block carries as many
                    // whole lines as a single read produced.
                    let segment = &current[before..];
                    if let Some(position) = memchr::memrchr(b'\n', segment) {
                        let cut = before + position + 1;
                        if cut < current.len() {
                            let mut rest = self.pool.acquire();
                            rest.extend_from_slice(&current[cut..]);
                            self.pending = Some(rest);
                            current.truncate(cut);
                        }
                        self.current = current;
                        return true;
                    }
                }
                Err(e) => {
                    self.err = Some(e);
                    self.done = true;
                    self.pool.release(current);
                    return false;
                }
            }
        }
    }

    /// Take the most recently produced block. Valid only after
    /// [`next`](Self::next) returned `true`.
    pub fn block(&mut self) -> BytesMut {
        mem::take(&mut self.current)
    }

    /// The read error that stopped the scanner, if any. Plain end of
    /// stream is not an error.
    pub fn err(&self) -> Option<&io::Error> {
        self.err.as_ref()
    }

    pub fn into_err(self) -> Option<io::Error> {
        self.err
    }
}
