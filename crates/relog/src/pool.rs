//! Pooled buffers and record batches.
//!
//! Every stage of the pipeline borrows its working memory from these pools
//! instead of allocating per block. The pools enforce a capacity ceiling:
//! an object whose backing storage grew past the ceiling (one oversized log
//! line is enough) is dropped on release instead of being kept, so a burst
//! of huge lines cannot pin memory for the rest of the run.

use std::sync::Mutex;

use bytes::BytesMut;

use crate::parser::model::Record;

/// Initial capacity of a freshly allocated buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Largest buffer capacity the pool will retain (1 MiB).
pub const MAX_POOLED_BUFFER: usize = 1 << 20;

/// Largest record count a pooled chunk may retain.
pub const MAX_POOLED_RECORDS: usize = 8192;

/// A pooled, ordered batch of parsed records produced from one block.
#[derive(Debug, Default)]
pub struct Chunk {
    records: Vec<Record>,
}

impl Chunk {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Free-list of reusable byte buffers.
///
/// `acquire` hands out a zero-length buffer with whatever backing storage a
/// previous release left behind (or a fresh allocation). `release` returns a
/// buffer to the list only if its capacity is at or below the ceiling.
/// Safe to share across stages behind an `Arc`.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_capacity: usize,
}

impl BufferPool {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_capacity,
        }
    }

    /// Take a zero-length buffer from the pool, allocating if empty.
    pub fn acquire(&self) -> BytesMut {
        let pooled = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        pooled.unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY))
    }

    /// Reset a buffer and return it to the pool.
    ///
    /// Buffers that grew beyond `max_capacity` are discarded; ordinary
    /// memory reclamation takes them.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_capacity {
            return;
        }
        buf.clear();
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(buf);
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(MAX_POOLED_BUFFER)
    }
}

/// Free-list of reusable record chunks, same contract as [`BufferPool`]
/// with the ceiling expressed in records rather than bytes.
#[derive(Debug)]
pub struct ChunkPool {
    free: Mutex<Vec<Chunk>>,
    max_records: usize,
}

impl ChunkPool {
    pub fn new(max_records: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_records,
        }
    }

    pub fn acquire(&self) -> Chunk {
        let pooled = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        pooled.unwrap_or_default()
    }

    pub fn release(&self, mut chunk: Chunk) {
        if chunk.capacity() > self.max_records {
            return;
        }
        chunk.clear();
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(chunk);
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new(MAX_POOLED_RECORDS)
    }
}
