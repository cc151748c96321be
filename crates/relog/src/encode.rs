//! Encoder boundary.
//!
//! The pipeline treats encoding as an external capability: a worker hands
//! each parsed record to its encoder, which appends bytes to the worker's
//! output buffer. Failures are per-record and non-fatal. `JsonEncoder` is
//! the bundled reference implementation (one compact JSON object per line);
//! richer renderings plug in through the same two traits.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::parser::model::Record;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Renders one record into an output buffer.
///
/// Implementations may keep per-instance state; every worker owns exactly
/// one instance, so no synchronization is needed.
pub trait Encoder: Send {
    fn handle(&mut self, record: &Record, out: &mut BytesMut) -> Result<(), EncodeError>;
}

/// Builds one encoder per worker at pipeline start.
pub trait EncoderFactory: Send + Sync {
    fn build(&self) -> Box<dyn Encoder>;
}

/// Re-emits each record as one compact JSON object per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn handle(&mut self, record: &Record, out: &mut BytesMut) -> Result<(), EncodeError> {
        let mut writer = (&mut *out).writer();
        serde_json::to_writer(&mut writer, record)?;
        out.put_u8(b'\n');
        Ok(())
    }
}

impl EncoderFactory for JsonEncoder {
    fn build(&self) -> Box<dyn Encoder> {
        Box::new(JsonEncoder)
    }
}
