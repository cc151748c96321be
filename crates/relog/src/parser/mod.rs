//! Record parsing: model types, the field-role JSON parser, and the
//! parser seam the workers are generic over.

pub mod json;
pub mod model;

mod intern;

// Re-export commonly used types
pub use json::JsonRecordParser;
pub use model::{Attr, Caller, Record, Stat, Value};

use crate::pool::Chunk;

/// Capability the pipeline requires of a parser.
///
/// Each worker owns its own instance, so implementations need no internal
/// synchronization; counters can be plain integers.
pub trait RecordParser: Send {
    /// Parse every line in `block`, appending records to `out`.
    /// Malformed input is counted, never an error.
    fn parse(&mut self, block: &[u8], out: &mut Chunk);

    /// Cumulative counters for this parser instance.
    fn stat(&self) -> Stat;
}
