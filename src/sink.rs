//! Result sink.
//!
//! Decimation strategies emit their output one block (logical row) at a time
//! into a sink owned by the caller. The sink is append-only: strategies
//! write, the caller's serialization layer reads.

use crate::models::Field;
use crate::types::DValue;

/// Trait for decimation output sinks.
///
/// Blocks are atomic: every [new_block](ResultSink::new_block) must be
/// followed by exactly one [end_block](ResultSink::end_block) before the
/// next block opens. Violating this order is a programming error, not a
/// recoverable runtime condition, so implementations panic on misuse.
/// Strategies resolve every fallible value before opening a block, which
/// keeps the sink well formed when an invocation is aborted mid-cursor.
pub trait ResultSink {
    /// Open a new output block.
    fn new_block(&mut self);

    /// Append a timestamp cell to the open block.
    fn append_time(&mut self, value: Option<i64>, field: &Field);

    /// Append an integer cell to the open block.
    fn append_long(&mut self, value: Option<i64>, field: &Field);

    /// Append a floating point cell to the open block.
    fn append_double(&mut self, value: Option<f64>, field: &Field);

    /// Append a text cell to the open block.
    fn append_string(&mut self, value: Option<&str>, field: &Field);

    /// Close the open block.
    fn end_block(&mut self);
}

/// In-memory [ResultSink] retaining blocks as rows of [DValue].
///
/// The implementation used by the test suite and by callers that serialize
/// from owned values.
#[derive(Debug, Default)]
pub struct BlockBuffer {
    blocks: Vec<Vec<DValue>>,
    current: Option<Vec<DValue>>,
}

impl BlockBuffer {
    /// Return a new empty BlockBuffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed blocks, in emission order.
    pub fn blocks(&self) -> &[Vec<DValue>] {
        &self.blocks
    }

    /// Consume the buffer, returning the completed blocks.
    pub fn into_blocks(self) -> Vec<Vec<DValue>> {
        assert!(self.current.is_none(), "block left open in sink");
        self.blocks
    }

    /// Number of completed blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block has been completed.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn push(&mut self, value: DValue) {
        self.current
            .as_mut()
            .expect("append called with no open block")
            .push(value);
    }
}

impl ResultSink for BlockBuffer {
    fn new_block(&mut self) {
        assert!(
            self.current.is_none(),
            "new_block called with an open block"
        );
        self.current = Some(Vec::new());
    }

    fn append_time(&mut self, value: Option<i64>, _field: &Field) {
        self.push(value.map_or(DValue::Null, DValue::Time));
    }

    fn append_long(&mut self, value: Option<i64>, _field: &Field) {
        self.push(value.map_or(DValue::Null, DValue::Long));
    }

    fn append_double(&mut self, value: Option<f64>, _field: &Field) {
        self.push(value.map_or(DValue::Null, DValue::Double));
    }

    fn append_string(&mut self, value: Option<&str>, _field: &Field) {
        self.push(value.map_or(DValue::Null, |v| DValue::Text(v.to_string())));
    }

    fn end_block(&mut self) {
        let block = self.current.take().expect("end_block with no open block");
        self.blocks.push(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::FieldType;

    fn time_field() -> Field {
        Field::new("time", FieldType::Time, 0, 0)
    }

    #[test]
    fn test_block_roundtrip() {
        let mut sink = BlockBuffer::new();
        sink.new_block();
        sink.append_time(Some(1000), &time_field());
        sink.append_double(Some(1.5), &time_field());
        sink.append_string(None, &time_field());
        sink.end_block();
        assert_eq!(1, sink.len());
        assert_eq!(
            vec![vec![DValue::Time(1000), DValue::Double(1.5), DValue::Null]],
            sink.into_blocks()
        );
    }

    #[test]
    fn test_empty() {
        let sink = BlockBuffer::new();
        assert!(sink.is_empty());
        assert!(sink.into_blocks().is_empty());
    }

    #[test]
    #[should_panic(expected = "new_block called with an open block")]
    fn test_unbalanced_new_block() {
        let mut sink = BlockBuffer::new();
        sink.new_block();
        sink.new_block();
    }

    #[test]
    #[should_panic(expected = "end_block with no open block")]
    fn test_unbalanced_end_block() {
        let mut sink = BlockBuffer::new();
        sink.end_block();
    }

    #[test]
    #[should_panic(expected = "append called with no open block")]
    fn test_append_outside_block() {
        let mut sink = BlockBuffer::new();
        sink.append_long(Some(1), &time_field());
    }
}
