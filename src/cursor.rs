//! Row cursor seam.
//!
//! The backing store executes the (possibly rewritten) query and hands the
//! engine a forward-only cursor over the result rows. The cursor and the
//! underlying connection stay owned by the caller for the duration of one
//! invocation; the engine never closes or reuses them.

use hashbrown::HashMap;

use crate::error::DecimationError;
use crate::types::DValue;

/// Trait for sequential, forward-only access to query result rows.
///
/// Rows must arrive ordered by the strategy's main field, and by observation
/// id first for profile series.
pub trait RowCursor {
    /// Advance to the next row, keyed by the strategy's declared main field.
    ///
    /// Returns false when the cursor is exhausted.
    fn next_on_field(&mut self, field: &str) -> Result<bool, DecimationError>;

    /// Read one cell of the current row by field name.
    fn get(&self, field: &str) -> Result<DValue, DecimationError>;

    /// Read one cell of the current row by field name and joined-table index.
    ///
    /// Profile queries join the observation table; the table index
    /// disambiguates columns that appear in more than one joined table.
    fn get_in_table(&self, field: &str, table: usize) -> Result<DValue, DecimationError>;
}

/// An in-memory [RowCursor] over pre-built rows.
///
/// The test double used by the unit tests and benchmarks; also convenient
/// for callers exercising strategies without a store.
#[derive(Debug, Default)]
pub struct MemoryCursor {
    rows: Vec<HashMap<String, DValue>>,
    // Index of the current row plus one; 0 means before the first row.
    position: usize,
}

impl MemoryCursor {
    /// Return a new MemoryCursor over the given rows.
    pub fn new(rows: Vec<HashMap<String, DValue>>) -> Self {
        MemoryCursor { rows, position: 0 }
    }

    fn current(&self) -> Result<&HashMap<String, DValue>, DecimationError> {
        self.position
            .checked_sub(1)
            .and_then(|index| self.rows.get(index))
            .ok_or(DecimationError::Precondition {
                reason: "cursor read before first advance",
            })
    }
}

impl RowCursor for MemoryCursor {
    fn next_on_field(&mut self, _field: &str) -> Result<bool, DecimationError> {
        if self.position < self.rows.len() {
            self.position += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn get(&self, field: &str) -> Result<DValue, DecimationError> {
        self.current()?
            .get(field)
            .cloned()
            .ok_or_else(|| DecimationError::MissingField {
                name: field.to_string(),
            })
    }

    fn get_in_table(&self, field: &str, _table: usize) -> Result<DValue, DecimationError> {
        // A memory cursor holds one flat table.
        self.get(field)
    }
}
