//! Outgoing query surface.
//!
//! Decimators receive the outgoing filtered query as a mutable token
//! sequence with named anchor points: a projection list (the main-field
//! projection is addressed by offset), a predicate list and ordering
//! clauses. The backing language is SQL, but the engine never parses it:
//! replacing a projection, appending grouping clauses and stripping a
//! leading boolean keyword are the only operations, per the contract with
//! the store layer.

use crate::error::DecimationError;
use crate::step::SeriesKey;

/// A mutable representation of the outgoing filtered query.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationQuery {
    projections: Vec<String>,
    from: String,
    predicates: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
}

impl ObservationQuery {
    /// Return a new ObservationQuery with the given projections and FROM clause.
    pub fn new(projections: Vec<String>, from: &str) -> Self {
        ObservationQuery {
            projections,
            from: from.to_string(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    /// The projection expression at the given offset.
    pub fn projection(&self, offset: usize) -> Option<&str> {
        self.projections.get(offset).map(String::as_str)
    }

    /// Replace the projection expression at the given offset.
    ///
    /// Returns false when the offset is out of range.
    pub fn replace_projection(&mut self, offset: usize, expression: &str) -> bool {
        match self.projections.get_mut(offset) {
            Some(entry) => {
                *entry = expression.to_string();
                true
            }
            None => false,
        }
    }

    /// Append a filter clause.
    pub fn push_predicate(&mut self, clause: &str) {
        self.predicates.push(clause.to_string());
    }

    /// Strip a leading boolean keyword from the first filter clause.
    ///
    /// Filter clauses are built with a leading `AND` by the protocol layer;
    /// when the decimator is the first filter appended the keyword has
    /// nothing to connect to and must go. Returns whether anything changed.
    pub fn strip_leading_keyword(&mut self, keyword: &str) -> bool {
        if let Some(first) = self.predicates.first_mut() {
            if let Some(stripped) = first.strip_prefix(keyword) {
                *first = stripped.trim_start().to_string();
                return true;
            }
        }
        false
    }

    /// Append a GROUP BY column.
    pub fn push_group_by(&mut self, column: &str) {
        self.group_by.push(column.to_string());
    }

    /// Append an ORDER BY column.
    pub fn push_order_by(&mut self, column: &str) {
        self.order_by.push(column.to_string());
    }

    /// Render the query to SQL text.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.projections.join(", "), self.from);
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql
    }

    /// Derive the auxiliary extents query for the main projection.
    ///
    /// Computes the min/max envelope of the main axis over the same filtered
    /// row set, grouped by a series-key column when one is given.
    pub fn extents_sql(&self, main_offset: usize, group_column: Option<&str>) -> String {
        let main = self
            .projections
            .get(main_offset)
            .map(String::as_str)
            .unwrap_or_default();
        let mut sql = match group_column {
            Some(column) => format!("SELECT {column}, MIN({main}), MAX({main}) FROM {}", self.from),
            None => format!("SELECT MIN({main}), MAX({main}) FROM {}", self.from),
        };
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" "));
        }
        if let Some(column) = group_column {
            sql.push_str(&format!(" GROUP BY {column} ORDER BY {column}"));
        }
        sql
    }
}

/// The min/max envelope of one series' main axis, from the auxiliary query.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesExtent {
    /// The series the envelope belongs to
    pub key: SeriesKey,
    /// Minimum main-axis value
    pub min: f64,
    /// Maximum main-axis value
    pub max: f64,
}

/// Trait for the store connection surface the engine consults.
///
/// The one operation the engine needs from the store outside of row
/// iteration: executing the auxiliary extents query. Retries, pooling and
/// transactions belong to the caller.
pub trait StoreConnection {
    /// Execute an extents query, returning one row per series key.
    fn fetch_extents(&self, sql: &str) -> Result<Vec<SeriesExtent>, DecimationError>;
}

/// A [StoreConnection] answering every extents query from a fixed list.
///
/// The test double used by the unit tests and benchmarks.
#[derive(Debug, Default)]
pub struct StaticExtents(pub Vec<SeriesExtent>);

impl StoreConnection for StaticExtents {
    fn fetch_extents(&self, _sql: &str) -> Result<Vec<SeriesExtent>, DecimationError> {
        Ok(self.0.clone())
    }
}
