//! Decimation strategy abstraction.
//!
//! This forms the contract between the protocol layer and the decimation
//! algorithms. A strategy gets one chance to rewrite the outgoing query (and
//! to run the auxiliary step query) before execution, then consumes the
//! resulting row cursor and writes decimated blocks into the caller's sink.

use serde::Deserialize;
use strum_macros::Display;

use crate::bucket::ExtremaDecimator;
use crate::cursor::RowCursor;
use crate::error::DecimationError;
use crate::models::DecimationRequest;
use crate::pushdown::{BucketPushdown, SmoothPushdown};
use crate::query::{ObservationQuery, StoreConnection};
use crate::sink::ResultSink;

/// Trait for decimation strategies.
///
/// Contract: [consume_rows](DecimationStrategy::consume_rows) must only be
/// called after [prepare_query](DecimationStrategy::prepare_query) has
/// completed, since the step information it computes sizes the buckets;
/// calling it first fails with a
/// [Precondition](DecimationError::Precondition) error.
pub trait DecimationStrategy: std::fmt::Debug {
    /// Rewrite the outgoing query before execution.
    ///
    /// Streaming strategies only run the auxiliary step query and strip the
    /// leading predicate keyword when they appended the first filter clause;
    /// pushdown strategies additionally rewrite the projection and ordering.
    ///
    /// # Arguments
    ///
    /// * `query`: The outgoing filtered query
    /// * `main_field_offset`: Offset of the main-field projection in the query
    /// * `is_first_predicate`: Whether the decimator appended the first filter clause
    /// * `conn`: Store connection for the auxiliary step query
    fn prepare_query(
        &mut self,
        query: &mut ObservationQuery,
        main_field_offset: usize,
        is_first_predicate: bool,
        conn: &dyn StoreConnection,
    ) -> Result<(), DecimationError>;

    /// Drain the row cursor, writing decimated blocks into the sink.
    ///
    /// Rows must arrive ordered by the main axis, and by observation id
    /// first for profile series.
    ///
    /// # Arguments
    ///
    /// * `cursor`: Row cursor over the executed query
    /// * `field_offset`: Offset of the first decimated field in the request fields
    /// * `sink`: The caller's result sink
    fn consume_rows(
        &mut self,
        cursor: &mut dyn RowCursor,
        field_offset: usize,
        sink: &mut dyn ResultSink,
    ) -> Result<(), DecimationError>;
}

/// The available decimation strategies
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StrategyKind {
    /// Streaming extrema-preserving decimation in the engine
    Extrema,
    /// Store-side time bucketing with per-field averaging
    Bucket,
    /// Store-side signal smoothing
    Smooth,
}

/// Build a decimation strategy for a request.
///
/// Rejects requests whose main field cannot serve as a decimation axis;
/// this is a configuration error caught before any query runs.
pub fn build_strategy(
    kind: StrategyKind,
    request: DecimationRequest,
) -> Result<Box<dyn DecimationStrategy>, DecimationError> {
    let main = request.main_field();
    if !main.field_type.is_main_capable() {
        return Err(DecimationError::UnsupportedMainFieldType {
            field: main.name.clone(),
            field_type: main.field_type,
        });
    }
    Ok(match kind {
        StrategyKind::Extrema => Box::new(ExtremaDecimator::new(request)),
        StrategyKind::Bucket => Box::new(BucketPushdown::new(request)),
        StrategyKind::Smooth => Box::new(SmoothPushdown::new(request)),
    })
}
