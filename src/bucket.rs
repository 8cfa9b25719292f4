//! Extrema-preserving streaming decimation.
//!
//! The default strategy. Rows are folded bucket by bucket along the main
//! axis; each bucket keeps the running minimum and maximum of every
//! non-main field and emits at most two blocks when it closes, so the
//! decimated series never discards a true local extremum. Buckets are sized
//! for half the requested width, keeping the emitted block count near the
//! request.

use std::collections::BTreeSet;

use tracing::debug;

use crate::cursor::RowCursor;
use crate::error::DecimationError;
use crate::models::{DecimationRequest, Field, FieldType};
use crate::query::{ObservationQuery, StoreConnection};
use crate::sink::ResultSink;
use crate::step::{
    axis_to_i64, axis_to_native, compute_steps, SeriesGrouping, SeriesKey, StepInfo,
};
use crate::strategy::DecimationStrategy;
use crate::types::DValue;

/// Column carrying the observation id in profile queries.
const OID_COLUMN: &str = "oid";
/// Column carrying the observation start time in profile queries.
const OBS_TIME_COLUMN: &str = "time_begin";
/// Joined-table index of the observations table in profile queries.
const OBS_TABLE: usize = 1;

fn oid_field() -> Field {
    Field::new(OID_COLUMN, FieldType::Other, 0, 0)
}

fn obs_time_field() -> Field {
    Field::new(OBS_TIME_COLUMN, FieldType::Time, 0, 0)
}

/// Which end of a bucket's envelope a block carries.
#[derive(Clone, Copy)]
enum Extreme {
    Low,
    High,
}

/// Running envelope of one non-main field within a bucket.
#[derive(Clone, Debug)]
enum FieldAgg {
    Numeric { min: f64, max: f64, seen: bool },
    Text { last: Option<String> },
}

impl FieldAgg {
    fn for_field(field: &Field) -> Self {
        match field.field_type {
            FieldType::Quantity | FieldType::Time => FieldAgg::Numeric {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                seen: false,
            },
            FieldType::Text | FieldType::Other => FieldAgg::Text { last: None },
        }
    }

    fn update(&mut self, field: &Field, value: &DValue) -> Result<(), DecimationError> {
        match self {
            FieldAgg::Numeric { min, max, seen } => {
                if !value.is_null() {
                    let double = value.as_double(&field.name)?;
                    *min = min.min(double);
                    *max = max.max(double);
                    *seen = true;
                }
            }
            FieldAgg::Text { last } => {
                if let Ok(text) = value.as_text(&field.name) {
                    *last = Some(text.to_string());
                }
            }
        }
        Ok(())
    }

    /// Whether the bucket envelope of this field has collapsed to one value.
    fn is_flat(&self) -> bool {
        match self {
            FieldAgg::Numeric { min, max, seen } => !seen || min == max,
            FieldAgg::Text { .. } => true,
        }
    }
}

/// Working state of the bucket currently being filled.
///
/// Consumed exactly once when the bucket closes, either because a row's
/// main value moved past `start + step` or because the series ended.
#[derive(Debug)]
struct StepValues {
    start: i64,
    step: i64,
    seen_main: BTreeSet<i64>,
    fields: Vec<FieldAgg>,
}

impl StepValues {
    fn new(start: i64, step: i64, fields: &[Field]) -> Self {
        StepValues {
            start,
            step,
            seen_main: BTreeSet::new(),
            fields: fields.iter().map(FieldAgg::for_field).collect(),
        }
    }

    fn is_flat(&self) -> bool {
        self.fields.iter().all(FieldAgg::is_flat)
    }
}

/// Per-series state carried across buckets.
struct SeriesContext {
    key: SeriesKey,
    companion_oid: Option<i64>,
    companion_time: Option<i64>,
    first_bucket: bool,
}

/// The extrema-preserving streaming decimation strategy.
#[derive(Debug)]
pub struct ExtremaDecimator {
    request: DecimationRequest,
    steps: Option<hashbrown::HashMap<SeriesKey, StepInfo>>,
}

impl ExtremaDecimator {
    /// Return a new ExtremaDecimator for a request.
    pub fn new(request: DecimationRequest) -> Self {
        ExtremaDecimator {
            request,
            steps: None,
        }
    }

    /// Non-main fields at or past the given offset, in output order.
    fn decimated_fields(&self, field_offset: usize) -> Vec<Field> {
        let main_index = self.request.main_field().index;
        let mut fields: Vec<Field> = self
            .request
            .fields
            .iter()
            .filter(|f| f.index != main_index && f.index >= field_offset)
            .cloned()
            .collect();
        fields.sort_by_key(|f| f.index);
        fields
    }
}

impl DecimationStrategy for ExtremaDecimator {
    fn prepare_query(
        &mut self,
        query: &mut ObservationQuery,
        main_field_offset: usize,
        is_first_predicate: bool,
        conn: &dyn StoreConnection,
    ) -> Result<(), DecimationError> {
        if is_first_predicate {
            query.strip_leading_keyword("AND");
        }
        // Each bucket may emit two blocks, so half the requested width keeps
        // the block count near the request.
        let target = (self.request.width / 2).max(1);
        let grouping = if self.request.procedure.is_profile {
            SeriesGrouping::ByObservation
        } else {
            SeriesGrouping::Whole
        };
        let steps = compute_steps(
            conn,
            query,
            self.request.main_field(),
            main_field_offset,
            target,
            grouping,
        )?;
        debug!(series = steps.len(), target, "step information computed");
        self.steps = Some(steps);
        Ok(())
    }

    fn consume_rows(
        &mut self,
        cursor: &mut dyn RowCursor,
        field_offset: usize,
        sink: &mut dyn ResultSink,
    ) -> Result<(), DecimationError> {
        let steps = self
            .steps
            .as_ref()
            .ok_or(DecimationError::Precondition {
                reason: "consume_rows called before prepare_query",
            })?;
        let main = self.request.main_field().clone();
        let is_profile = self.request.procedure.is_profile;
        let profile_time = is_profile && self.request.profile_time;
        let fields = self.decimated_fields(field_offset);

        let mut series: Option<SeriesContext> = None;
        let mut bucket: Option<StepValues> = None;

        while cursor.next_on_field(&main.name)? {
            // Resolve everything fallible for this row before touching the
            // sink, so an abort never strands an open block.
            let key = if is_profile {
                SeriesKey::Observation(cursor.get(OID_COLUMN)?.as_long(OID_COLUMN)?)
            } else {
                SeriesKey::Whole
            };
            let main_value = axis_to_i64(&main, &cursor.get(&main.name)?)?;
            let row: Vec<DValue> = fields
                .iter()
                .map(|f| cursor.get(&f.name))
                .collect::<Result<_, _>>()?;

            if series.as_ref().map_or(true, |s| s.key != key) {
                if let (Some(ctx), Some(values)) = (series.take(), bucket.take()) {
                    emit_bucket(sink, &main, &fields, &ctx, values, true, profile_time);
                }
                let info =
                    steps
                        .get(&key)
                        .copied()
                        .ok_or(DecimationError::Precondition {
                            reason: "no step information for series",
                        })?;
                let companion_oid = match &key {
                    SeriesKey::Observation(oid) => Some(*oid),
                    _ => None,
                };
                let companion_time = if profile_time {
                    Some(
                        cursor
                            .get_in_table(OBS_TIME_COLUMN, OBS_TABLE)?
                            .as_time(OBS_TIME_COLUMN)?,
                    )
                } else {
                    None
                };
                series = Some(SeriesContext {
                    key,
                    companion_oid,
                    companion_time,
                    first_bucket: true,
                });
                bucket = Some(StepValues::new(info.start, info.step, &fields));
            }

            let ctx = series.as_mut().expect("series context set above");
            let values = bucket.as_mut().expect("bucket state set above");
            if values.step > 0 && main_value > values.start + values.step {
                // Close the bucket, then advance the origin by whole
                // multiples of the step until the value is contained.
                let step = values.step;
                let gap = main_value - (values.start + step);
                let advance = ((gap + step - 1) / step) * step;
                let next_start = values.start + advance;
                let closed =
                    std::mem::replace(values, StepValues::new(next_start, step, &fields));
                emit_bucket(sink, &main, &fields, ctx, closed, false, profile_time);
                ctx.first_bucket = false;
            }

            values.seen_main.insert(main_value);
            for ((field, agg), value) in fields.iter().zip(values.fields.iter_mut()).zip(&row) {
                agg.update(field, value)?;
            }
        }

        if let (Some(ctx), Some(values)) = (series.take(), bucket.take()) {
            emit_bucket(sink, &main, &fields, &ctx, values, true, profile_time);
        }
        Ok(())
    }
}

/// Flush one closed bucket into the sink.
///
/// Emits one or two blocks depending on what the bucket saw:
/// a single distinct main value reproduces the original sample exactly; a
/// flat interior bucket collapses to its midpoint; everything else emits the
/// envelope as a minima block and a maxima block, pinned to the exact bucket
/// boundaries when the bucket opens or closes its series.
fn emit_bucket(
    sink: &mut dyn ResultSink,
    main: &Field,
    fields: &[Field],
    ctx: &SeriesContext,
    values: StepValues,
    is_last: bool,
    profile_time: bool,
) {
    if values.seen_main.is_empty() {
        return;
    }
    let is_first = ctx.first_bucket;
    if values.seen_main.len() == 1 {
        let at = *values.seen_main.iter().next().expect("non-empty set");
        write_block(sink, main, fields, ctx, at, Extreme::Low, &values, profile_time);
    } else if values.is_flat() && is_first && is_last {
        write_block(
            sink,
            main,
            fields,
            ctx,
            values.start,
            Extreme::Low,
            &values,
            profile_time,
        );
    } else if values.is_flat() && !is_first && !is_last {
        let midpoint = values.start + values.step / 2;
        write_block(
            sink,
            main,
            fields,
            ctx,
            midpoint,
            Extreme::Low,
            &values,
            profile_time,
        );
    } else {
        // Boundary buckets pin their blocks to the exact bucket edges so the
        // decimated series keeps the original's outermost samples.
        let low_at = if is_first {
            values.start
        } else {
            values.start + values.step / 3
        };
        let high_at = if is_last {
            values.start + values.step
        } else {
            values.start + 2 * values.step / 3
        };
        write_block(sink, main, fields, ctx, low_at, Extreme::Low, &values, profile_time);
        write_block(
            sink,
            main,
            fields,
            ctx,
            high_at,
            Extreme::High,
            &values,
            profile_time,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn write_block(
    sink: &mut dyn ResultSink,
    main: &Field,
    fields: &[Field],
    ctx: &SeriesContext,
    at: i64,
    which: Extreme,
    values: &StepValues,
    profile_time: bool,
) {
    sink.new_block();
    if let Some(oid) = ctx.companion_oid {
        sink.append_long(Some(oid), &oid_field());
        if profile_time {
            sink.append_time(ctx.companion_time, &obs_time_field());
        }
    }
    match main.field_type {
        FieldType::Time => sink.append_time(Some(at), main),
        _ => sink.append_double(Some(axis_to_native(main, at)), main),
    }
    for (field, agg) in fields.iter().zip(values.fields.iter()) {
        match agg {
            FieldAgg::Numeric { min, max, seen } => {
                let value = seen.then(|| match which {
                    Extreme::Low => *min,
                    Extreme::High => *max,
                });
                match field.field_type {
                    FieldType::Time => sink.append_time(value.map(|v| v as i64), field),
                    _ => sink.append_double(value, field),
                }
            }
            FieldAgg::Text { last } => sink.append_string(last.as_deref(), field),
        }
    }
    sink.end_block();
}

#[cfg(test)]
mod tests {
    use super::*;

    use hashbrown::HashMap;

    use crate::cursor::MemoryCursor;
    use crate::query::{SeriesExtent, StaticExtents};
    use crate::sink::BlockBuffer;
    use crate::test_utils;
    use crate::types::DValue;

    /// Rows for a plain time series with one quantity field.
    fn series_rows(samples: &[(i64, f64)]) -> Vec<HashMap<String, DValue>> {
        samples
            .iter()
            .map(|(time, value)| {
                let mut row = HashMap::new();
                row.insert("time".to_string(), DValue::Time(*time));
                row.insert("temperature".to_string(), DValue::Double(*value));
                row.insert("salinity".to_string(), DValue::Double(35.0));
                row
            })
            .collect()
    }

    /// Prepare a decimator against extents matching the sample range.
    fn prepared(
        request: crate::models::DecimationRequest,
        extents: Vec<SeriesExtent>,
    ) -> ExtremaDecimator {
        let mut decimator = ExtremaDecimator::new(request);
        let conn = StaticExtents(extents);
        let mut query = test_utils::get_test_query();
        decimator.prepare_query(&mut query, 0, false, &conn).unwrap();
        decimator
    }

    fn whole_extent(min: f64, max: f64) -> Vec<SeriesExtent> {
        vec![SeriesExtent {
            key: SeriesKey::Whole,
            min,
            max,
        }]
    }

    /// Main-axis value of an emitted block (column 0 for plain series).
    fn block_time(block: &[DValue]) -> i64 {
        block[0].as_time("time").unwrap()
    }

    /// Temperature value of an emitted block (column 1 for plain series).
    fn block_temperature(block: &[DValue]) -> f64 {
        block[1].as_double("temperature").unwrap()
    }

    #[test]
    fn test_hundred_samples_width_ten() {
        // 100 samples evenly spaced over 99 s, values 0..99, width 10:
        // 5 buckets of 19.8 s, two blocks each, boundary-exact edges.
        let samples: Vec<(i64, f64)> = (0..100).map(|i| (i * 1000, i as f64)).collect();
        let mut decimator =
            prepared(test_utils::get_test_request(), whole_extent(0.0, 99_000.0));
        let mut cursor = MemoryCursor::new(series_rows(&samples));
        let mut sink = BlockBuffer::new();
        decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap();

        let blocks = sink.into_blocks();
        assert_eq!(10, blocks.len());
        // First block pins the exact original lower boundary sample.
        assert_eq!(0, block_time(&blocks[0]));
        assert_eq!(0.0, block_temperature(&blocks[0]));
        // Last block pins the exact upper boundary.
        assert_eq!(99_000, block_time(&blocks[9]));
        assert_eq!(99.0, block_temperature(&blocks[9]));
        // Extrema preservation over the whole series.
        let min = blocks
            .iter()
            .map(|b| block_temperature(b))
            .fold(f64::INFINITY, f64::min);
        let max = blocks
            .iter()
            .map(|b| block_temperature(b))
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(0.0, min);
        assert_eq!(99.0, max);
        // Blocks are ordered along the main axis.
        let times: Vec<i64> = blocks.iter().map(|b| block_time(b)).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, times);
    }

    #[test]
    fn test_single_row() {
        let mut decimator =
            prepared(test_utils::get_test_request(), whole_extent(5_000.0, 5_000.0));
        let mut cursor = MemoryCursor::new(series_rows(&[(5_000, 17.5)]));
        let mut sink = BlockBuffer::new();
        decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap();

        let blocks = sink.into_blocks();
        assert_eq!(1, blocks.len());
        assert_eq!(5_000, block_time(&blocks[0]));
        assert_eq!(17.5, block_temperature(&blocks[0]));
    }

    #[test]
    fn test_flat_series_collapses_interior_buckets() {
        // Constant fields: one block per interior bucket, boundary-exact
        // first and last buckets.
        let samples: Vec<(i64, f64)> = (0..100).map(|i| (i * 1000, 42.0)).collect();
        let mut decimator =
            prepared(test_utils::get_test_request(), whole_extent(0.0, 99_000.0));
        let mut cursor = MemoryCursor::new(series_rows(&samples));
        let mut sink = BlockBuffer::new();
        decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap();

        let blocks = sink.into_blocks();
        // 5 buckets: 2 + 1 + 1 + 1 + 2.
        assert_eq!(7, blocks.len());
        assert_eq!(0, block_time(&blocks[0]));
        assert_eq!(99_000, block_time(&blocks[6]));
        assert!(blocks.iter().all(|b| block_temperature(b) == 42.0));
    }

    #[test]
    fn test_block_count_within_width() {
        // A tiny axis span exercises the ceiling in the step derivation.
        let samples: Vec<(i64, f64)> = (0..10).map(|i| (i, (i % 3) as f64)).collect();
        let mut decimator = prepared(test_utils::get_test_request(), whole_extent(0.0, 9.0));
        let mut cursor = MemoryCursor::new(series_rows(&samples));
        let mut sink = BlockBuffer::new();
        decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap();
        assert!(sink.len() <= 10);
    }

    #[test]
    fn test_extrema_preserved_with_spikes() {
        // A narrow spike deep inside a bucket must survive decimation.
        let mut samples: Vec<(i64, f64)> = (0..100).map(|i| (i * 1000, 10.0)).collect();
        samples[37].1 = -500.0;
        samples[61].1 = 900.0;
        let mut decimator =
            prepared(test_utils::get_test_request(), whole_extent(0.0, 99_000.0));
        let mut cursor = MemoryCursor::new(series_rows(&samples));
        let mut sink = BlockBuffer::new();
        decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap();

        let temperatures: Vec<f64> = sink
            .blocks()
            .iter()
            .map(|b| block_temperature(b))
            .collect();
        assert_eq!(
            -500.0,
            temperatures.iter().copied().fold(f64::INFINITY, f64::min)
        );
        assert_eq!(
            900.0,
            temperatures
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max)
        );
    }

    #[test]
    fn test_profile_series_flush_between_observations() {
        let request = test_utils::get_test_profile_request();
        let extents = vec![
            SeriesExtent {
                key: SeriesKey::Observation(1),
                min: 0.0,
                max: 10.0,
            },
            SeriesExtent {
                key: SeriesKey::Observation(2),
                min: 0.0,
                max: 10.0,
            },
        ];
        let mut decimator = prepared(request, extents);

        // Two observations of three rows each, ordered by oid then depth.
        let mut rows = Vec::new();
        for oid in [1_i64, 2] {
            for (depth, value) in [(0.0, 4.0), (5.0, 8.0), (10.0, 6.0)] {
                let mut row = HashMap::new();
                row.insert("oid".to_string(), DValue::Long(oid));
                row.insert("time_begin".to_string(), DValue::Time(1_000 * oid));
                row.insert("depth".to_string(), DValue::Double(depth));
                row.insert("temperature".to_string(), DValue::Double(value));
                rows.push(row);
            }
        }
        let mut cursor = MemoryCursor::new(rows);
        let mut sink = BlockBuffer::new();
        decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap();

        let blocks = sink.into_blocks();
        assert!(!blocks.is_empty());
        // Every block leads with its observation id and start time.
        for block in &blocks {
            let oid = block[0].as_long("oid").unwrap();
            assert!(oid == 1 || oid == 2);
            assert_eq!(1_000 * oid, block[1].as_time("time_begin").unwrap());
        }
        // Both observations are represented.
        assert!(blocks.iter().any(|b| b[0] == DValue::Long(1)));
        assert!(blocks.iter().any(|b| b[0] == DValue::Long(2)));
        // Extrema of each observation survive.
        let values: Vec<f64> = blocks
            .iter()
            .filter(|b| b[0] == DValue::Long(1))
            .map(|b| b[3].as_double("temperature").unwrap())
            .collect();
        assert!(values.contains(&4.0));
        assert!(values.contains(&8.0));
    }

    #[test]
    fn test_consume_before_prepare() {
        let mut decimator = ExtremaDecimator::new(test_utils::get_test_request());
        let mut cursor = MemoryCursor::new(vec![]);
        let mut sink = BlockBuffer::new();
        let error = decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap_err();
        assert_eq!(
            "precondition violated: consume_rows called before prepare_query",
            error.to_string()
        );
    }

    #[test]
    fn test_abort_leaves_sink_well_formed() {
        let mut decimator =
            prepared(test_utils::get_test_request(), whole_extent(0.0, 99_000.0));
        // The second row is missing the temperature column, aborting the run.
        let mut rows = series_rows(&[(0, 1.0)]);
        let mut broken = HashMap::new();
        broken.insert("time".to_string(), DValue::Time(1_000));
        rows.push(broken);
        let mut cursor = MemoryCursor::new(rows);
        let mut sink = BlockBuffer::new();
        assert!(decimator.consume_rows(&mut cursor, 0, &mut sink).is_err());
        // No partially-open block: into_blocks asserts the sink is closed.
        sink.into_blocks();
    }

    #[test]
    fn test_empty_cursor() {
        let mut decimator =
            prepared(test_utils::get_test_request(), whole_extent(0.0, 1.0));
        let mut cursor = MemoryCursor::new(vec![]);
        let mut sink = BlockBuffer::new();
        decimator.consume_rows(&mut cursor, 0, &mut sink).unwrap();
        assert!(sink.is_empty());
    }
}
