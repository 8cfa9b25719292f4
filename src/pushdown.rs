//! SQL-pushdown decimation.
//!
//! Used when the backing store supports native time-bucketing or signal
//! smoothing. The reduction happens inside the store: the outgoing query's
//! projection is rewritten into a bucketing/aggregating expression, so the
//! rows reaching the engine are already decimated and
//! [consume_rows](crate::strategy::DecimationStrategy::consume_rows)
//! degenerates to a pass-through copy.
//!
//! The trade-off against the streaming decimator: a store aggregate such as
//! an average is not guaranteed to reproduce the true min/max envelope, in
//! exchange for reduced data transfer and backend-accelerated smoothing that
//! cannot be reproduced client-side.

use tracing::debug;

use crate::cursor::RowCursor;
use crate::error::DecimationError;
use crate::models::{DecimationRequest, Field, FieldType};
use crate::query::{ObservationQuery, StoreConnection};
use crate::sink::ResultSink;
use crate::step::{compute_steps, SeriesGrouping, SeriesKey, StepInfo};
use crate::strategy::DecimationStrategy;
use crate::types::DValue;

/// Column carrying the observation id in profile queries.
const OID_COLUMN: &str = "oid";
/// Name of the synthesized bucket column.
const STEP_COLUMN: &str = r#""step""#;

/// How the non-main projections are folded inside the store.
#[derive(Clone, Copy)]
enum FieldRewrite {
    /// Per-field averaging over each bucket
    Average,
    /// A store-side smoothing transform over each bucket
    Smooth,
}

/// Store-side time bucketing with per-field averaging.
///
/// For profile series the shared bucket width is taken from one
/// representative observation (the smallest observation id), which is an
/// approximation, not a per-series guarantee.
#[derive(Debug)]
pub struct BucketPushdown {
    request: DecimationRequest,
    prepared: bool,
}

impl BucketPushdown {
    /// Return a new BucketPushdown for a request.
    pub fn new(request: DecimationRequest) -> Self {
        BucketPushdown {
            request,
            prepared: false,
        }
    }
}

impl DecimationStrategy for BucketPushdown {
    fn prepare_query(
        &mut self,
        query: &mut ObservationQuery,
        main_field_offset: usize,
        is_first_predicate: bool,
        conn: &dyn StoreConnection,
    ) -> Result<(), DecimationError> {
        rewrite_query(
            &self.request,
            query,
            main_field_offset,
            is_first_predicate,
            conn,
            FieldRewrite::Average,
        )?;
        self.prepared = true;
        Ok(())
    }

    fn consume_rows(
        &mut self,
        cursor: &mut dyn RowCursor,
        field_offset: usize,
        sink: &mut dyn ResultSink,
    ) -> Result<(), DecimationError> {
        passthrough_rows(&self.request, self.prepared, cursor, field_offset, sink)
    }
}

/// Store-side signal smoothing over time buckets.
///
/// Same query shape as [BucketPushdown], with each measure column folded
/// through the store's smoothing function instead of a plain average.
#[derive(Debug)]
pub struct SmoothPushdown {
    request: DecimationRequest,
    prepared: bool,
}

impl SmoothPushdown {
    /// Return a new SmoothPushdown for a request.
    pub fn new(request: DecimationRequest) -> Self {
        SmoothPushdown {
            request,
            prepared: false,
        }
    }
}

impl DecimationStrategy for SmoothPushdown {
    fn prepare_query(
        &mut self,
        query: &mut ObservationQuery,
        main_field_offset: usize,
        is_first_predicate: bool,
        conn: &dyn StoreConnection,
    ) -> Result<(), DecimationError> {
        rewrite_query(
            &self.request,
            query,
            main_field_offset,
            is_first_predicate,
            conn,
            FieldRewrite::Smooth,
        )?;
        self.prepared = true;
        Ok(())
    }

    fn consume_rows(
        &mut self,
        cursor: &mut dyn RowCursor,
        field_offset: usize,
        sink: &mut dyn ResultSink,
    ) -> Result<(), DecimationError> {
        passthrough_rows(&self.request, self.prepared, cursor, field_offset, sink)
    }
}

/// Pick the bucket step shared by the whole query.
///
/// Profile queries hold one step per observation; the smallest observation
/// id serves as the representative series.
fn representative_step(
    steps: &hashbrown::HashMap<SeriesKey, StepInfo>,
) -> Option<StepInfo> {
    if let Some(info) = steps.get(&SeriesKey::Whole) {
        return Some(*info);
    }
    steps
        .iter()
        .filter_map(|(key, info)| match key {
            SeriesKey::Observation(oid) => Some((*oid, *info)),
            _ => None,
        })
        .min_by_key(|(oid, _)| *oid)
        .map(|(_, info)| info)
}

fn rewrite_query(
    request: &DecimationRequest,
    query: &mut ObservationQuery,
    main_field_offset: usize,
    is_first_predicate: bool,
    conn: &dyn StoreConnection,
    rewrite: FieldRewrite,
) -> Result<(), DecimationError> {
    if is_first_predicate {
        query.strip_leading_keyword("AND");
    }
    let is_profile = request.procedure.is_profile;
    let grouping = if is_profile {
        SeriesGrouping::ByObservation
    } else {
        SeriesGrouping::Whole
    };
    let steps = compute_steps(
        conn,
        query,
        request.main_field(),
        main_field_offset,
        request.width,
        grouping,
    )?;
    let info = match representative_step(&steps) {
        Some(info) => info,
        None => return Ok(()),
    };
    if info.is_degenerate() {
        // A single-value axis has nothing to bucket; the plain query
        // already returns the one row per series.
        debug!("degenerate axis span, pushdown skipped");
        return Ok(());
    }

    let main = query
        .projection(main_field_offset)
        .unwrap_or_default()
        .to_string();
    query.replace_projection(
        main_field_offset,
        &format!(
            "time_bucket({}, {}, {}) AS {STEP_COLUMN}",
            info.step, main, info.start
        ),
    );
    for field in request.non_main_fields() {
        let Some(original) = query.projection(field.source_column).map(str::to_string) else {
            continue;
        };
        let expression = match (rewrite, field.field_type) {
            (FieldRewrite::Average, FieldType::Quantity | FieldType::Time) => {
                format!(r#"avg({original}) AS "{}""#, field.name)
            }
            (FieldRewrite::Smooth, FieldType::Quantity | FieldType::Time) => {
                format!(
                    r#"asap_smooth({main}, {original}, {}) AS "{}""#,
                    request.width, field.name
                )
            }
            // Text columns cannot be averaged; keep one value per bucket.
            _ => format!(r#"max({original}) AS "{}""#, field.name),
        };
        query.replace_projection(field.source_column, &expression);
    }
    if is_profile {
        query.push_group_by(r#""oid""#);
        query.push_order_by(r#""oid""#);
    }
    query.push_group_by(STEP_COLUMN);
    query.push_order_by(STEP_COLUMN);
    debug!(step = info.step, start = info.start, "query rewritten for pushdown");
    Ok(())
}

/// Copy each pre-aggregated row into one output block.
fn passthrough_rows(
    request: &DecimationRequest,
    prepared: bool,
    cursor: &mut dyn RowCursor,
    field_offset: usize,
    sink: &mut dyn ResultSink,
) -> Result<(), DecimationError> {
    if !prepared {
        return Err(DecimationError::Precondition {
            reason: "consume_rows called before prepare_query",
        });
    }
    let main = request.main_field().clone();
    let is_profile = request.procedure.is_profile;
    let mut fields: Vec<&Field> = request
        .fields
        .iter()
        .filter(|f| f.index != main.index && f.index >= field_offset)
        .collect();
    fields.sort_by_key(|f| f.index);

    while cursor.next_on_field(&main.name)? {
        // Resolve the whole row before opening a block, so a translation
        // failure never strands an open block.
        let oid = if is_profile {
            Some(cursor.get(OID_COLUMN)?.as_long(OID_COLUMN)?)
        } else {
            None
        };
        let main_value = cursor.get(&main.name)?;
        let main_resolved = match main.field_type {
            FieldType::Time => Resolved::Time(Some(main_value.as_time(&main.name)?)),
            _ => Resolved::Double(Some(main_value.as_double(&main.name)?)),
        };
        let row: Vec<Resolved> = fields
            .iter()
            .map(|f| resolve(f, cursor.get(&f.name)?))
            .collect::<Result<_, _>>()?;

        sink.new_block();
        if let Some(oid) = oid {
            sink.append_long(Some(oid), &Field::new(OID_COLUMN, FieldType::Other, 0, 0));
        }
        write_resolved(sink, &main, &main_resolved);
        for (field, value) in fields.iter().zip(&row) {
            write_resolved(sink, field, value);
        }
        sink.end_block();
    }
    Ok(())
}

/// A row cell translated to its field's wire type.
enum Resolved {
    Time(Option<i64>),
    Double(Option<f64>),
    Text(Option<String>),
}

fn resolve(field: &Field, value: DValue) -> Result<Resolved, DecimationError> {
    if value.is_null() {
        return Ok(match field.field_type {
            FieldType::Time => Resolved::Time(None),
            FieldType::Quantity => Resolved::Double(None),
            FieldType::Text | FieldType::Other => Resolved::Text(None),
        });
    }
    Ok(match field.field_type {
        FieldType::Time => Resolved::Time(Some(value.as_time(&field.name)?)),
        FieldType::Quantity => Resolved::Double(Some(value.as_double(&field.name)?)),
        FieldType::Text | FieldType::Other => {
            Resolved::Text(Some(value.as_text(&field.name)?.to_string()))
        }
    })
}

fn write_resolved(sink: &mut dyn ResultSink, field: &Field, value: &Resolved) {
    match value {
        Resolved::Time(time) => sink.append_time(*time, field),
        Resolved::Double(double) => sink.append_double(*double, field),
        Resolved::Text(text) => sink.append_string(text.as_deref(), field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hashbrown::HashMap;

    use crate::cursor::MemoryCursor;
    use crate::query::{SeriesExtent, StaticExtents};
    use crate::sink::BlockBuffer;
    use crate::test_utils;

    fn whole_extent(min: f64, max: f64) -> StaticExtents {
        StaticExtents(vec![SeriesExtent {
            key: SeriesKey::Whole,
            min,
            max,
        }])
    }

    #[test]
    fn test_bucket_rewrites_projection() {
        let mut strategy = BucketPushdown::new(test_utils::get_test_request());
        let mut query = test_utils::get_test_query();
        query.push_predicate(r#"AND "m"."time" > 0"#);
        let conn = whole_extent(0.0, 100_000.0);
        strategy.prepare_query(&mut query, 0, true, &conn).unwrap();

        let sql = query.to_sql();
        assert_eq!(
            r#"SELECT time_bucket(10000, "m"."time", 0) AS "step", avg("m"."temperature") AS "temperature", avg("m"."salinity") AS "salinity" FROM "mesures"."m1" m WHERE "m"."time" > 0 GROUP BY "step" ORDER BY "step""#,
            sql
        );
    }

    #[test]
    fn test_smooth_rewrites_projection() {
        let mut strategy = SmoothPushdown::new(test_utils::get_test_request());
        let mut query = test_utils::get_test_query();
        let conn = whole_extent(0.0, 100_000.0);
        strategy.prepare_query(&mut query, 0, false, &conn).unwrap();

        let sql = query.to_sql();
        assert!(sql.contains(r#"asap_smooth("m"."time", "m"."temperature", 10)"#));
        assert!(sql.contains(r#"time_bucket(10000, "m"."time", 0) AS "step""#));
    }

    #[test]
    fn test_profile_groups_by_oid_first() {
        let mut strategy = BucketPushdown::new(test_utils::get_test_profile_request());
        let mut query = ObservationQuery::new(
            vec![
                r#""m"."depth""#.to_string(),
                r#""m"."temperature""#.to_string(),
            ],
            r#""mesures"."m2" m"#,
        );
        let conn = StaticExtents(vec![
            SeriesExtent {
                key: SeriesKey::Observation(7),
                min: 0.0,
                max: 50.0,
            },
            SeriesExtent {
                key: SeriesKey::Observation(3),
                min: 0.0,
                max: 100.0,
            },
        ]);
        strategy.prepare_query(&mut query, 0, false, &conn).unwrap();

        let sql = query.to_sql();
        // The representative series is the smallest observation id.
        assert!(sql.contains("time_bucket(10000,"));
        assert!(sql.contains(r#"GROUP BY "oid", "step""#));
        assert!(sql.contains(r#"ORDER BY "oid", "step""#));
    }

    #[test]
    fn test_degenerate_axis_leaves_query_unchanged() {
        let mut strategy = BucketPushdown::new(test_utils::get_test_request());
        let mut query = test_utils::get_test_query();
        let before = query.to_sql();
        let conn = whole_extent(42.0, 42.0);
        strategy.prepare_query(&mut query, 0, false, &conn).unwrap();
        assert_eq!(before, query.to_sql());
    }

    #[test]
    fn test_passthrough_one_block_per_row() {
        let mut strategy = BucketPushdown::new(test_utils::get_test_request());
        let mut query = test_utils::get_test_query();
        let conn = whole_extent(0.0, 100_000.0);
        strategy.prepare_query(&mut query, 0, false, &conn).unwrap();

        let mut rows = Vec::new();
        for i in 0..4_i64 {
            let mut row = HashMap::new();
            row.insert("time".to_string(), DValue::Time(i * 10_000));
            row.insert("temperature".to_string(), DValue::Double(i as f64));
            row.insert("salinity".to_string(), DValue::Null);
            rows.push(row);
        }
        let mut cursor = MemoryCursor::new(rows);
        let mut sink = BlockBuffer::new();
        strategy.consume_rows(&mut cursor, 0, &mut sink).unwrap();

        let blocks = sink.into_blocks();
        assert_eq!(4, blocks.len());
        assert_eq!(
            vec![DValue::Time(10_000), DValue::Double(1.0), DValue::Null],
            blocks[1]
        );
    }

    #[test]
    fn test_consume_before_prepare() {
        let mut strategy = SmoothPushdown::new(test_utils::get_test_request());
        let mut cursor = MemoryCursor::new(vec![]);
        let mut sink = BlockBuffer::new();
        let error = strategy.consume_rows(&mut cursor, 0, &mut sink).unwrap_err();
        assert!(matches!(error, DecimationError::Precondition { .. }));
    }
}
