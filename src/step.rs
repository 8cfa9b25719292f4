//! Bucket step computation.
//!
//! Every decimation strategy sizes its buckets from the min/max envelope of
//! the main axis, obtained through one auxiliary query before any row is
//! read. Time axes are epoch milliseconds; quantity axes are scaled to
//! integers with a fixed factor so that bucket arithmetic stays exact.

use hashbrown::HashMap;

use crate::error::DecimationError;
use crate::models::{Field, FieldType};
use crate::query::{ObservationQuery, StoreConnection};
use crate::types::dvalue::scale_to_i64;
use crate::types::DValue;

/// Scale factor applied to quantity main axes (three decimal digits kept).
pub const QUANTITY_SCALE: f64 = 1000.0;

/// Bucket origin and width on the main axis for one series.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepInfo {
    /// Axis origin of the first bucket
    pub start: i64,
    /// Bucket width; 0 for a degenerate single-value series
    pub step: i64,
}

impl StepInfo {
    /// Whether the series collapsed to a single axis value.
    pub fn is_degenerate(&self) -> bool {
        self.step == 0
    }
}

/// Identifies one series within a decimation invocation.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SeriesKey {
    /// The single series of a plain time-series query
    Whole,
    /// One observation of a profile query, keyed by observation id
    Observation(i64),
    /// One procedure of a sensor-location query
    Procedure(String),
}

/// How the auxiliary extents query partitions the row set into series.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeriesGrouping {
    /// One series for the whole row set
    Whole,
    /// One series per observation id (profile data)
    ByObservation,
    /// One series per procedure (sensor locations)
    ByProcedure,
}

impl SeriesGrouping {
    /// The series-key column of the extents query, if any.
    pub fn column(self) -> Option<&'static str> {
        match self {
            SeriesGrouping::Whole => None,
            SeriesGrouping::ByObservation => Some(r#""oid""#),
            SeriesGrouping::ByProcedure => Some(r#""procedure""#),
        }
    }
}

/// Scale factor for a main axis of the given field type.
fn axis_scale(field: &Field) -> Result<f64, DecimationError> {
    match field.field_type {
        FieldType::Time => Ok(1.0),
        FieldType::Quantity => Ok(QUANTITY_SCALE),
        field_type => Err(DecimationError::UnsupportedMainFieldType {
            field: field.name.clone(),
            field_type,
        }),
    }
}

/// Read a main-axis cell as a scaled integer axis value.
pub fn axis_to_i64(field: &Field, value: &DValue) -> Result<i64, DecimationError> {
    match field.field_type {
        FieldType::Time => value.as_time(&field.name),
        _ => {
            let scale = axis_scale(field)?;
            let double = value.as_double(&field.name)?;
            scale_to_i64(double, scale).ok_or_else(|| DecimationError::TypeMismatch {
                field: field.name.clone(),
                expected: "finite axis value",
                actual: "double",
            })
        }
    }
}

/// Convert a scaled integer axis value back to the field's native scale.
pub fn axis_to_native(field: &Field, value: i64) -> f64 {
    match field.field_type {
        FieldType::Time => value as f64,
        _ => value as f64 / QUANTITY_SCALE,
    }
}

/// Compute per-series bucket steps for a target output width.
///
/// Runs the auxiliary extents query over the same filtered row set as the
/// outgoing query and derives `(start, step) = (min, ceil((max - min) /
/// target_width))` per series. The ceiling keeps the bucket count, and with
/// it the output block count, within the target. A series whose axis
/// collapses to one value (`max == min`) gets an undefined step of 0 and is
/// handled downstream as the single-value special case.
pub fn compute_steps(
    conn: &dyn StoreConnection,
    query: &ObservationQuery,
    main_field: &Field,
    main_field_offset: usize,
    target_width: usize,
    grouping: SeriesGrouping,
) -> Result<HashMap<SeriesKey, StepInfo>, DecimationError> {
    if target_width == 0 {
        return Err(DecimationError::Precondition {
            reason: "step computation needs a non-zero target width",
        });
    }
    let scale = axis_scale(main_field)?;
    let sql = query.extents_sql(main_field_offset, grouping.column());
    let extents = conn.fetch_extents(&sql)?;
    let mut steps = HashMap::with_capacity(extents.len());
    for extent in extents {
        let start = checked_scale(extent.min, scale, main_field)?;
        let end = checked_scale(extent.max, scale, main_field)?;
        let span = end.saturating_sub(start);
        let width = target_width as i64;
        let step = if span <= 0 {
            0
        } else {
            (span + width - 1) / width
        };
        steps.insert(extent.key, StepInfo { start, step });
    }
    Ok(steps)
}

fn checked_scale(value: f64, scale: f64, field: &Field) -> Result<i64, DecimationError> {
    scale_to_i64(value, scale).ok_or_else(|| DecimationError::TypeMismatch {
        field: field.name.clone(),
        expected: "finite axis extent",
        actual: "double",
    })
}
