//! Data value representing one cell of an observation result row

use serde::{Deserialize, Serialize};

use crate::error::DecimationError;
use crate::types::geometry::Geometry;

/// A value of any observation field type.
///
/// Row cursors hand cells to the engine as this runtime-tagged type; every
/// extraction site matches it exhaustively and fails with a
/// [TypeMismatch](DecimationError::TypeMismatch) when the tag does not fit
/// the field it was read for.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DValue {
    /// A timestamp, epoch milliseconds
    Time(i64),
    /// An integer value
    Long(i64),
    /// A floating point value
    Double(f64),
    /// A text value
    Text(String),
    /// A geometry value
    Geometry(Geometry),
    /// An absent value
    Null,
}

impl DValue {
    /// Name of the runtime tag, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            DValue::Time(_) => "time",
            DValue::Long(_) => "long",
            DValue::Double(_) => "double",
            DValue::Text(_) => "text",
            DValue::Geometry(_) => "geometry",
            DValue::Null => "null",
        }
    }

    /// Whether this cell is absent.
    pub fn is_null(&self) -> bool {
        matches!(self, DValue::Null)
    }

    /// Try to read this cell as a timestamp.
    pub fn as_time(&self, field: &str) -> Result<i64, DecimationError> {
        match self {
            DValue::Time(value) => Ok(*value),
            other => Err(mismatch(field, "time", other)),
        }
    }

    /// Try to read this cell as an integer.
    pub fn as_long(&self, field: &str) -> Result<i64, DecimationError> {
        match self {
            DValue::Long(value) => Ok(*value),
            other => Err(mismatch(field, "long", other)),
        }
    }

    /// Try to read this cell as a floating point number.
    ///
    /// Integer and time cells widen losslessly for any realistic axis value.
    pub fn as_double(&self, field: &str) -> Result<f64, DecimationError> {
        match self {
            DValue::Double(value) => Ok(*value),
            DValue::Long(value) | DValue::Time(value) => num_traits::cast(*value)
                .ok_or_else(|| mismatch(field, "double", &DValue::Long(*value))),
            other => Err(mismatch(field, "double", other)),
        }
    }

    /// Try to read this cell as text.
    pub fn as_text(&self, field: &str) -> Result<&str, DecimationError> {
        match self {
            DValue::Text(value) => Ok(value),
            other => Err(mismatch(field, "text", other)),
        }
    }

    /// Try to read this cell as a geometry.
    pub fn as_geometry(&self, field: &str) -> Result<&Geometry, DecimationError> {
        match self {
            DValue::Geometry(value) => Ok(value),
            other => Err(mismatch(field, "geometry", other)),
        }
    }
}

fn mismatch(field: &str, expected: &'static str, actual: &DValue) -> DecimationError {
    DecimationError::TypeMismatch {
        field: field.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

/// Scale a floating point axis value to an integer with a fixed factor.
///
/// Returns None when the scaled value does not fit an i64.
pub fn scale_to_i64(value: f64, scale: f64) -> Option<i64> {
    num_traits::cast((value * scale).round())
}
