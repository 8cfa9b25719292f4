//! Error handling.

use thiserror::Error;

use crate::models::FieldType;

/// Decimation engine error type
///
/// This type encapsulates the various errors that may occur during a
/// decimation invocation. Everything except
/// [MalformedGeometry](DecimationError::MalformedGeometry) aborts the whole
/// invocation; malformed geometry rows are skipped with a logged warning by
/// the location decimators.
#[derive(Debug, Error)]
pub enum DecimationError {
    /// A strategy hook was invoked before its preconditions were met
    #[error("precondition violated: {reason}")]
    Precondition { reason: &'static str },

    /// The designated main field cannot be used as a decimation axis
    #[error("cannot decimate on {field_type} main field {field}")]
    UnsupportedMainFieldType { field: String, field_type: FieldType },

    /// A location row's geometry is absent, unparsable or not a point
    #[error("malformed geometry: {reason}")]
    MalformedGeometry { reason: String },

    /// Coordinate transform between two reference systems failed
    #[error("cannot transform coordinates from EPSG:{from} to EPSG:{to}")]
    Reprojection { from: u32, to: u32 },

    /// A checked failure from the row cursor or the auxiliary step query
    #[error("error reading from observation store")]
    StoreRead(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A field named by the strategy is absent from the cursor row
    #[error("field {name} is missing from the result row")]
    MissingField { name: String },

    /// A cursor value could not be translated to the expected type
    #[error("field {field} holds a {actual} value, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl DecimationError {
    /// Wrap a store-layer error as a [StoreRead](DecimationError::StoreRead).
    pub fn store_read<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DecimationError::StoreRead(Box::new(error))
    }

    /// Returns a [MalformedGeometry](DecimationError::MalformedGeometry) with the given reason.
    pub fn malformed_geometry(reason: impl Into<String>) -> Self {
        DecimationError::MalformedGeometry {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::error::Error;

    #[test]
    fn precondition_error() {
        let error = DecimationError::Precondition {
            reason: "consume_rows called before prepare_query",
        };
        assert_eq!(
            "precondition violated: consume_rows called before prepare_query",
            error.to_string()
        );
    }

    #[test]
    fn unsupported_main_field_type() {
        let error = DecimationError::UnsupportedMainFieldType {
            field: "sensor_status".to_string(),
            field_type: FieldType::Text,
        };
        assert_eq!(
            "cannot decimate on text main field sensor_status",
            error.to_string()
        );
    }

    #[test]
    fn malformed_geometry() {
        let error = DecimationError::malformed_geometry("empty WKT");
        assert_eq!("malformed geometry: empty WKT", error.to_string());
    }

    #[test]
    fn reprojection() {
        let error = DecimationError::Reprojection {
            from: 3857,
            to: 4326,
        };
        assert_eq!(
            "cannot transform coordinates from EPSG:3857 to EPSG:4326",
            error.to_string()
        );
    }

    #[test]
    fn store_read_preserves_source() {
        let io_error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection reset");
        let error = DecimationError::store_read(io_error);
        assert_eq!("error reading from observation store", error.to_string());
        assert_eq!("connection reset", error.source().unwrap().to_string());
    }

    #[test]
    fn type_mismatch() {
        let error = DecimationError::TypeMismatch {
            field: "depth".to_string(),
            expected: "double",
            actual: "text",
        };
        assert_eq!(
            "field depth holds a text value, expected double",
            error.to_string()
        );
    }
}
