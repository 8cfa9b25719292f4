//! Data types and associated functions and methods

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

use crate::types::Envelope;

/// Semantic type of one observation result column
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldType {
    /// A timestamp column, epoch milliseconds
    Time,
    /// A numeric measurement column
    Quantity,
    /// A free-text column
    Text,
    /// Anything else (booleans, categories, ...)
    Other,
}

impl FieldType {
    /// Whether a field of this type may serve as the decimation axis.
    pub fn is_main_capable(self) -> bool {
        matches!(self, FieldType::Time | FieldType::Quantity)
    }
}

/// One logical output column of an observation result
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Field {
    /// Column name, used for keyed cursor reads
    #[validate(length(min = 1, message = "field name must not be empty"))]
    pub name: String,
    /// Semantic type of the column
    pub field_type: FieldType,
    /// Position of the column in the logical output row
    pub index: usize,
    /// Position of the column in the backing query result
    pub source_column: usize,
}

impl Field {
    /// Return a new Field object.
    pub fn new(name: &str, field_type: FieldType, index: usize, source_column: usize) -> Self {
        Field {
            name: name.to_string(),
            field_type,
            index,
            source_column,
        }
    }
}

/// One observation source and the shape of its results
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProcedureInfo {
    /// Procedure identifier
    #[validate(length(min = 1, message = "procedure id must not be empty"))]
    pub id: String,
    /// The designated decimation axis
    #[validate]
    pub main_field: Field,
    /// Whether one query spans multiple observations sharing this procedure
    pub is_profile: bool,
}

/// Parameters of one decimation invocation
///
/// Owned by the caller, handed to [build_strategy](crate::strategy::build_strategy)
/// together with the desired strategy kind.
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_request"))]
pub struct DecimationRequest {
    /// All output columns, main field included
    #[validate]
    #[validate(length(min = 1, message = "fields must not be empty"))]
    pub fields: Vec<Field>,
    /// The observation source being decimated
    #[validate]
    pub procedure: ProcedureInfo,
    /// Requested maximum number of output blocks per series
    #[validate(range(min = 2, message = "width must be at least 2"))]
    pub width: usize,
    /// Whether profile blocks carry the observation's own start time
    #[serde(default)]
    pub profile_time: bool,
}

impl DecimationRequest {
    /// The decimation axis field.
    pub fn main_field(&self) -> &Field {
        &self.procedure.main_field
    }

    /// Fields other than the decimation axis, in output order.
    pub fn non_main_fields(&self) -> impl Iterator<Item = &Field> {
        let main_index = self.procedure.main_field.index;
        self.fields.iter().filter(move |f| f.index != main_index)
    }
}

/// Validate a decimation request
fn validate_request(request: &DecimationRequest) -> Result<(), ValidationError> {
    // Validation of multiple fields in DecimationRequest.
    if !request.procedure.main_field.field_type.is_main_capable() {
        let mut error = ValidationError::new("main field must be of type time or quantity");
        error.add_param("field".into(), &request.procedure.main_field.name);
        return Err(error);
    }
    let mut indexes: Vec<usize> = request.fields.iter().map(|f| f.index).collect();
    indexes.sort_unstable();
    indexes.dedup();
    if indexes.len() != request.fields.len() {
        return Err(ValidationError::new("field indexes must be unique"));
    }
    if !request
        .fields
        .iter()
        .any(|f| f.index == request.procedure.main_field.index)
    {
        return Err(ValidationError::new(
            "main field index must refer to one of the request fields",
        ));
    }
    Ok(())
}

/// Parameters of one sensor-location decimation invocation
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct LocationOptions {
    /// Number of cells per grid axis, and of time slices per procedure
    #[validate(range(min = 1, message = "nb_cells must be greater than 0"))]
    pub nb_cells: usize,
    /// Coarse-grid reduction factor for the two-level spatial index
    #[validate(range(min = 1, message = "reduction_factor must be greater than 0"))]
    pub reduction_factor: usize,
    /// Target envelope; the default geographic domain when absent
    pub envelope: Option<Envelope>,
}

impl Default for LocationOptions {
    fn default() -> Self {
        LocationOptions {
            nb_cells: 10,
            reduction_factor: 10,
            envelope: None,
        }
    }
}
