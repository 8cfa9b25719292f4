use crate::models::*;
use crate::query::ObservationQuery;

/// Create a DecimationRequest for a plain time series.
pub(crate) fn get_test_request() -> DecimationRequest {
    let main = Field::new("time", FieldType::Time, 0, 0);
    DecimationRequest {
        fields: vec![
            main.clone(),
            Field::new("temperature", FieldType::Quantity, 1, 1),
            Field::new("salinity", FieldType::Quantity, 2, 2),
        ],
        procedure: ProcedureInfo {
            id: "urn:sensor:1".to_string(),
            main_field: main,
            is_profile: false,
        },
        width: 10,
        profile_time: false,
    }
}

/// Create a DecimationRequest for a profile (depth-keyed) result.
pub(crate) fn get_test_profile_request() -> DecimationRequest {
    let main = Field::new("depth", FieldType::Quantity, 0, 0);
    DecimationRequest {
        fields: vec![
            main.clone(),
            Field::new("temperature", FieldType::Quantity, 1, 1),
        ],
        procedure: ProcedureInfo {
            id: "urn:sensor:2".to_string(),
            main_field: main,
            is_profile: true,
        },
        width: 10,
        profile_time: true,
    }
}

/// Create an ObservationQuery matching [get_test_request].
pub(crate) fn get_test_query() -> ObservationQuery {
    ObservationQuery::new(
        vec![
            r#""m"."time""#.to_string(),
            r#""m"."temperature""#.to_string(),
            r#""m"."salinity""#.to_string(),
        ],
        r#""mesures"."m1" m"#,
    )
}

/// Create an ObservationQuery for a sensor-location result.
pub(crate) fn get_test_location_query() -> ObservationQuery {
    ObservationQuery::new(
        vec![
            r#""hl"."time""#.to_string(),
            r#""hl"."procedure""#.to_string(),
            r#""hl"."location""#.to_string(),
        ],
        r#""om"."historical_locations" hl"#,
    )
}
