/// Benchmarks for the streaming extrema-preserving decimator.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hashbrown::HashMap;

use decimator::cursor::MemoryCursor;
use decimator::models::{DecimationRequest, Field, FieldType, ProcedureInfo};
use decimator::query::{SeriesExtent, StaticExtents};
use decimator::sink::BlockBuffer;
use decimator::step::SeriesKey;
use decimator::strategy::{build_strategy, DecimationStrategy, StrategyKind};
use decimator::types::DValue;

fn get_test_request(width: usize) -> DecimationRequest {
    let main = Field::new("time", FieldType::Time, 0, 0);
    DecimationRequest {
        fields: vec![
            main.clone(),
            Field::new("temperature", FieldType::Quantity, 1, 1),
            Field::new("salinity", FieldType::Quantity, 2, 2),
        ],
        procedure: ProcedureInfo {
            id: "urn:sensor:bench".to_string(),
            main_field: main,
            is_profile: false,
        },
        width,
        profile_time: false,
    }
}

fn get_test_query() -> decimator::query::ObservationQuery {
    decimator::query::ObservationQuery::new(
        vec![
            r#""m"."time""#.to_string(),
            r#""m"."temperature""#.to_string(),
            r#""m"."salinity""#.to_string(),
        ],
        r#""mesures"."m1" m"#,
    )
}

fn series_rows(size: usize) -> Vec<HashMap<String, DValue>> {
    (0..size)
        .map(|i| {
            let mut row = HashMap::new();
            row.insert("time".to_string(), DValue::Time(i as i64 * 1000));
            row.insert(
                "temperature".to_string(),
                DValue::Double((i % 97) as f64 - 48.0),
            );
            row.insert("salinity".to_string(), DValue::Double((i % 13) as f64));
            row
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    for size in [1_000, 10_000, 100_000] {
        let rows = series_rows(size);
        let extent = SeriesExtent {
            key: SeriesKey::Whole,
            min: 0.0,
            max: (size as f64 - 1.0) * 1000.0,
        };
        for width in [10, 100] {
            let conn = StaticExtents(vec![extent.clone()]);
            let mut strategy =
                build_strategy(StrategyKind::Extrema, get_test_request(width)).unwrap();
            let mut query = get_test_query();
            strategy.prepare_query(&mut query, 0, false, &conn).unwrap();
            let name = format!("extrema({size}, width={width})");
            c.bench_function(&name, |b| {
                b.iter(|| {
                    let mut cursor = MemoryCursor::new(black_box(rows.clone()));
                    let mut sink = BlockBuffer::new();
                    strategy.consume_rows(&mut cursor, 0, &mut sink).unwrap();
                    sink.into_blocks()
                })
            });
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
