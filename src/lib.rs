//! This crate provides the observation decimation engine of a spatial data
//! infrastructure server. It reduces arbitrarily long time-series or profile
//! result sets, and arbitrarily dense sensor-trajectory streams, to a
//! caller-specified maximum number of representative samples, preserving the
//! true min/max envelope of the signal and cooperating with the backing
//! store by optionally pushing part of the reduction into the query itself.
//!
//! The engine is invoked as a library by the protocol layer, once per
//! request, with no state surviving a request boundary. The backing store,
//! its query execution and the protocol layers stay behind trait seams
//! ([StoreConnection](query::StoreConnection), [RowCursor](cursor::RowCursor),
//! [ResultSink](sink::ResultSink)).
//!
//! The engine is built on top of a number of open source components.
//!
//! * [Serde](serde) performs (de)serialisation of the request model types.
//! * [validator] applies the request schema checks.
//! * [thiserror] derives the engine's error type.
//! * [tracing] provides structured logging throughout.
//! * [ndarray] backs the coarse grid of the two-level spatial index.
//! * [hashbrown] provides the sparse cell and step maps.

pub mod bucket;
pub mod cursor;
pub mod error;
pub mod grid;
pub mod location;
pub mod models;
pub mod pushdown;
pub mod query;
pub mod sink;
pub mod step;
pub mod strategy;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
