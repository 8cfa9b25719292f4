//! Sensor location decimation.
//!
//! Reduces a (possibly huge) trajectory of point observations per procedure
//! to at most `nb_cells` representative locations evenly spaced along the
//! procedure's time range. Two variants with different trade-offs: the grid
//! variant bins spatially as well as temporally, the time variant only
//! buckets along the time axis.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::cursor::RowCursor;
use crate::error::DecimationError;
use crate::grid::TwoLevelIndex;
use crate::models::{Field, FieldType, LocationOptions};
use crate::query::{ObservationQuery, StoreConnection};
use crate::step::{compute_steps, SeriesGrouping, SeriesKey, StepInfo};
use crate::types::geometry::DEFAULT_DOMAIN;
use crate::types::{centroid, reproject, Crs, DValue, Envelope, Geometry, Point};

/// Column carrying the procedure id in location queries.
const PROCEDURE_COLUMN: &str = "procedure";
/// Column carrying the observation time in location queries.
const TIME_COLUMN: &str = "time";
/// Column carrying the geometry in location queries.
const LOCATION_COLUMN: &str = "location";
/// Optional column carrying the geometry's SRID in location queries.
const CRS_COLUMN: &str = "crs";

/// Decimated trajectory per procedure: `(timestamp, location)` pairs.
pub type DecimatedLocations = HashMap<String, Vec<(i64, Point)>>;

/// Trait for sensor location decimators.
///
/// Same two-phase shape as
/// [DecimationStrategy](crate::strategy::DecimationStrategy): the step query
/// runs in [prepare](LocationDecimator::prepare), the cursor drains in
/// [process_locations](LocationDecimator::process_locations), and
/// [finish](LocationDecimator::finish) merges the accumulated cells.
pub trait LocationDecimator {
    /// Run the auxiliary step query for the per-procedure time partitions.
    fn prepare(
        &mut self,
        query: &mut ObservationQuery,
        is_first_predicate: bool,
        conn: &dyn StoreConnection,
    ) -> Result<(), DecimationError>;

    /// Drain the location row cursor, binning each point.
    fn process_locations(&mut self, cursor: &mut dyn RowCursor) -> Result<(), DecimationError>;

    /// Merge the accumulated cells into per-procedure locations.
    fn finish(&mut self) -> DecimatedLocations;
}

/// The time axis field of a location query.
fn time_axis() -> Field {
    Field::new(TIME_COLUMN, FieldType::Time, 0, 0)
}

/// Time slice of a timestamp within a procedure's partition.
fn time_index(info: &StepInfo, time: i64, nb_cells: usize) -> usize {
    if info.step <= 0 {
        return 0;
    }
    (((time - info.start).max(0) / info.step) as usize).min(nb_cells - 1)
}

/// Read and normalize one location row.
///
/// Returns None for rows whose geometry is absent, unparsable or not a
/// point; those are skipped with a warning rather than failing the run.
/// A reprojection failure is fatal: binning ungrounded coordinates would
/// misplace observations silently.
fn read_point(
    cursor: &dyn RowCursor,
    target: Crs,
) -> Result<Option<(String, i64, Point)>, DecimationError> {
    let procedure = cursor
        .get(PROCEDURE_COLUMN)?
        .as_text(PROCEDURE_COLUMN)?
        .to_string();
    let time = cursor.get(TIME_COLUMN)?.as_time(TIME_COLUMN)?;
    let geometry = match cursor.get(LOCATION_COLUMN)? {
        DValue::Geometry(geometry) => geometry,
        DValue::Text(wkt) => {
            let crs = row_crs(cursor, target)?;
            match Geometry::from_wkt(&wkt, crs) {
                Ok(geometry) => geometry,
                Err(error) => {
                    warn!(%procedure, %error, "skipping location row");
                    return Ok(None);
                }
            }
        }
        DValue::Null => {
            warn!(%procedure, "skipping location row with no geometry");
            return Ok(None);
        }
        other => {
            warn!(
                %procedure,
                value_type = other.type_name(),
                "skipping location row with non-geometry value"
            );
            return Ok(None);
        }
    };
    let point = match geometry {
        Geometry::Point(point) => point,
        other => {
            warn!(%procedure, ?other, "skipping non-point geometry");
            return Ok(None);
        }
    };
    let point = reproject(&point, target)?;
    Ok(Some((procedure, time, point)))
}

/// The SRID column of the current row, defaulting to the target system.
fn row_crs(cursor: &dyn RowCursor, target: Crs) -> Result<Crs, DecimationError> {
    match cursor.get(CRS_COLUMN) {
        Ok(value) => Ok(Crs(value.as_long(CRS_COLUMN)? as u32)),
        Err(DecimationError::MissingField { .. }) => Ok(target),
        Err(error) => Err(error),
    }
}

fn prepare_steps(
    options: &LocationOptions,
    query: &mut ObservationQuery,
    is_first_predicate: bool,
    conn: &dyn StoreConnection,
) -> Result<HashMap<SeriesKey, StepInfo>, DecimationError> {
    if is_first_predicate {
        query.strip_leading_keyword("AND");
    }
    let steps = compute_steps(
        conn,
        query,
        &time_axis(),
        0,
        options.nb_cells,
        SeriesGrouping::ByProcedure,
    )?;
    debug!(procedures = steps.len(), "location step information computed");
    Ok(steps)
}

/// Grid-of-cells location decimation (V1).
///
/// Partitions both space and time into `nb_cells` buckets. Every point is
/// located through the two-level index, then accumulated in its
/// `(time, i, j)` cell; at merge time a cell with one point uses it
/// verbatim and a cell with many is reduced to their centroid.
///
/// Known simplification, kept deliberately: the final per-procedure emission
/// is keyed by the time index alone, so when several spatial cells are
/// occupied at the same time index only the last-processed cell's geometry
/// survives for that time slot.
pub struct GridLocationDecimator {
    options: LocationOptions,
    index: TwoLevelIndex,
    steps: Option<HashMap<SeriesKey, StepInfo>>,
    cells: HashMap<String, HashMap<(usize, usize, usize), Vec<Point>>>,
}

impl GridLocationDecimator {
    /// Return a new GridLocationDecimator with the given options.
    pub fn new(options: LocationOptions) -> Self {
        let envelope = options.envelope.unwrap_or(DEFAULT_DOMAIN);
        let index = TwoLevelIndex::new(envelope, options.nb_cells, options.reduction_factor);
        GridLocationDecimator {
            options,
            index,
            steps: None,
            cells: HashMap::new(),
        }
    }

    /// Occupied `(time, i, j)` cells of one procedure, in key order.
    pub fn occupied_cells(&self, procedure: &str) -> BTreeSet<(usize, usize, usize)> {
        self.cells
            .get(procedure)
            .map(|cells| cells.keys().copied().collect())
            .unwrap_or_default()
    }

    fn step_for(&self, procedure: &str) -> Result<StepInfo, DecimationError> {
        self.steps
            .as_ref()
            .ok_or(DecimationError::Precondition {
                reason: "process_locations called before prepare",
            })?
            .get(&SeriesKey::Procedure(procedure.to_string()))
            .copied()
            .ok_or(DecimationError::Precondition {
                reason: "no step information for series",
            })
    }
}

impl LocationDecimator for GridLocationDecimator {
    fn prepare(
        &mut self,
        query: &mut ObservationQuery,
        is_first_predicate: bool,
        conn: &dyn StoreConnection,
    ) -> Result<(), DecimationError> {
        self.steps = Some(prepare_steps(&self.options, query, is_first_predicate, conn)?);
        Ok(())
    }

    fn process_locations(&mut self, cursor: &mut dyn RowCursor) -> Result<(), DecimationError> {
        if self.steps.is_none() {
            return Err(DecimationError::Precondition {
                reason: "process_locations called before prepare",
            });
        }
        let target = self.index.dimensions().envelope().crs;
        while cursor.next_on_field(TIME_COLUMN)? {
            let Some((procedure, time, point)) = read_point(cursor, target)? else {
                continue;
            };
            let Some((i, j)) = self.index.locate(&point) else {
                debug!(%procedure, "point outside target envelope");
                continue;
            };
            let info = self.step_for(&procedure)?;
            let t = time_index(&info, time, self.options.nb_cells);
            self.cells
                .entry(procedure)
                .or_default()
                .entry((t, i, j))
                .or_default()
                .push(point);
        }
        Ok(())
    }

    fn finish(&mut self) -> DecimatedLocations {
        let steps = match self.steps.as_ref() {
            Some(steps) => steps,
            None => return DecimatedLocations::new(),
        };
        let mut result = DecimatedLocations::new();
        for (procedure, cells) in self.cells.drain() {
            let info = match steps.get(&SeriesKey::Procedure(procedure.clone())) {
                Some(info) => *info,
                None => continue,
            };
            // Deterministic merge order: ascending (time, i, j), so the
            // last-processed spatial cell wins within each time slot.
            let mut keys: Vec<(usize, usize, usize)> = cells.keys().copied().collect();
            keys.sort_unstable();
            let mut by_time: BTreeMap<usize, Point> = BTreeMap::new();
            for key in keys {
                let points = &cells[&key];
                let merged = if points.len() == 1 {
                    points[0]
                } else {
                    centroid(points).expect("cells are never empty")
                };
                by_time.insert(key.0, merged);
            }
            let locations = by_time
                .into_iter()
                .map(|(t, point)| (info.start + info.step * t as i64, point))
                .collect();
            result.insert(procedure, locations);
        }
        result
    }
}

/// Time-only location decimation (V2).
///
/// Skips spatial binning entirely: an optional envelope filter excludes
/// out-of-envelope points, and all points sharing a time bucket merge into
/// one centroid. Simpler and faster than the grid variant, coarser
/// spatially.
pub struct TimeLocationDecimator {
    options: LocationOptions,
    target: Crs,
    filter: Option<Envelope>,
    steps: Option<HashMap<SeriesKey, StepInfo>>,
    buckets: HashMap<String, BTreeMap<usize, Vec<Point>>>,
}

impl TimeLocationDecimator {
    /// Return a new TimeLocationDecimator with the given options.
    pub fn new(options: LocationOptions) -> Self {
        let target = options.envelope.map_or(DEFAULT_DOMAIN.crs, |e| e.crs);
        TimeLocationDecimator {
            filter: options.envelope,
            target,
            options,
            steps: None,
            buckets: HashMap::new(),
        }
    }

    /// Occupied time buckets of one procedure, in ascending order.
    pub fn occupied_buckets(&self, procedure: &str) -> BTreeSet<usize> {
        self.buckets
            .get(procedure)
            .map(|buckets| buckets.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl LocationDecimator for TimeLocationDecimator {
    fn prepare(
        &mut self,
        query: &mut ObservationQuery,
        is_first_predicate: bool,
        conn: &dyn StoreConnection,
    ) -> Result<(), DecimationError> {
        self.steps = Some(prepare_steps(&self.options, query, is_first_predicate, conn)?);
        Ok(())
    }

    fn process_locations(&mut self, cursor: &mut dyn RowCursor) -> Result<(), DecimationError> {
        let steps = self.steps.as_ref().ok_or(DecimationError::Precondition {
            reason: "process_locations called before prepare",
        })?;
        while cursor.next_on_field(TIME_COLUMN)? {
            let Some((procedure, time, point)) = read_point(cursor, self.target)? else {
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter.contains(&point) {
                    debug!(%procedure, "point outside spatial filter");
                    continue;
                }
            }
            let info = steps
                .get(&SeriesKey::Procedure(procedure.clone()))
                .copied()
                .ok_or(DecimationError::Precondition {
                    reason: "no step information for series",
                })?;
            let t = time_index(&info, time, self.options.nb_cells);
            self.buckets
                .entry(procedure)
                .or_default()
                .entry(t)
                .or_default()
                .push(point);
        }
        Ok(())
    }

    fn finish(&mut self) -> DecimatedLocations {
        let steps = match self.steps.as_ref() {
            Some(steps) => steps,
            None => return DecimatedLocations::new(),
        };
        let mut result = DecimatedLocations::new();
        for (procedure, buckets) in self.buckets.drain() {
            let info = match steps.get(&SeriesKey::Procedure(procedure.clone())) {
                Some(info) => *info,
                None => continue,
            };
            let locations = buckets
                .into_iter()
                .map(|(t, points)| {
                    let merged = centroid(&points).expect("buckets are never empty");
                    (info.start + info.step * t as i64, merged)
                })
                .collect();
            result.insert(procedure, locations);
        }
        result
    }
}
