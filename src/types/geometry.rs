//! Geometry value types for sensor locations
//!
//! Sensor trajectories arrive as one geometry per row, each tagged with the
//! coordinate reference system it was stored in. The location decimators
//! normalize every point to the target envelope's reference system before
//! binning; anything the normalization seam cannot ground is rejected rather
//! than binned at the wrong place.

use serde::{Deserialize, Serialize};

use crate::error::DecimationError;

/// A coordinate reference system identifier (SRID)
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Crs(pub u32);

impl Crs {
    /// EPSG:4326, latitude/longitude axis order
    pub const WGS84: Crs = Crs(4326);
    /// OGC CRS:84, longitude/latitude axis order
    pub const CRS84: Crs = Crs(84);
}

/// A 2-D or 3-D point
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub crs: Crs,
}

impl Point {
    /// Return a new 2-D Point object.
    pub fn new(x: f64, y: f64, crs: Crs) -> Self {
        Point { x, y, z: None, crs }
    }
}

/// A geometry value read from a location row
///
/// Only points can be binned; the other variants exist so that non-point
/// rows are recognised and skipped with a warning instead of failing the
/// whole run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Geometry {
    Point(Point),
    LineString(Vec<Point>),
}

impl Geometry {
    /// Parse a geometry from its well-known-text form.
    ///
    /// Only `POINT` and `POINT Z` are understood; everything else is
    /// reported as malformed so the caller can decide whether to skip.
    pub fn from_wkt(wkt: &str, crs: Crs) -> Result<Self, DecimationError> {
        let trimmed = wkt.trim();
        let rest = trimmed
            .strip_prefix("POINT")
            .ok_or_else(|| DecimationError::malformed_geometry(format!("not a point: {trimmed}")))?
            .trim_start()
            .trim_start_matches('Z')
            .trim_start();
        let body = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| {
                DecimationError::malformed_geometry(format!("unbalanced WKT: {trimmed}"))
            })?;
        let coords = body
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|_| {
                DecimationError::malformed_geometry(format!("bad coordinates: {trimmed}"))
            })?;
        match coords[..] {
            [x, y] => Ok(Geometry::Point(Point { x, y, z: None, crs })),
            [x, y, z] => Ok(Geometry::Point(Point {
                x,
                y,
                z: Some(z),
                crs,
            })),
            _ => Err(DecimationError::malformed_geometry(format!(
                "expected 2 or 3 coordinates: {trimmed}"
            ))),
        }
    }
}

/// A 2-D bounding envelope
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub crs: Crs,
}

/// The default geographic domain used when no target envelope is given.
pub const DEFAULT_DOMAIN: Envelope = Envelope {
    min_x: -180.0,
    min_y: -90.0,
    max_x: 180.0,
    max_y: 90.0,
    crs: Crs::CRS84,
};

impl Envelope {
    /// Return a new Envelope object.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: Crs) -> Self {
        Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
            crs,
        }
    }

    /// Span on the x axis.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Span on the y axis.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether a point lies inside this envelope, boundaries included.
    ///
    /// The point must already be expressed in the envelope's reference
    /// system.
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }
}

/// Normalize a point to a target reference system.
///
/// Identity for matching systems; EPSG:4326 and CRS:84 differ only in axis
/// order, so that pair is an axis swap. Any other pair needs the caller's
/// geodesy layer and is rejected: binning ungrounded coordinates would place
/// observations in the wrong cells silently.
pub fn reproject(point: &Point, target: Crs) -> Result<Point, DecimationError> {
    if point.crs == target {
        return Ok(*point);
    }
    match (point.crs, target) {
        (Crs::WGS84, Crs::CRS84) | (Crs::CRS84, Crs::WGS84) => Ok(Point {
            x: point.y,
            y: point.x,
            z: point.z,
            crs: target,
        }),
        (from, to) => Err(DecimationError::Reprojection {
            from: from.0,
            to: to.0,
        }),
    }
}

/// Centroid of a collection of points.
///
/// Returns None for an empty collection. The z coordinate is averaged only
/// when every member carries one. Callers must pass points in a single
/// reference system; the centroid inherits it from the first member.
pub fn centroid(points: &[Point]) -> Option<Point> {
    let first = points.first()?;
    let count = points.len() as f64;
    let x = points.iter().map(|p| p.x).sum::<f64>() / count;
    let y = points.iter().map(|p| p.y).sum::<f64>() / count;
    let z = points
        .iter()
        .map(|p| p.z)
        .collect::<Option<Vec<f64>>>()
        .map(|zs| zs.iter().sum::<f64>() / count);
    Some(Point {
        x,
        y,
        z,
        crs: first.crs,
    })
}
