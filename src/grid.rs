//! Two-level spatial grid index.
//!
//! A hand-rolled acceleration structure standing in for a spatial index:
//! a coarse grid built once per decimation run, each coarse cell carrying
//! the fine-grid index bounds it covers. Locating a point is one coarse
//! lookup followed by a bounded containment scan over the covered fine
//! cells, keeping per-point cost a small constant instead of scanning the
//! whole fine grid. The index is never persisted and is discarded at the
//! end of the run.

use ndarray::Array2;

use crate::types::{Envelope, Point};

/// Fine-grid geometry over a target envelope.
#[derive(Clone, Debug)]
pub struct GridDimensions {
    envelope: Envelope,
    nb_cells: usize,
    cell_width: f64,
    cell_height: f64,
}

impl GridDimensions {
    /// Return a new GridDimensions partitioning the envelope.
    pub fn new(envelope: Envelope, nb_cells: usize) -> Self {
        GridDimensions {
            envelope,
            nb_cells,
            cell_width: envelope.width() / nb_cells as f64,
            cell_height: envelope.height() / nb_cells as f64,
        }
    }

    /// The target envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Number of cells per axis.
    pub fn nb_cells(&self) -> usize {
        self.nb_cells
    }

    /// The envelope of one fine cell.
    pub fn cell_envelope(&self, i: usize, j: usize) -> Envelope {
        Envelope::new(
            self.envelope.min_x + i as f64 * self.cell_width,
            self.envelope.min_y + j as f64 * self.cell_height,
            self.envelope.min_x + (i + 1) as f64 * self.cell_width,
            self.envelope.min_y + (j + 1) as f64 * self.cell_height,
            self.envelope.crs,
        )
    }
}

/// Fine-grid index bounds `[i0, i1) x [j0, j1)` covered by one coarse cell.
#[derive(Clone, Copy, Debug, Default)]
struct Region {
    i0: usize,
    i1: usize,
    j0: usize,
    j1: usize,
}

/// The two-level index: coarse region lookup, then bounded fine scan.
pub struct TwoLevelIndex {
    dims: GridDimensions,
    coarse: Array2<Region>,
    coarse_width: f64,
    coarse_height: f64,
}

impl TwoLevelIndex {
    /// Return a new TwoLevelIndex over the envelope.
    ///
    /// The coarse grid has `nb_cells / reduction_factor` cells per axis,
    /// never fewer than one.
    pub fn new(envelope: Envelope, nb_cells: usize, reduction_factor: usize) -> Self {
        let dims = GridDimensions::new(envelope, nb_cells);
        let coarse_n = (nb_cells / reduction_factor).max(1);
        let mut coarse = Array2::from_elem((coarse_n, coarse_n), Region::default());
        for ci in 0..coarse_n {
            for cj in 0..coarse_n {
                // Regions round outward so a point's fine cell is always
                // inside the region of the coarse cell it maps to.
                coarse[[ci, cj]] = Region {
                    i0: ci * nb_cells / coarse_n,
                    i1: (((ci + 1) * nb_cells + coarse_n - 1) / coarse_n).min(nb_cells),
                    j0: cj * nb_cells / coarse_n,
                    j1: (((cj + 1) * nb_cells + coarse_n - 1) / coarse_n).min(nb_cells),
                };
            }
        }
        TwoLevelIndex {
            coarse_width: envelope.width() / coarse_n as f64,
            coarse_height: envelope.height() / coarse_n as f64,
            dims,
            coarse,
        }
    }

    /// The fine-grid geometry backing this index.
    pub fn dimensions(&self) -> &GridDimensions {
        &self.dims
    }

    /// Locate the fine cell containing a point.
    ///
    /// Returns None when the point falls outside the envelope. The point
    /// must already be expressed in the envelope's reference system.
    pub fn locate(&self, point: &Point) -> Option<(usize, usize)> {
        let envelope = &self.dims.envelope;
        if !envelope.contains(point) {
            return None;
        }
        let coarse_n = self.coarse.nrows();
        let ci = (((point.x - envelope.min_x) / self.coarse_width) as usize).min(coarse_n - 1);
        let cj = (((point.y - envelope.min_y) / self.coarse_height) as usize).min(coarse_n - 1);
        let region = self.coarse[[ci, cj]];
        for i in region.i0..region.i1 {
            for j in region.j0..region.j1 {
                if self.dims.cell_envelope(i, j).contains(point) {
                    return Some((i, j));
                }
            }
        }
        None
    }
}
