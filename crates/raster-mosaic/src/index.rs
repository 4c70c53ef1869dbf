//! R-tree index over source raster footprints.
//!
//! Built once per merge job and queried once per output tile. Queries are
//! answered at bounding-box precision; per-pixel coverage is resolved later
//! by the tile merger.

use rstar::{RTree, RTreeObject, AABB};

use crate::types::{Bounds, SourceRaster};

/// A source footprint stored in the R-tree.
#[derive(Debug, Clone, Copy)]
struct Footprint {
    /// Position of the source in the job's input list.
    id: usize,
    bounds: Bounds,
}

impl RTreeObject for Footprint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.left, self.bounds.bottom],
            [self.bounds.right, self.bounds.top],
        )
    }
}

/// Read-only spatial index mapping file ids to bounds.
pub struct SpatialIndex {
    tree: RTree<Footprint>,
}

impl SpatialIndex {
    /// Bulk-load the footprints of all sources; ids are list positions.
    pub fn build(sources: &[SourceRaster]) -> Self {
        let footprints = sources
            .iter()
            .enumerate()
            .map(|(id, src)| Footprint {
                id,
                bounds: src.bounds,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(footprints),
        }
    }

    /// Ids of every source whose bounds intersect `rect`, ascending.
    ///
    /// Sorting gives `first`/`last` aggregation a canonical candidate order
    /// independent of the tree's internal layout.
    pub fn query(&self, rect: &Bounds) -> Vec<usize> {
        let envelope = AABB::from_corners([rect.left, rect.bottom], [rect.right, rect.top]);
        let mut ids: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|fp| fp.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of indexed sources.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
