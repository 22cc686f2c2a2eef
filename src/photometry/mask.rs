//! Aperture and background-annulus weight masks, with a geometry-keyed cache.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use ndarray::Array2;

use super::aperture::Aperture;

/// Weight grids for one aperture geometry, both `size x size`.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskPair {
    /// Annulus between the aperture edge and the background radius.
    pub background: Array2<f64>,
    pub aperture: Array2<f64>,
}

impl MaskPair {
    pub fn size(&self) -> usize {
        self.aperture.nrows()
    }

    /// Summed aperture weights (effective pixel count).
    pub fn aperture_area(&self) -> f64 {
        self.aperture.sum()
    }

    pub fn background_area(&self) -> f64 {
        self.background.sum()
    }
}

/// Side of the square grid needed for background radius `br`.
pub fn mask_size(br: f64) -> usize {
    (2.0 * br + 2.0).ceil() as usize
}

/// Full weight inside `radius`, a linear `1 - frac(d)` ramp over the next
/// pixel, zero beyond.
fn circle_weight(d: f64, radius: f64) -> f64 {
    if d <= radius {
        1.0
    } else if d < radius + 1.0 {
        1.0 - d.fract()
    } else {
        0.0
    }
}

fn build(r: f64, br: f64) -> MaskPair {
    let size = mask_size(br);
    // Cell `centre` lands on the rounded aperture centre in image space.
    let centre = br.ceil();
    let distance = |(y, x): (usize, usize)| (x as f64 - centre).hypot(y as f64 - centre);

    let aperture = Array2::from_shape_fn((size, size), |idx| circle_weight(distance(idx), r));
    let outer = Array2::from_shape_fn((size, size), |idx| circle_weight(distance(idx), br));

    MaskPair {
        background: outer - &aperture,
        aperture,
    }
}

/// Build the mask pair for an aperture. Depends only on `r` and `br`.
pub fn masks(aperture: &Aperture) -> MaskPair {
    build(aperture.r, aperture.br)
}

/// Cache key: exact bit patterns of the radii.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaskKey {
    r: u64,
    br: u64,
}

impl MaskKey {
    pub fn of(aperture: &Aperture) -> Self {
        MaskKey {
            r: aperture.r.to_bits(),
            br: aperture.br.to_bits(),
        }
    }
}

/// Memoized mask pairs keyed by aperture geometry. A changed radius maps to
/// a different key, so entries never go stale; position is irrelevant.
#[derive(Debug, Default)]
pub struct MaskCache {
    entries: HashMap<MaskKey, Arc<MaskPair>>,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, aperture: &Aperture) -> Arc<MaskPair> {
        let key = MaskKey::of(aperture);
        self.entries
            .entry(key)
            .or_insert_with(|| {
                trace!(
                    "Building masks for r={} br={} ({})",
                    aperture.r,
                    aperture.br,
                    aperture.name
                );
                Arc::new(masks(aperture))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
