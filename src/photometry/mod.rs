//! Aperture photometry: masks, per-image flux extraction and result tables.

mod aperture;
mod mask;
mod pipeline;
mod table;

pub use aperture::Aperture;
pub use mask::{mask_size, masks, MaskCache, MaskKey, MaskPair};
pub use pipeline::{measure, measure_with_masks, ApertureMeasurement, PhotometryPipeline};
pub use table::PhotometryTable;
