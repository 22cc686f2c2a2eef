//! Background-subtracted aperture flux over a sequence of images.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;

use super::aperture::Aperture;
use super::mask::{MaskCache, MaskPair};
use super::table::PhotometryTable;
use crate::error::{PhotometryError, Result};
use crate::formats;

/// One aperture measured on one image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ApertureMeasurement {
    /// Aperture sum minus the background mean times the aperture area.
    pub flux: f64,
    /// Poisson estimate `sqrt(flux)`; NaN when the flux is negative.
    pub error: f64,
    pub background_mean: f64,
    pub aperture_area: f64,
    pub background_area: f64,
}

fn weighted_sum(region: &ArrayView2<f64>, mask: &Array2<f64>) -> f64 {
    region
        .iter()
        .zip(mask.iter())
        .map(|(&p, &w)| p * w)
        .sum()
}

/// Measure `aperture` on `pixels` using precomputed `masks`.
///
/// `image` only labels errors. The mask box must lie entirely inside the
/// image; it is never clipped or padded.
pub fn measure_with_masks(
    pixels: ArrayView2<f64>,
    aperture: &Aperture,
    masks: &MaskPair,
    image: &str,
) -> Result<ApertureMeasurement> {
    let size = masks.size();
    let (height, width) = pixels.dim();
    let (x1, y1) = aperture.box_origin();

    let overruns = |origin: i64, limit: usize| {
        usize::try_from(origin)
            .ok()
            .and_then(|start| start.checked_add(size))
            .map_or(true, |end| end > limit)
    };
    if overruns(x1, width) || overruns(y1, height) {
        return Err(PhotometryError::OutOfBounds {
            image: image.to_string(),
            aperture: aperture.name.clone(),
            x1,
            y1,
            size,
            width,
            height,
        });
    }
    let (x1, y1) = (x1 as usize, y1 as usize);
    let region = pixels.slice(s![y1..y1 + size, x1..x1 + size]);

    let background_area = masks.background_area();
    if background_area <= 0.0 {
        return Err(PhotometryError::EmptyBackground {
            image: image.to_string(),
            aperture: aperture.name.clone(),
        });
    }
    let background_mean = weighted_sum(&region, &masks.background) / background_area;

    let aperture_area = masks.aperture_area();
    let flux = weighted_sum(&region, &masks.aperture) - background_mean * aperture_area;

    Ok(ApertureMeasurement {
        flux,
        error: flux.sqrt(),
        background_mean,
        aperture_area,
        background_area,
    })
}

/// Validate `aperture`, build its masks and measure it on `pixels`.
pub fn measure(pixels: ArrayView2<f64>, aperture: &Aperture) -> Result<ApertureMeasurement> {
    aperture.validate()?;
    let masks = super::mask::masks(aperture);
    measure_with_masks(pixels, aperture, &masks, "image")
}

/// Runs aperture photometry over ordered image lists.
///
/// Mask pairs are cached across runs by aperture geometry. Rows are computed
/// in parallel unless [`sequential`](Self::sequential) is set, and always
/// come back in input order. Any failure aborts the run.
pub struct PhotometryPipeline {
    cache: MaskCache,
    parallel: bool,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl PhotometryPipeline {
    pub fn new() -> Self {
        PhotometryPipeline {
            cache: MaskCache::new(),
            parallel: true,
            thread_pool: None,
        }
    }

    /// Measure images one after another on the calling thread.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Use a custom rayon thread pool.
    pub fn with_thread_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    pub fn mask_cache(&self) -> &MaskCache {
        &self.cache
    }

    /// Measure every aperture on every file, in order.
    pub fn run<P>(&mut self, files: &[P], apertures: &[Aperture]) -> Result<PhotometryTable>
    where
        P: AsRef<Path> + Sync,
    {
        let masks = self.prepare(apertures)?;
        info!(
            "Measuring {} apertures on {} images",
            apertures.len(),
            files.len()
        );

        let rows = self.collect_rows(files.len(), |index| {
            let path = files[index].as_ref();
            let image =
                formats::read_image(path).map_err(|source| PhotometryError::ImageRead {
                    index,
                    path: path.to_path_buf(),
                    source: source.into(),
                })?;
            debug!(
                "Image {} ({}): {}x{}",
                index,
                path.display(),
                image.meta.width,
                image.meta.height
            );
            let label = format!("image {} ({})", index, path.display());
            measure_row(image.pixels.view(), apertures, &masks, &label)
        })?;

        let labels = files
            .iter()
            .map(|p| p.as_ref().display().to_string())
            .collect();
        Ok(PhotometryTable::new(aperture_names(apertures), labels, rows))
    }

    /// Same as [`run`](Self::run) for frames already in memory, such as
    /// camera exposures.
    pub fn run_frames(
        &mut self,
        frames: &[Array2<f64>],
        apertures: &[Aperture],
    ) -> Result<PhotometryTable> {
        let masks = self.prepare(apertures)?;
        info!(
            "Measuring {} apertures on {} frames",
            apertures.len(),
            frames.len()
        );

        let rows = self.collect_rows(frames.len(), |index| {
            let label = format!("frame {}", index);
            measure_row(frames[index].view(), apertures, &masks, &label)
        })?;

        let labels = (0..frames.len()).map(|i| format!("frame {}", i)).collect();
        Ok(PhotometryTable::new(aperture_names(apertures), labels, rows))
    }

    fn prepare(&mut self, apertures: &[Aperture]) -> Result<Vec<Arc<MaskPair>>> {
        if apertures.is_empty() {
            return Err(PhotometryError::NoApertures);
        }
        for (outer, inner) in contaminated_backgrounds(apertures) {
            warn!(
                "Aperture '{}' lies inside the background of '{}'",
                apertures[inner].name, apertures[outer].name
            );
        }
        apertures
            .iter()
            .map(|aperture| {
                aperture.validate()?;
                Ok(self.cache.get(aperture))
            })
            .collect()
    }

    /// Evaluate `row` for `0..count`. In parallel mode every row is computed
    /// and the lowest failing index wins, so the reported error matches a
    /// sequential run.
    fn collect_rows<F>(&self, count: usize, row: F) -> Result<Vec<Vec<f64>>>
    where
        F: Fn(usize) -> Result<Vec<f64>> + Sync + Send,
    {
        if !self.parallel {
            return (0..count).map(&row).collect();
        }

        let compute = || -> Vec<Result<Vec<f64>>> { (0..count).into_par_iter().map(&row).collect() };
        let results = match &self.thread_pool {
            Some(pool) => pool.install(compute),
            None => compute(),
        };
        results.into_iter().collect()
    }
}

impl Default for PhotometryPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pairs `(outer, inner)` where aperture `inner`'s centre falls within
/// aperture `outer`'s background radius.
pub(crate) fn contaminated_backgrounds(apertures: &[Aperture]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, outer) in apertures.iter().enumerate() {
        for (j, inner) in apertures.iter().enumerate() {
            if i != j && outer.contains(inner.x, inner.y) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

fn aperture_names(apertures: &[Aperture]) -> Vec<String> {
    apertures.iter().map(|a| a.name.clone()).collect()
}

fn measure_row(
    pixels: ArrayView2<f64>,
    apertures: &[Aperture],
    masks: &[Arc<MaskPair>],
    image: &str,
) -> Result<Vec<f64>> {
    let mut row = Vec::with_capacity(apertures.len() * 2);
    for (aperture, pair) in apertures.iter().zip(masks) {
        let m = measure_with_masks(pixels, aperture, pair, image)?;
        row.push(m.flux);
        row.push(m.error);
    }
    Ok(row)
}
