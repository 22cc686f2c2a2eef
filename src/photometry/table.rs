use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use ndarray::Array2;

use crate::error::Result;

/// Photometry output: one row per image, each row holding a contiguous
/// (flux, error) pair per aperture in aperture order.
#[derive(Clone, Debug, PartialEq)]
pub struct PhotometryTable {
    aperture_names: Vec<String>,
    labels: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl PhotometryTable {
    pub(crate) fn new(aperture_names: Vec<String>, labels: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(labels.len(), rows.len());
        debug_assert!(rows.iter().all(|r| r.len() == aperture_names.len() * 2));
        PhotometryTable {
            aperture_names,
            labels,
            rows,
        }
    }

    /// `(images, 2 * apertures)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.aperture_names.len() * 2)
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn aperture_names(&self) -> &[String] {
        &self.aperture_names
    }

    /// Source of each row: file path or frame index.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn flux(&self, row: usize, aperture: usize) -> f64 {
        self.rows[row][aperture * 2]
    }

    pub fn error(&self, row: usize, aperture: usize) -> f64 {
        self.rows[row][aperture * 2 + 1]
    }

    /// (flux, error) of one aperture across all images.
    pub fn light_curve(&self, aperture: usize) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .map(|row| (row[aperture * 2], row[aperture * 2 + 1]))
            .collect()
    }

    pub fn to_array(&self) -> Array2<f64> {
        let (nrows, ncols) = self.shape();
        Array2::from_shape_fn((nrows, ncols), |(i, j)| self.rows[i][j])
    }

    fn header_line(&self, delimiter: u8) -> String {
        let sep = (delimiter as char).to_string();
        let columns: Vec<String> = self
            .aperture_names
            .iter()
            .flat_map(|name| {
                let name = name
                    .split(|c: char| c.is_whitespace() || c == delimiter as char)
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join("_");
                [format!("{}_flux", name), format!("{}_error", name)]
            })
            .collect();
        format!("# {}\n", columns.join(&sep))
    }

    /// Write a `#` header comment naming each column, then one delimited
    /// line per row.
    pub fn write_delimited<W: Write>(&self, mut writer: W, delimiter: u8) -> Result<()> {
        writer.write_all(self.header_line(delimiter).as_bytes())?;

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_writer(writer);
        for row in &self.rows {
            wtr.write_record(row.iter().map(|v| v.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn export(&self, path: &Path, delimiter: u8) -> Result<()> {
        let file = File::create(path)?;
        self.write_delimited(BufWriter::new(file), delimiter)?;
        info!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}
