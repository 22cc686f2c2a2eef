use chrono::NaiveDateTime;
use ndarray::Array2;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DataType {
    Uint8,
    Int16,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub fn from_bitpix(bitpix: i32) -> Option<Self> {
        match bitpix {
            8 => Some(DataType::Uint8),
            16 => Some(DataType::Int16),
            32 => Some(DataType::Int32),
            -32 => Some(DataType::Float32),
            -64 => Some(DataType::Float64),
            _ => None,
        }
    }

    pub fn bitpix(self) -> i32 {
        match self {
            DataType::Uint8 => 8,
            DataType::Int16 => 16,
            DataType::Int32 => 32,
            DataType::Float32 => -32,
            DataType::Float64 => -64,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        (self.bitpix().unsigned_abs() as usize) / 8
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct ImageMetadata {
    pub width: usize,
    pub height: usize,
    pub dtype: DataType,
    /// Exposure time in seconds (EXPOSURE or EXPTIME card).
    pub exposure: Option<f64>,
    /// Observation start (DATE-OBS card).
    pub date_obs: Option<NaiveDateTime>,
}

impl ImageMetadata {
    pub fn new(width: usize, height: usize) -> Self {
        ImageMetadata {
            width,
            height,
            dtype: DataType::Float64,
            exposure: None,
            date_obs: None,
        }
    }
}

/// A single-plane image: header metadata plus pixels indexed `[[y, x]]`.
#[derive(Clone, Debug)]
pub struct Image {
    pub meta: ImageMetadata,
    pub pixels: Array2<f64>,
}
