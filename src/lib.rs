pub mod error;
pub mod formats;
pub mod photometry;
pub mod session;
pub mod types;

pub use error::PhotometryError;
pub use photometry::{Aperture, PhotometryPipeline, PhotometryTable};
pub use session::Session;
