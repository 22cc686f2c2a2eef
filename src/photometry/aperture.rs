use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PhotometryError, Result};

/// Circular region of interest with a background annulus.
///
/// Serializes as the flat `x, y, r, br, name` record used by session files.
/// `x` is the column and `y` the row, in 0-based pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    pub x: f64,
    pub y: f64,
    /// Inner (signal) radius.
    pub r: f64,
    /// Outer (background) radius.
    pub br: f64,
    pub name: String,
}

impl Aperture {
    pub const DEFAULT_RADIUS: f64 = 10.0;
    pub const DEFAULT_BACKGROUND_RADIUS: f64 = 20.0;

    pub fn new(x: f64, y: f64) -> Self {
        Aperture {
            x,
            y,
            r: Self::DEFAULT_RADIUS,
            br: Self::DEFAULT_BACKGROUND_RADIUS,
            name: "Aperture".to_string(),
        }
    }

    pub fn with_radii(mut self, r: f64, br: f64) -> Self {
        self.r = r;
        self.br = br;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Reject geometry the pipeline cannot measure: non-finite values, a
    /// non-positive radius, or an annulus thinner than one pixel.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PhotometryError::InvalidAperture {
            name: self.name.clone(),
            reason,
        };

        if ![self.x, self.y, self.r, self.br].iter().all(|v| v.is_finite()) {
            return Err(invalid("position and radii must be finite".to_string()));
        }
        if self.r <= 0.0 {
            return Err(invalid(format!("radius {} must be positive", self.r)));
        }
        if self.br < self.r + 1.0 {
            return Err(invalid(format!(
                "background radius {} must be at least radius + 1 ({})",
                self.br,
                self.r + 1.0
            )));
        }
        Ok(())
    }

    /// Top-left pixel of the mask-sized box centred on this aperture.
    /// Saturates for centres far outside any image.
    pub fn box_origin(&self) -> (i64, i64) {
        let reach = self.br.ceil() as i64;
        (
            (self.x.round() as i64).saturating_sub(reach),
            (self.y.round() as i64).saturating_sub(reach),
        )
    }

    /// Whether a point falls inside the outer radius.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (x - self.x).hypot(y - self.y) < self.br
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }
}

impl FromStr for Aperture {
    type Err = PhotometryError;

    /// Parse `x,y,r,br[,name]`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(5, ',').map(str::trim).collect();
        let invalid = |reason: &str| PhotometryError::InvalidAperture {
            name: s.to_string(),
            reason: reason.to_string(),
        };

        if parts.len() < 4 {
            return Err(invalid("expected x,y,r,br[,name]"));
        }
        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| invalid(&format!("'{}' is not a number", part)))?;
        }

        let mut aperture = Aperture::new(values[0], values[1]).with_radii(values[2], values[3]);
        if let Some(name) = parts.get(4).filter(|n| !n.is_empty()) {
            aperture.name = name.to_string();
        }
        Ok(aperture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ap = Aperture::new(12.0, 34.0);
        assert_eq!(ap.r, 10.0);
        assert_eq!(ap.br, 20.0);
        assert_eq!(ap.name, "Aperture");
    }

    #[test]
    fn test_serializes_as_flat_record() {
        let ap = Aperture::new(50.0, 40.5).with_radii(5.0, 10.0).with_name("Target");
        let value = serde_json::to_value(&ap).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"x": 50.0, "y": 40.5, "r": 5.0, "br": 10.0, "name": "Target"})
        );

        let back: Aperture = serde_json::from_value(value).unwrap();
        assert_eq!(back, ap);
    }

    #[test]
    fn test_validate_rejects_degenerate_geometry() {
        let ok = Aperture::new(0.0, 0.0).with_radii(5.0, 6.0);
        assert!(ok.validate().is_ok());

        for (r, br) in [(0.0, 5.0), (-1.0, 5.0), (5.0, 5.0), (5.0, 5.5), (5.0, 3.0)] {
            let ap = Aperture::new(0.0, 0.0).with_radii(r, br);
            assert!(
                matches!(ap.validate(), Err(PhotometryError::InvalidAperture { .. })),
                "r={} br={} should be rejected",
                r,
                br
            );
        }

        let nan = Aperture::new(f64::NAN, 0.0).with_radii(5.0, 10.0);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_box_origin_rounds_centre() {
        let ap = Aperture::new(50.0, 50.0).with_radii(5.0, 10.0);
        assert_eq!(ap.box_origin(), (40, 40));

        let ap = Aperture::new(50.6, 49.4).with_radii(5.0, 10.5);
        assert_eq!(ap.box_origin(), (40, 38));
    }

    #[test]
    fn test_box_origin_saturates_far_off_centre() {
        let ap = Aperture::new(-1e20, 1e20).with_radii(5.0, 10.0);
        assert!(ap.validate().is_ok());
        assert_eq!(ap.box_origin(), (i64::MIN, i64::MAX - 10));
    }

    #[test]
    fn test_contains_uses_outer_radius() {
        let ap = Aperture::new(10.0, 10.0).with_radii(2.0, 4.0);
        assert!(ap.contains(13.0, 10.0));
        assert!(!ap.contains(14.0, 10.0));
    }

    #[test]
    fn test_parse() {
        let ap: Aperture = "50, 60, 5, 10, Comparison star".parse().unwrap();
        assert_eq!((ap.x, ap.y, ap.r, ap.br), (50.0, 60.0, 5.0, 10.0));
        assert_eq!(ap.name, "Comparison star");

        let unnamed: Aperture = "1,2,3,4".parse().unwrap();
        assert_eq!(unnamed.name, "Aperture");

        assert!("1,2,3".parse::<Aperture>().is_err());
        assert!("1,2,x,4".parse::<Aperture>().is_err());
    }
}
