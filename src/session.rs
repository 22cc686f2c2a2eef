//! Session files: image list, apertures and display cut settings as JSON.
//!
//! Sections that are missing or fail to parse fall back to their defaults
//! with a warning, so a session written by an older build still loads.

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::photometry::Aperture;

/// Display settings carried through sessions for viewers that share the
/// file. `cmap` and `scale` are indices into the viewer's own lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Lower percentile cut.
    pub lcut: f64,
    /// Upper percentile cut.
    pub ucut: f64,
    pub cmap: usize,
    pub scale: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        DisplaySettings {
            lcut: 0.25,
            ucut: 99.75,
            cmap: 0,
            scale: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub display: DisplaySettings,
    pub files: Vec<PathBuf>,
    pub apertures: Vec<Aperture>,
}

fn section<T: DeserializeOwned + Default>(root: &Map<String, Value>, key: &str) -> T {
    match root.get(key) {
        None => {
            warn!("{} section missing in session file", key);
            T::default()
        }
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("{} section corrupted in session file: {}", key, e);
                T::default()
            }
        },
    }
}

impl Session {
    /// Parse a session document. The top level must be a JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        let root: Map<String, Value> = serde_json::from_str(text)?;
        Ok(Session {
            display: section(&root, "display"),
            files: section(&root, "files"),
            apertures: section(&root, "apertures"),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let session = Self::from_json(&text)?;
        info!(
            "Loaded session {}: {} files, {} apertures",
            path.display(),
            session.files.len(),
            session.apertures.len()
        );
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        info!("Saved session to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhotometryError;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("night.json");

        let session = Session {
            display: DisplaySettings {
                lcut: 1.0,
                ucut: 99.0,
                cmap: 3,
                scale: 1,
            },
            files: vec![PathBuf::from("a.fits"), PathBuf::from("b.fits")],
            apertures: vec![Aperture::new(50.0, 50.0).with_radii(5.0, 10.0).with_name("Target")],
        };
        session.save(&path).unwrap();

        assert_eq!(Session::load(&path).unwrap(), session);
    }

    #[test]
    fn test_viewer_session_without_apertures() {
        let text = r#"{
            "display": {"lcut": 0.5, "ucut": 99.5, "cmap": 2, "scale": 4},
            "files": ["/data/m42_001.fits", "/data/m42_002.fits"]
        }"#;
        let session = Session::from_json(text).unwrap();
        assert_eq!(session.display.cmap, 2);
        assert_eq!(session.files.len(), 2);
        assert!(session.apertures.is_empty());
    }

    #[test]
    fn test_corrupt_section_falls_back_to_default() {
        let text = r#"{
            "display": {"lcut": "low"},
            "apertures": [{"x": 1.0, "y": 2.0, "r": 3.0, "br": 6.0, "name": "A"}]
        }"#;
        let session = Session::from_json(text).unwrap();
        assert_eq!(session.display, DisplaySettings::default());
        assert!(session.files.is_empty());
        assert_eq!(session.apertures[0].name, "A");
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(
            Session::from_json("[1, 2, 3]"),
            Err(PhotometryError::Json(_))
        ));
    }
}
