use std::path::Path;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::atomic_file::write_atomic;
use crate::error::{Result, SolverError};

/// A geotagged point of interest and the URL of its photo, as listed in the metadata CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    #[serde(rename = "Image")]
    pub image_url: String,
}

impl Portal {
    /// File name of the downloaded photo, see [`parse_portal_filename`].
    pub fn image_filename(&self) -> String {
        parse_portal_filename(&self.image_url, self.latitude, self.longitude)
    }
}

/// `{lat:.6}_{lng:.6}_{md5(image_url)}.jpg`, unique per portal even when two portals
/// share coordinates.
///
/// # Examples
/// ```
/// use ifssolver::portal::parse_portal_filename;
///
/// assert_eq!(
///     parse_portal_filename("", 31.2, 121.5),
///     "31.200000_121.500000_d41d8cd98f00b204e9800998ecf8427e.jpg"
/// );
/// ```
pub fn parse_portal_filename(image_url: &str, latitude: f64, longitude: f64) -> String {
    let digest = Md5::digest(image_url.as_bytes());
    format!("{latitude:.6}_{longitude:.6}_{digest:x}.jpg")
}

/// Reads the metadata table. Columns other than `Name,Latitude,Longitude,Image` are ignored.
///
/// # Errors
/// [`SolverError::MissingInput`] when the file does not exist, CSV errors for malformed rows.
pub fn read_portals(path: &Path) -> Result<Vec<Portal>> {
    if !path.exists() {
        return Err(SolverError::MissingInput(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut portals = Vec::new();
    for row in reader.deserialize() {
        portals.push(row?);
    }
    Ok(portals)
}

pub fn write_portals(path: &Path, portals: &[Portal]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for portal in portals {
        writer.serialize(portal)?;
    }
    let bytes = writer.into_inner().map_err(|e| SolverError::Io(e.into_error()))?;
    write_atomic(path, &bytes)
}
