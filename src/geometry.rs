//! Spherical-mercator projected points.
//!
//! The intermediate feature stream stores coordinates in spherical-mercator
//! degrees (x is the longitude, y is the projected latitude). Output JSON
//! descriptors carry plain `[lon, lat]` decimal degrees, so the projection is
//! only unapplied at serialization time.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::f64::consts::FRAC_PI_4;

/// Latitudes beyond this are clamped before projecting; the projection
/// diverges towards the poles.
pub const MAX_LATITUDE: f64 = 86.0;

/// A point in spherical-mercator degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MercatorPoint {
    pub x: f64,
    pub y: f64,
}

/// A geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl MercatorPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Project a geographic point into mercator degrees.
    pub fn from_lat_lon(lat: f64, lon: f64) -> Self {
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let y = (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln().to_degrees();
        Self { x: lon, y }
    }

    /// Unproject back to decimal degrees.
    pub fn to_lat_lon(self) -> LatLon {
        let lat = (2.0 * self.y.to_radians().exp().atan() - FRAC_PI_2).to_degrees();
        LatLon { lat, lon: self.x }
    }
}

impl From<MercatorPoint> for geo_types::Coord<f64> {
    fn from(p: MercatorPoint) -> Self {
        geo_types::Coord { x: p.x, y: p.y }
    }
}

impl From<MercatorPoint> for geo_types::Point<f64> {
    fn from(p: MercatorPoint) -> Self {
        geo_types::Point::new(p.x, p.y)
    }
}

/// Bounding box of a set of rings, as `[min_x, min_y, max_x, max_y]`.
pub fn rings_bbox(rings: &[Vec<MercatorPoint>]) -> Option<[f64; 4]> {
    let mut bbox: Option<[f64; 4]> = None;
    for p in rings.iter().flatten() {
        bbox = Some(match bbox {
            None => [p.x, p.y, p.x, p.y],
            Some([min_x, min_y, max_x, max_y]) => [
                min_x.min(p.x),
                min_y.min(p.y),
                max_x.max(p.x),
                max_y.max(p.y),
            ],
        });
    }
    bbox
}
