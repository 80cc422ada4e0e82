//! Scale calibration and pixel to real-world unit conversion.
//!
//! A calibration maps distances in document-native pixels to real-world
//! units. Linear quantities divide by the ratio once, areas divide by its
//! square.

use crate::geometry::PagePoint;

/// How the pixels-per-unit ratio was established.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ScaleSource {
    /// Ratio entered directly (native pixels per real-world unit).
    Manual { px_per_unit: f32 },
    /// Two points a known real-world distance apart.
    TwoPoint {
        p1: PagePoint,
        p2: PagePoint,
        /// Declared distance between the points in real-world units.
        distance: f32,
    },
}

/// Calibrated pixel-to-real-world scale for a document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScaleCalibration {
    source: ScaleSource,
    /// Unit of measurement, e.g. "ft", "m".
    unit: String,
}

impl ScaleCalibration {
    /// Calibrate from a directly entered ratio.
    pub fn manual(px_per_unit: f32, unit: impl Into<String>) -> Self {
        Self { source: ScaleSource::Manual { px_per_unit }, unit: unit.into() }
    }

    /// Calibrate from two points a declared distance apart.
    pub fn two_point(
        p1: PagePoint,
        p2: PagePoint,
        distance: f32,
        unit: impl Into<String>,
    ) -> Self {
        Self { source: ScaleSource::TwoPoint { p1, p2, distance }, unit: unit.into() }
    }

    /// Native pixels per real-world unit.
    pub fn px_per_unit(&self) -> f32 {
        match &self.source {
            ScaleSource::Manual { px_per_unit } => *px_per_unit,
            ScaleSource::TwoPoint { p1, p2, distance } => {
                let px = p1.distance_to(p2);
                if *distance > 0.0 && px > 0.0 {
                    px / distance
                } else {
                    1.0 // Identical points or zero distance: fall back to 1:1
                }
            }
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Convert a native pixel distance to real-world units.
    pub fn px_to_units(&self, px: f32) -> f32 {
        px / self.px_per_unit()
    }

    /// Convert a real-world distance to native pixels.
    pub fn units_to_px(&self, value: f32) -> f32 {
        value * self.px_per_unit()
    }

    /// Convert a native pixel area to square real-world units.
    pub fn px_area_to_units(&self, px_area: f32) -> f32 {
        let ratio = self.px_per_unit();
        px_area / (ratio * ratio)
    }

    /// Format a linear value with the unit suffix, e.g. `20.00 ft`.
    pub fn format_length(&self, value: f32) -> String {
        format!("{:.2} {}", value, self.unit)
    }

    /// Format an area value with the squared unit suffix, e.g. `4.50 ft²`.
    pub fn format_area(&self, value: f32) -> String {
        format!("{:.2} {}²", value, self.unit)
    }
}

impl Default for ScaleCalibration {
    fn default() -> Self {
        Self::manual(1.0, "px")
    }
}
