//! Resolution of provider bounding boxes into pixel rectangles.
//!
//! Providers disagree on units: some return fractions of the image, some
//! percentages, a few raw pixels, and fractional boxes are sometimes anchored
//! at the face center instead of the top-left corner. The format is decided
//! once per box by [`CoordinateFormat::detect`]; from then on the box travels
//! through the pipeline as a top-left percentage box.

use serde::Serialize;

use super::types::{BoundingBox, NormalizedRegion};
use crate::error::{FaceError, FaceResult};

/// Fallback used when a box cannot be interpreted at all.
pub const DEFAULT_PERCENT_BOX: BoundingBox = BoundingBox::new(25.0, 25.0, 50.0, 50.0);

/// Smallest crop edge in pixels, before the 1% rule.
const MIN_EXTENT_PX: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    TopLeft,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "format", content = "anchor")]
pub enum CoordinateFormat {
    /// All values in 0.0..=1.0.
    Fractional(Anchor),
    /// All values in 0..=100.
    Percentage,
    Pixel,
    /// Non-finite or non-positive size; replaced by [`DEFAULT_PERCENT_BOX`].
    Unrecognized,
}

impl CoordinateFormat {
    /// Decide the unit of `bbox` by magnitude. Image dimensions are only
    /// consulted to pick the anchor of fractional boxes.
    pub fn detect(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Self {
        if !bbox.is_finite() || bbox.width <= 0.0 || bbox.height <= 0.0 {
            return CoordinateFormat::Unrecognized;
        }

        let values = [bbox.x, bbox.y, bbox.width, bbox.height];

        if values.iter().all(|v| *v <= 1.0) {
            CoordinateFormat::Fractional(fractional_anchor(bbox, image_width, image_height))
        } else if values.iter().all(|v| *v <= 100.0) {
            CoordinateFormat::Percentage
        } else {
            CoordinateFormat::Pixel
        }
    }
}

/// Prefer the center reading only when it fits the image and the top-left
/// reading does not.
fn fractional_anchor(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Anchor {
    let w = image_width as f32;
    let h = image_height as f32;

    let (x, y) = (bbox.x * w, bbox.y * h);
    let (fw, fh) = (bbox.width * w, bbox.height * h);

    let top_left_fits = x >= 0.0 && y >= 0.0 && x + fw <= w && y + fh <= h;
    let center_fits =
        x - fw / 2.0 >= 0.0 && y - fh / 2.0 >= 0.0 && x + fw / 2.0 <= w && y + fh / 2.0 <= h;

    if center_fits && !top_left_fits {
        Anchor::Center
    } else {
        Anchor::TopLeft
    }
}

/// Converts provider boxes into pixel rectangles inside the image.
#[derive(Debug, Clone, Default)]
pub struct CoordinateNormalizer;

impl CoordinateNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the format of `bbox` and express it as a top-left percentage box.
    pub fn to_percent(
        &self,
        bbox: &BoundingBox,
        image_width: u32,
        image_height: u32,
    ) -> FaceResult<(CoordinateFormat, BoundingBox)> {
        ensure_dimensions(image_width, image_height)?;

        let format = CoordinateFormat::detect(bbox, image_width, image_height);
        let percent = match format {
            CoordinateFormat::Fractional(Anchor::TopLeft) => BoundingBox::new(
                bbox.x * 100.0,
                bbox.y * 100.0,
                bbox.width * 100.0,
                bbox.height * 100.0,
            ),
            CoordinateFormat::Fractional(Anchor::Center) => BoundingBox::new(
                (bbox.x - bbox.width / 2.0) * 100.0,
                (bbox.y - bbox.height / 2.0) * 100.0,
                bbox.width * 100.0,
                bbox.height * 100.0,
            ),
            CoordinateFormat::Percentage => *bbox,
            CoordinateFormat::Pixel => BoundingBox::new(
                bbox.x / image_width as f32 * 100.0,
                bbox.y / image_height as f32 * 100.0,
                bbox.width / image_width as f32 * 100.0,
                bbox.height / image_height as f32 * 100.0,
            ),
            CoordinateFormat::Unrecognized => DEFAULT_PERCENT_BOX,
        };

        match format {
            CoordinateFormat::Unrecognized => tracing::warn!(
                x = bbox.x,
                y = bbox.y,
                width = bbox.width,
                height = bbox.height,
                "Unrecognized bounding box, using default centered region"
            ),
            _ => tracing::debug!(?format, ?bbox, ?percent, "Resolved bounding box format"),
        }

        Ok((format, percent))
    }

    /// Map a top-left percentage box to pixels, clamped into the image and
    /// floored to a minimum size.
    pub fn region_from_percent(
        &self,
        percent: &BoundingBox,
        image_width: u32,
        image_height: u32,
    ) -> FaceResult<NormalizedRegion> {
        ensure_dimensions(image_width, image_height)?;

        let percent = if percent.is_finite() {
            *percent
        } else {
            DEFAULT_PERCENT_BOX
        };

        let (x, width) = clamp_axis(
            percent.x as f64 / 100.0 * image_width as f64,
            percent.width as f64 / 100.0 * image_width as f64,
            image_width,
        );
        let (y, height) = clamp_axis(
            percent.y as f64 / 100.0 * image_height as f64,
            percent.height as f64 / 100.0 * image_height as f64,
            image_height,
        );

        Ok(NormalizedRegion { x, y, width, height })
    }

    /// Detect, convert and clamp in one step.
    pub fn normalize(
        &self,
        bbox: &BoundingBox,
        image_width: u32,
        image_height: u32,
    ) -> FaceResult<NormalizedRegion> {
        let (_, percent) = self.to_percent(bbox, image_width, image_height)?;
        self.region_from_percent(&percent, image_width, image_height)
    }
}

fn ensure_dimensions(image_width: u32, image_height: u32) -> FaceResult<()> {
    if image_width == 0 || image_height == 0 {
        return Err(FaceError::ZeroDimensions);
    }
    Ok(())
}

/// A few pixels, or 1% of the dimension, never more than the dimension itself.
fn min_extent(dimension: u32) -> u32 {
    let one_percent = (dimension as f64 * 0.01).ceil() as u32;
    MIN_EXTENT_PX.max(one_percent).min(dimension)
}

/// Clamp an (offset, length) pair in pixels into `0..dimension`.
fn clamp_axis(offset: f64, length: f64, dimension: u32) -> (u32, u32) {
    let min_len = min_extent(dimension);
    let max_offset = (dimension - min_len) as f64;

    let start = offset.max(0.0).min(max_offset).floor() as u32;
    let len = length.round().max(min_len as f64).min((dimension - start) as f64) as u32;

    (start, len)
}

/// Non-fatal observations about a resolved region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionWarning {
    /// Under 10px on a side; usually a misread coordinate format.
    TooSmall,
    /// Over 80% of the image on a side.
    TooLarge,
    /// Width/height ratio outside 0.3..=3.0.
    UnusualAspect,
}

pub fn validate_region(
    region: &NormalizedRegion,
    image_width: u32,
    image_height: u32,
) -> Vec<RegionWarning> {
    let mut warnings = Vec::new();

    if region.width < 10 || region.height < 10 {
        warnings.push(RegionWarning::TooSmall);
    }

    if region.width as f64 > image_width as f64 * 0.8
        || region.height as f64 > image_height as f64 * 0.8
    {
        warnings.push(RegionWarning::TooLarge);
    }

    let aspect = region.width as f64 / region.height.max(1) as f64;
    if !(0.3..=3.0).contains(&aspect) {
        warnings.push(RegionWarning::UnusualAspect);
    }

    warnings
}
