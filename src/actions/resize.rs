//! Model-side image sizing and the inverse coordinate mapping.

use super::ActionError;

/// Resized dimensions are multiples of this.
pub const RESIZE_FACTOR: u32 = 28;
/// Lower bound on resized pixel count.
pub const MIN_PIXELS: u64 = 3136;
/// Upper bound on resized pixel count.
pub const MAX_PIXELS: u64 = 5_000_000;
const MAX_ASPECT_RATIO: f64 = 200.0;

/// Bounds used when resizing a screenshot for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeBounds {
    pub factor: u32,
    pub min_pixels: u64,
    pub max_pixels: u64,
}

impl Default for ResizeBounds {
    fn default() -> Self {
        Self {
            factor: RESIZE_FACTOR,
            min_pixels: MIN_PIXELS,
            max_pixels: MAX_PIXELS,
        }
    }
}

/// Compute `(width, height)` for the model image.
///
/// Both sides become multiples of `factor`, the area lands inside
/// `[min_pixels, max_pixels]` and the aspect ratio is kept as close as the
/// grid allows.
pub fn smart_resize(width: u32, height: u32, bounds: ResizeBounds) -> Result<(u32, u32), ActionError> {
    if width == 0 || height == 0 || bounds.factor == 0 {
        return Err(ActionError::Resize(format!("invalid dimensions {}x{}", width, height)));
    }

    let (w, h) = (width as f64, height as f64);
    if w.max(h) / w.min(h) > MAX_ASPECT_RATIO {
        return Err(ActionError::Resize(format!(
            "aspect ratio of {}x{} exceeds {}",
            width, height, MAX_ASPECT_RATIO
        )));
    }

    let factor = bounds.factor as f64;
    let snap = |v: f64, op: fn(f64) -> f64| (op(v / factor) * factor).max(factor);

    let mut w_bar = snap(w, f64::round);
    let mut h_bar = snap(h, f64::round);

    if w_bar * h_bar > bounds.max_pixels as f64 {
        let beta = (w * h / bounds.max_pixels as f64).sqrt();
        w_bar = snap(w / beta, f64::floor);
        h_bar = snap(h / beta, f64::floor);
    } else if w_bar * h_bar < bounds.min_pixels as f64 {
        let beta = (bounds.min_pixels as f64 / (w * h)).sqrt();
        w_bar = snap(w * beta, f64::ceil);
        h_bar = snap(h * beta, f64::ceil);
    }

    Ok((w_bar as u32, h_bar as u32))
}

/// Maps points between device pixels and the resized model image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    pub device_width: u32,
    pub device_height: u32,
    pub resized_width: u32,
    pub resized_height: u32,
}

impl CoordinateTransform {
    /// Transform for a screen of `width`x`height` under `bounds`.
    pub fn for_screen(width: u32, height: u32, bounds: ResizeBounds) -> Result<Self, ActionError> {
        let (resized_width, resized_height) = smart_resize(width, height, bounds)?;
        Ok(Self {
            device_width: width,
            device_height: height,
            resized_width,
            resized_height,
        })
    }

    /// Identity mapping, for oracles that work in device pixels.
    pub fn identity(width: u32, height: u32) -> Self {
        Self {
            device_width: width,
            device_height: height,
            resized_width: width,
            resized_height: height,
        }
    }

    fn scale_x(&self) -> f64 {
        self.device_width as f64 / self.resized_width as f64
    }

    fn scale_y(&self) -> f64 {
        self.device_height as f64 / self.resized_height as f64
    }

    /// Model-space point to device pixels, rounded to the nearest pixel.
    pub fn to_device(&self, x: f64, y: f64) -> (i32, i32) {
        (
            (x * self.scale_x()).round() as i32,
            (y * self.scale_y()).round() as i32,
        )
    }

    /// Device pixel to model-space point.
    pub fn to_resized(&self, x: i32, y: i32) -> (f64, f64) {
        (x as f64 / self.scale_x(), y as f64 / self.scale_y())
    }

    /// Whether a device point lies on screen.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.device_width && (y as u32) < self.device_height
    }
}
