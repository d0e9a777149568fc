//! Output dimension derivation from width, aspect ratio, and orientation.
//!
//! Generation backends require both dimensions to be divisible by 8, so the
//! derived height is snapped to the nearest multiple of [`DIMENSION_STEP`].
//! Everything here is total: malformed input degrades to a safe default
//! instead of failing the surrounding request flow.

use serde::{Deserialize, Serialize};

/* --------------------------------------------------------------------------
Named constants
-------------------------------------------------------------------------- */

/// Width used when the requested width is absent or not positive.
pub const DEFAULT_WIDTH: u32 = 1024;

/// Aspect ratio used when the requested ratio cannot be parsed.
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Both output dimensions must be a multiple of this value.
pub const DIMENSION_STEP: u32 = 8;

/// Aspect ratios offered by the generation editor.
pub const SUPPORTED_ASPECT_RATIOS: &[&str] = &["1:1", "4:3", "3:2", "16:9", "21:9"];

/* --------------------------------------------------------------------------
Orientation
-------------------------------------------------------------------------- */

/// Orientation of a non-square aspect ratio.
///
/// Ratios are authored landscape-first ("16:9"); `Portrait` flips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    #[default]
    Landscape,
}

impl Orientation {
    /// Parse an orientation name case-insensitively, defaulting to
    /// [`Orientation::Landscape`] for anything unrecognised.
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "portrait" => Self::Portrait,
            _ => Self::Landscape,
        }
    }
}

/* --------------------------------------------------------------------------
Derivation
-------------------------------------------------------------------------- */

/// Parse a `"W:H"` ratio into two positive components.
///
/// Returns `None` for anything that is not two positive integers separated
/// by a colon.
pub fn parse_aspect_ratio(ratio: &str) -> Option<(u32, u32)> {
    let (w, h) = ratio.trim().split_once(':')?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

/// Normalise a requested width, falling back to [`DEFAULT_WIDTH`].
pub fn effective_width(width: Option<i64>) -> u32 {
    match width {
        Some(w) if w > 0 => u32::try_from(w).unwrap_or(DEFAULT_WIDTH),
        _ => DEFAULT_WIDTH,
    }
}

/// Compute the output height for `width` at `aspect_ratio` in `orientation`.
///
/// Non-square ratios are swapped for [`Orientation::Portrait`]. The height
/// is `round(width * h / w)` snapped to the nearest multiple of
/// [`DIMENSION_STEP`], never below one step. A malformed ratio is treated
/// as [`DEFAULT_ASPECT_RATIO`].
pub fn compute_height(width: u32, aspect_ratio: &str, orientation: Orientation) -> u32 {
    let (mut w_ratio, mut h_ratio) = parse_aspect_ratio(aspect_ratio).unwrap_or((1, 1));

    if w_ratio != h_ratio && orientation == Orientation::Portrait {
        std::mem::swap(&mut w_ratio, &mut h_ratio);
    }

    let raw = (f64::from(width) * f64::from(h_ratio) / f64::from(w_ratio)).round();
    let step = f64::from(DIMENSION_STEP);
    let snapped = (raw / step).round() * step;

    (snapped as u32).max(DIMENSION_STEP)
}

/// Derive `(width, height)` from optional raw editor input.
pub fn derive_dimensions(
    width: Option<i64>,
    aspect_ratio: &str,
    orientation: Orientation,
) -> (u32, u32) {
    let width = effective_width(width);
    (width, compute_height(width, aspect_ratio, orientation))
}

/* --------------------------------------------------------------------------
Tests
-------------------------------------------------------------------------- */
