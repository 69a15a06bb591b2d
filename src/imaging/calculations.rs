//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate the dimensions of an image scaled so its longest edge is at
/// most `max_edge`, preserving aspect ratio.
///
/// Images already within the bound keep their size; scaling never enlarges.
/// Neither edge is ever rounded down to zero.
///
/// # Arguments
/// * `original` - Source dimensions (width, height)
/// * `max_edge` - Upper bound for the longer edge in pixels
///
/// # Returns
/// * `(width, height)` - Output dimensions
///
/// # Examples
/// ```
/// # use dropsize::imaging::fit_within;
/// // 4000x3000 landscape bounded at 1080 → 1080x810
/// assert_eq!(fit_within((4000, 3000), 1080), (1080, 810));
///
/// // Small images are left alone
/// assert_eq!(fit_within((200, 100), 1080), (200, 100));
/// ```
pub fn fit_within(original: (u32, u32), max_edge: u32) -> (u32, u32) {
    let (orig_w, orig_h) = original;
    let longer_edge = orig_w.max(orig_h);

    if longer_edge <= max_edge || longer_edge == 0 {
        return original;
    }

    let ratio = max_edge as f64 / longer_edge as f64;
    if orig_w >= orig_h {
        // Landscape or square
        let h = ((orig_h as f64 * ratio).round() as u32).max(1);
        (max_edge, h)
    } else {
        // Portrait
        let w = ((orig_w as f64 * ratio).round() as u32).max(1);
        (w, max_edge)
    }
}

/// Whether an image of the given dimensions needs scaling for `max_edge`.
pub fn needs_scaling(original: (u32, u32), max_edge: u32) -> bool {
    original.0.max(original.1) > max_edge
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // fit_within tests
    // =========================================================================

    #[test]
    fn fit_landscape() {
        assert_eq!(fit_within((4000, 3000), 320), (320, 240));
    }

    #[test]
    fn fit_portrait() {
        assert_eq!(fit_within((3000, 4000), 320), (240, 320));
    }

    #[test]
    fn fit_square() {
        assert_eq!(fit_within((2000, 2000), 1080), (1080, 1080));
    }

    #[test]
    fn fit_never_enlarges() {
        assert_eq!(fit_within((300, 200), 1080), (300, 200));
    }

    #[test]
    fn fit_exact_bound_is_unchanged() {
        assert_eq!(fit_within((1080, 720), 1080), (1080, 720));
    }

    #[test]
    fn fit_extreme_panorama_keeps_one_pixel() {
        assert_eq!(fit_within((10000, 10), 100), (100, 1));
    }

    #[test]
    fn fit_rounds_to_nearest() {
        // 1000x333 → ratio 0.32 → 320x106.56 → 107
        assert_eq!(fit_within((1000, 333), 320), (320, 107));
    }

    // =========================================================================
    // needs_scaling tests
    // =========================================================================

    #[test]
    fn needs_scaling_only_above_bound() {
        assert!(needs_scaling((1081, 10), 1080));
        assert!(needs_scaling((10, 1081), 1080));
        assert!(!needs_scaling((1080, 1080), 1080));
    }
}
