//! Sample-to-pixel reduction and the rendering peak

/// Maps processed samples onto display pixels
pub struct PixelScaler;

impl PixelScaler {
    /// Decimate `samples` to `target_width` pixels
    ///
    /// The first `skip` samples (overlap lead-in) are dropped. `span` is the
    /// number of samples the full width represents; when fewer are available
    /// (end of file) the remaining pixels stay 0 instead of stretching the
    /// short tail across the whole width.
    pub fn to_pixel_resolution(
        samples: &[f64],
        skip: usize,
        target_width: usize,
        span: usize,
    ) -> Vec<f64> {
        let mut pixels = vec![0.0; target_width];
        if target_width == 0 || skip >= samples.len() || span == 0 {
            return pixels;
        }

        let increment = span as f64 / target_width as f64;
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let index = (i as f64 * increment) as usize + skip;
            match samples.get(index) {
                Some(&value) => *pixel = value,
                None => break,
            }
        }
        pixels
    }

    /// Flatten single-pixel peaks and valleys, in place
    ///
    /// Works from a copy of the input so each decision sees the original
    /// neighbours.
    pub fn smooth_pixels(pixels: &mut [f64]) {
        if pixels.len() < 3 {
            return;
        }
        let original = pixels.to_vec();
        for i in 1..original.len() - 1 {
            let (prev, cur, next) = (original[i - 1], original[i], original[i + 1]);
            if cur > prev && cur > next {
                pixels[i] = prev.max(next);
            } else if cur < prev && cur < next {
                pixels[i] = prev.min(next);
            }
        }
    }

    /// Largest value reached by two consecutive pixels, ignoring the first
    /// `skip` pixels
    ///
    /// A lone spike is not drawn as a visible peak, so it should not set the
    /// vertical scale either.
    pub fn rendering_peak(pixels: &[f64], skip: usize) -> f64 {
        if pixels.len() < skip + 2 {
            return 0.0;
        }
        pixels[skip..]
            .windows(2)
            .map(|pair| pair[0].min(pair[1]))
            .fold(0.0, f64::max)
    }
}
