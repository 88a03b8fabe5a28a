//! Band-pass filter for display processing
//!
//! Two cascaded state-variable filters (TPT/SVF form): a high-pass at the
//! lower edge and a low-pass at the upper edge. Cutoffs are fractions of the
//! sample rate, so one filter serves any file.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Highest usable normalized cutoff (just below Nyquist)
const MAX_NORMALIZED: f64 = 0.499;
const MIN_NORMALIZED: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
struct SvfCoefficients {
    k: f64,
    a1: f64,
    a2: f64,
    a3: f64,
}

impl SvfCoefficients {
    fn new(normalized_cutoff: f64, q: f64) -> Self {
        let g = (PI * normalized_cutoff).tan();
        let k = 1.0 / q;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;
        Self { k, a1, a2, a3 }
    }
}

#[derive(Debug, Default)]
struct SvfState {
    ic1eq: f64,
    ic2eq: f64,
}

impl SvfState {
    /// One sample through the filter, returns (low, high)
    #[inline]
    fn tick(&mut self, c: &SvfCoefficients, input: f64) -> (f64, f64) {
        let v3 = input - self.ic2eq;
        let v1 = c.a1 * self.ic1eq + c.a2 * v3;
        let v2 = self.ic2eq + c.a2 * self.ic1eq + c.a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;

        let low = v2;
        let high = input - c.k * v1 - v2;
        (low, high)
    }
}

/// Butterworth-Q band-pass between two normalized frequencies
#[derive(Debug, Clone, Copy)]
pub struct BandPassFilter {
    low_edge: f64,
    high_edge: f64,
    highpass: SvfCoefficients,
    lowpass: SvfCoefficients,
}

impl BandPassFilter {
    /// Edges are fractions of the sample rate, clamped inside (0, 0.5)
    pub fn new(min_normalized: f64, max_normalized: f64) -> Self {
        let low_edge = min_normalized.clamp(MIN_NORMALIZED, MAX_NORMALIZED);
        let high_edge = max_normalized.clamp(low_edge, MAX_NORMALIZED);
        Self {
            low_edge,
            high_edge,
            highpass: SvfCoefficients::new(low_edge, FRAC_1_SQRT_2),
            lowpass: SvfCoefficients::new(high_edge, FRAC_1_SQRT_2),
        }
    }

    pub fn edges(&self) -> (f64, f64) {
        (self.low_edge, self.high_edge)
    }

    /// Filter a block, starting from silent state
    pub fn apply(&self, samples: &[f64]) -> Vec<f64> {
        let mut hp = SvfState::default();
        let mut lp = SvfState::default();
        samples
            .iter()
            .map(|&x| {
                let (_, high) = hp.tick(&self.highpass, x);
                let (low, _) = lp.tick(&self.lowpass, high);
                low
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_normalized: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| (2.0 * PI * freq_normalized * n as f64).sin())
            .collect()
    }

    fn tail_peak(samples: &[f64]) -> f64 {
        samples[samples.len() / 2..]
            .iter()
            .fold(0.0_f64, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn test_passband_kept() {
        let filter = BandPassFilter::new(0.001, 0.45);
        let out = filter.apply(&sine(0.05, 4000));
        let peak = tail_peak(&out);
        assert!(peak > 0.9 && peak < 1.1, "passband peak {}", peak);
    }

    #[test]
    fn test_dc_removed() {
        let filter = BandPassFilter::new(0.001, 0.45);
        let out = filter.apply(&vec![1.0; 20_000]);
        assert!(tail_peak(&out) < 0.01);
    }

    #[test]
    fn test_edges_clamped() {
        let filter = BandPassFilter::new(-1.0, 2.0);
        let (low, high) = filter.edges();
        assert!(low > 0.0);
        assert!(high < 0.5);
        assert!(filter.apply(&[]).is_empty());
    }
}
