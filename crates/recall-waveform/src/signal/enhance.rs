//! Envelope smoothing

use std::collections::VecDeque;

/// Replace each sample by the largest absolute value within `window`
/// samples of it (`[i - window, i + window)`), in place
///
/// Sliding maximum over a monotonic deque, O(n). A window of 0 is treated
/// as 1.
pub fn envelope_smooth(samples: &mut [f64], window: usize) {
    let window = window.max(1);
    let magnitudes: Vec<f64> = samples.iter().map(|s| s.abs()).collect();
    let len = magnitudes.len();

    // Indices with strictly decreasing magnitudes, front is the window max
    let mut deque: VecDeque<usize> = VecDeque::with_capacity(2 * window);
    let mut next = 0;

    for (i, out) in samples.iter_mut().enumerate() {
        let end = (i + window).min(len);
        while next < end {
            while deque
                .back()
                .is_some_and(|&j| magnitudes[j] <= magnitudes[next])
            {
                deque.pop_back();
            }
            deque.push_back(next);
            next += 1;
        }

        let start = i.saturating_sub(window);
        while deque.front().is_some_and(|&j| j < start) {
            deque.pop_front();
        }

        *out = deque.front().map_or(0.0, |&j| magnitudes[j]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(samples: &[f64], window: usize) -> Vec<f64> {
        (0..samples.len())
            .map(|i| {
                let start = i.saturating_sub(window);
                let end = (i + window).min(samples.len());
                samples[start..end]
                    .iter()
                    .fold(0.0, |acc: f64, s| acc.max(s.abs()))
            })
            .collect()
    }

    #[test]
    fn test_matches_brute_force() {
        let samples: Vec<f64> = (0..300)
            .map(|n| ((n * 37 % 101) as f64 - 50.0) / 50.0)
            .collect();
        for window in [1, 3, 20, 500] {
            let mut smoothed = samples.clone();
            envelope_smooth(&mut smoothed, window);
            assert_eq!(smoothed, brute_force(&samples, window), "window {}", window);
        }
    }

    #[test]
    fn test_spike_spreads() {
        let mut samples = vec![0.0; 10];
        samples[5] = -0.8;
        envelope_smooth(&mut samples, 2);
        // [i-2, i+2) contains 5 for i in 4..=7
        assert_eq!(samples, vec![0.0, 0.0, 0.0, 0.0, 0.8, 0.8, 0.8, 0.8, 0.0, 0.0]);
    }

    #[test]
    fn test_empty() {
        let mut samples: Vec<f64> = Vec::new();
        envelope_smooth(&mut samples, 20);
        assert!(samples.is_empty());
    }
}
