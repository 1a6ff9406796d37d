//! Frequency-phase demodulation.
//!
//! Recovers the periodic component of a fixed period from a daily series by
//! a sliding, trapezoid-weighted average of the series multiplied with the
//! quadrature carriers `cos(2πi/T)` and `sin(2πi/T)`. The window is `2T + 2`
//! samples wide: trailing where enough history exists, leading otherwise.
//! Indices that fall outside the series wrap around to the other end.

use amur_utils::fill::interpolate_with_edges;
use amur_utils::stats::mean;
use std::f64::consts::PI;

/// Annual cycle.
pub const ANNUAL_PERIOD: usize = 365;
/// Third-of-a-year cycle.
pub const SEASONAL_PERIOD: usize = 121;

/// Result of demodulating a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Demodulation {
    /// Dynamic amplitude
    pub amplitude: Vec<f64>,
    /// Dynamic phase in radians
    pub phase: Vec<f64>,
    /// Reconstructed periodic component
    pub signal: Vec<f64>,
}

/// Demodulate `x` at `period` samples. `period` must be positive.
pub fn demodulate(x: &[f64], period: usize) -> Demodulation {
    let len = x.len();
    let m = period as i64;
    let omega = 1.0 / period as f64;
    let carrier = |i: usize| 2.0 * PI * omega * i as f64;

    let cos_part: Vec<f64> = x.iter().enumerate().map(|(i, v)| v * carrier(i).cos()).collect();
    let sin_part: Vec<f64> = x.iter().enumerate().map(|(i, v)| v * carrier(i).sin()).collect();

    let mut result = Demodulation {
        amplitude: Vec::with_capacity(len),
        phase: Vec::with_capacity(len),
        signal: Vec::with_capacity(len),
    };
    let norm = (2 * m + 1) as f64;

    for i in 0..len {
        let at = i as i64;
        let (first, last) = if at >= 2 * m - 2 {
            (at - 2 * m - 2, at - 1)
        } else {
            (at, at + 2 * m + 1)
        };
        let mut a = 0.0;
        let mut b = 0.0;
        for k in first..=last {
            let weight = if k == first || k == last { 0.5 } else { 1.0 };
            let idx = k.rem_euclid(len as i64) as usize;
            a += weight * cos_part[idx];
            b += weight * sin_part[idx];
        }
        let macos = a / norm;
        let masin = b / norm;

        result.amplitude.push(2.0 * (macos * macos + masin * masin).sqrt());
        result.phase.push(masin.atan2(macos));
        result
            .signal
            .push(2.0 * masin * carrier(i).sin() + 2.0 * macos * carrier(i).cos());
    }
    result
}

/// Periodic component of a gappy series, on the series' own scale.
///
/// The series is centred on its mean, gaps are interpolated and edge-filled,
/// and the mean is added back to the demodulated signal. A series without
/// any value stays empty.
pub fn periodic_component(x: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let Some(centre) = mean(x) else {
        return vec![None; x.len()];
    };
    let centred: Vec<Option<f64>> = x.iter().map(|v| v.map(|v| v - centre)).collect();
    let filled: Vec<f64> = interpolate_with_edges(&centred)
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();
    demodulate(&filled, period)
        .signal
        .into_iter()
        .map(|v| Some(v + centre))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sinusoid(n: usize, period: usize, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * i as f64 / period as f64).sin())
            .collect()
    }

    fn correlation(a: &[f64], b: &[f64]) -> f64 {
        let n = a.len() as f64;
        let ma = a.iter().sum::<f64>() / n;
        let mb = b.iter().sum::<f64>() / n;
        let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
        let va: f64 = a.iter().map(|x| (x - ma).powi(2)).sum();
        let vb: f64 = b.iter().map(|y| (y - mb).powi(2)).sum();
        cov / (va * vb).sqrt()
    }

    #[test]
    fn test_annual_sinusoid_recovered() {
        let x = sinusoid(730, ANNUAL_PERIOD, 3.0);
        let out = demodulate(&x, ANNUAL_PERIOD);
        let max_error = x
            .iter()
            .zip(&out.signal)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_error < 0.01, "max error {max_error}");
        assert_relative_eq!(out.amplitude[400], 3.0, epsilon = 0.01);
    }

    #[test]
    fn test_seasonal_sinusoid_recovered() {
        let x = sinusoid(242, SEASONAL_PERIOD, 3.0);
        let out = demodulate(&x, SEASONAL_PERIOD);
        let max_error = x
            .iter()
            .zip(&out.signal)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_error < 0.05, "max error {max_error}");
    }

    #[test]
    fn test_short_period_correlates() {
        let x = sinusoid(40, 10, 3.0);
        let out = demodulate(&x, 10);
        assert!(correlation(&x, &out.signal) > 0.95);

        // deterministic jitter on top of the carrier
        let noisy: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| v + 0.1 * ((i * 7919 % 13) as f64 / 13.0 - 0.5))
            .collect();
        let out = demodulate(&noisy, 10);
        assert!(correlation(&x, &out.signal) > 0.95);
    }

    #[test]
    fn test_annual_then_seasonal_reconstructs_input() {
        let n = 4 * ANNUAL_PERIOD;
        let annual = sinusoid(n, ANNUAL_PERIOD, 3.0);
        let seasonal = sinusoid(n, SEASONAL_PERIOD, 1.5);
        let x: Vec<Option<f64>> = annual
            .iter()
            .zip(&seasonal)
            .map(|(a, s)| Some(250.0 + a + s))
            .collect();

        let first = periodic_component(&x, ANNUAL_PERIOD);
        let residual: Vec<Option<f64>> = x.iter().zip(&first).map(|(v, a)| Some((*v)? - (*a)?)).collect();
        let second = periodic_component(&residual, SEASONAL_PERIOD);

        let recovered_annual: Vec<f64> = first.iter().map(|v| v.unwrap() - 250.0).collect();
        let recovered_seasonal: Vec<f64> = second.iter().map(|v| v.unwrap()).collect();
        assert!(correlation(&annual, &recovered_annual) > 0.99);
        assert!(correlation(&seasonal, &recovered_seasonal) > 0.95);

        let max_error = (0..n)
            .map(|i| (x[i].unwrap() - first[i].unwrap() - second[i].unwrap()).abs())
            .fold(0.0, f64::max);
        assert!(max_error < 0.5, "max error {max_error}");
    }

    #[test]
    fn test_output_length_matches_input() {
        assert!(demodulate(&[], ANNUAL_PERIOD).signal.is_empty());
        let out = demodulate(&[1.0, 2.0, 3.0], 10);
        assert_eq!(out.signal.len(), 3);
        assert!(out.signal.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_periodic_component_of_constant_is_constant() {
        let x = vec![Some(250.0), None, Some(250.0), Some(250.0)];
        let out = periodic_component(&x, 10);
        for v in out {
            assert_relative_eq!(v.unwrap(), 250.0);
        }
        assert_eq!(periodic_component(&[None, None], 10), vec![None, None]);
    }
}
