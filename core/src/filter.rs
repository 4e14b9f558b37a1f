//! Shared DSP primitives: Butterworth band-pass cascade, analytic-signal
//! envelope, Hamming window.
//!
//! The band-pass design follows the classic recipe: analog Butterworth
//! low-pass prototype, low-pass to band-pass transform, bilinear mapping
//! into cascaded biquad sections, with the cascade gain normalized to unity
//! at the center frequency.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// One second-order section. Numerator is fixed at (1 - z^-2): the
/// band-pass transform places every zero at z = +1 or z = -1.
#[derive(Debug, Clone, Copy)]
struct Section {
    a1: f64,
    a2: f64,
}

/// Butterworth band-pass filter of even order, run as a biquad cascade.
#[derive(Debug, Clone)]
pub struct BandPassFilter {
    sections: Vec<Section>,
    gain: f64,
}

impl BandPassFilter {
    /// Designs an `order`-pole band-pass around `center_hz` with bandwidth
    /// `width_hz` at sample rate `sample_rate`. The order must be even; the
    /// band edges must stay inside (0, Nyquist).
    pub fn new(order: usize, sample_rate: f64, center_hz: f64, width_hz: f64) -> Self {
        assert!(order >= 2 && order % 2 == 0, "band-pass order must be even");
        let f_low = center_hz - width_hz / 2.0;
        let f_high = center_hz + width_hz / 2.0;
        assert!(
            f_low > 0.0 && f_high < sample_rate / 2.0,
            "band edges must lie strictly between 0 and Nyquist"
        );

        // Pre-warped analog band edges (bilinear transform with T absorbed).
        let w1 = (std::f64::consts::PI * f_low / sample_rate).tan();
        let w2 = (std::f64::consts::PI * f_high / sample_rate).tan();
        let w0_sq = w1 * w2;
        let bw = w2 - w1;

        // Upper-half-plane poles of the analog low-pass prototype. Each maps
        // to two band-pass poles; together with their conjugates that is
        // `order` biquad sections for an order-N prototype of N poles.
        let mut sections = Vec::with_capacity(order);
        for k in 0..order / 2 {
            let theta = std::f64::consts::PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            let prototype = Complex::new(theta.cos(), theta.sin());

            let b = prototype * bw / 2.0;
            let discriminant = (b * b - w0_sq).sqrt();
            for s_pole in [b + discriminant, b - discriminant] {
                // Bilinear map into the z plane.
                let z_pole = (Complex::new(1.0, 0.0) + s_pole) / (Complex::new(1.0, 0.0) - s_pole);
                sections.push(Section {
                    a1: -2.0 * z_pole.re,
                    a2: z_pole.norm_sqr(),
                });
            }
        }

        let mut filter = Self {
            sections,
            gain: 1.0,
        };
        let center_response = filter
            .response_at(2.0 * std::f64::consts::PI * center_hz / sample_rate)
            .norm();
        filter.gain = if center_response > 0.0 {
            1.0 / center_response
        } else {
            1.0
        };
        filter
    }

    /// Frequency response of the unscaled cascade at digital frequency
    /// `omega` (radians per sample).
    fn response_at(&self, omega: f64) -> Complex<f64> {
        let z1 = Complex::from_polar(1.0, -omega);
        let z2 = Complex::from_polar(1.0, -2.0 * omega);
        let mut response = Complex::new(self.gain, 0.0);
        for section in &self.sections {
            let numerator = Complex::new(1.0, 0.0) - z2;
            let denominator = Complex::new(1.0, 0.0) + z1 * section.a1 + z2 * section.a2;
            response *= numerator / denominator;
        }
        response
    }

    /// Filters `input` from zero initial state and returns the response.
    ///
    /// State lives on the stack of this call, so a shared filter design can
    /// be applied to many windows without reset bookkeeping.
    pub fn process(&self, input: &[f64]) -> Vec<f64> {
        let mut state = vec![(0.0f64, 0.0f64); self.sections.len()];
        let mut output = Vec::with_capacity(input.len());
        for &sample in input {
            let mut x = sample * self.gain;
            for (section, (s1, s2)) in self.sections.iter().zip(state.iter_mut()) {
                // Direct form II transposed, numerator (1, 0, -1).
                let y = x + *s1;
                *s1 = -section.a1 * y + *s2;
                *s2 = -x - section.a2 * y;
                x = y;
            }
            output.push(x);
        }
        output
    }
}

/// Analytic-signal envelope via the frequency-domain Hilbert transform.
///
/// Owns an FFT planner so repeated windows of the same length reuse plans.
pub struct Hilbert {
    planner: FftPlanner<f64>,
}

impl Hilbert {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Returns |analytic(signal)|: the instantaneous amplitude, independent
    /// of phase. Negative frequencies are zeroed and positive ones doubled;
    /// DC and Nyquist stay untouched.
    pub fn envelope(&mut self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let mut spectrum: Vec<Complex<f64>> =
            signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.planner.plan_fft_forward(n).process(&mut spectrum);

        for bin in spectrum.iter_mut().take(n / 2).skip(1) {
            *bin *= 2.0;
        }
        for bin in spectrum.iter_mut().skip(n / 2 + 1) {
            *bin = Complex::new(0.0, 0.0);
        }

        self.planner.plan_fft_inverse(n).process(&mut spectrum);
        let scale = 1.0 / n as f64;
        spectrum.iter().map(|c| c.norm() * scale).collect()
    }
}

impl Default for Hilbert {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming window of `len` points.
pub fn hamming_window(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|i| {
            0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (len - 1) as f64).cos()
        })
        .collect()
}
