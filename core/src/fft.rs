//! Two-real-channel FFT used by the input conditioner and the demodulator.
//!
//! Both consumers transform pairs of real frames, so two frames are packed
//! into the real and imaginary parts of a single complex FFT and the two
//! half-spectra are separated afterwards with the Hermitian-symmetry
//! combine. The planner comes from `rustfft`; plans are cheap to clone and
//! cached per instance.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftDirection, FftPlanner};

pub struct TwoChannelFft {
    len: usize,
    forward_plan: Arc<dyn Fft<f32>>,
    inverse_plan: Arc<dyn Fft<f32>>,
}

impl TwoChannelFft {
    pub fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        let mut planner = FftPlanner::new();
        Self {
            len,
            forward_plan: planner.plan_fft(len, FftDirection::Forward),
            inverse_plan: planner.plan_fft(len, FftDirection::Inverse),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn forward(&self, buff: &mut [Complex<f32>]) {
        self.forward_plan.process(buff);
    }

    /// Inverse transform, scaled so that `inverse(forward(x)) == x`.
    pub fn inverse(&self, buff: &mut [Complex<f32>]) {
        self.inverse_plan.process(buff);
        let scale = 1.0 / self.len as f32;
        for bin in buff.iter_mut() {
            *bin *= scale;
        }
    }

    /// Split the transform of two packed real frames into their own
    /// half-spectra of `len/2` bins each. The DC and Nyquist terms (both
    /// purely real) are packed into bin 0 as re and im.
    pub fn separ_two_reals(
        &self,
        buff: &[Complex<f32>],
        out0: &mut [Complex<f32>],
        out1: &mut [Complex<f32>],
    ) {
        let half = self.len / 2;
        out0[0] = Complex::new(buff[0].re, buff[half].re);
        out1[0] = Complex::new(buff[0].im, buff[half].im);
        for idx in 1..half {
            let a = buff[idx];
            let b = buff[self.len - idx];
            out0[idx] = Complex::new(0.5 * (a.re + b.re), 0.5 * (a.im - b.im));
            out1[idx] = Complex::new(0.5 * (a.im + b.im), 0.5 * (b.re - a.re));
        }
    }

    /// Exact inverse of [`Self::separ_two_reals`]: rebuild the packed
    /// complex spectrum from the two half-spectra.
    pub fn join_two_reals(
        &self,
        in0: &[Complex<f32>],
        in1: &[Complex<f32>],
        buff: &mut [Complex<f32>],
    ) {
        let half = self.len / 2;
        buff[0] = Complex::new(in0[0].re, in1[0].re);
        buff[half] = Complex::new(in0[0].im, in1[0].im);
        for idx in 1..half {
            let a = in0[idx];
            let b = in1[idx];
            buff[idx] = Complex::new(a.re - b.im, a.im + b.re);
            buff[self.len - idx] = Complex::new(a.re + b.im, b.re - a.im);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_real_frames_survive_the_round_trip() {
        let len = 256;
        let fft = TwoChannelFft::new(len);

        let frame0: Vec<f32> = (0..len).map(|n| ((n * 13 + 5) % 47) as f32 / 23.0 - 1.0).collect();
        let frame1: Vec<f32> = (0..len).map(|n| ((n * 29 + 2) % 31) as f32 / 16.0 - 1.0).collect();

        let mut buff: Vec<Complex<f32>> = frame0
            .iter()
            .zip(&frame1)
            .map(|(&re, &im)| Complex::new(re, im))
            .collect();

        let mut spectra0 = vec![Complex::new(0.0, 0.0); len / 2];
        let mut spectra1 = vec![Complex::new(0.0, 0.0); len / 2];

        fft.forward(&mut buff);
        fft.separ_two_reals(&buff, &mut spectra0, &mut spectra1);
        fft.join_two_reals(&spectra0, &spectra1, &mut buff);
        fft.inverse(&mut buff);

        for (bin, (&re, &im)) in buff.iter().zip(frame0.iter().zip(&frame1)) {
            assert!((bin.re - re).abs() < 1e-3);
            assert!((bin.im - im).abs() < 1e-3);
        }
    }

    #[test]
    fn separated_spectrum_peaks_at_the_tone_bin() {
        let len = 512;
        let fft = TwoChannelFft::new(len);
        let tone_bin = 37;

        let mut buff: Vec<Complex<f32>> = (0..len)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * tone_bin as f32 * n as f32 / len as f32;
                Complex::new(phase.cos(), 0.0)
            })
            .collect();
        let mut spectra0 = vec![Complex::new(0.0, 0.0); len / 2];
        let mut spectra1 = vec![Complex::new(0.0, 0.0); len / 2];

        fft.forward(&mut buff);
        fft.separ_two_reals(&buff, &mut spectra0, &mut spectra1);

        let energies: Vec<f32> = spectra0.iter().map(|bin| bin.norm_sqr()).collect();
        let peak = energies
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak, tone_bin);
    }
}
