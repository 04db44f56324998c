//! Synchroniser: joint search over frequency offset and block phase.
//!
//! Every spectral slice is scored by a bank of lightweight soft decoders,
//! one per frequency hypothesis. Their FEC signal and noise estimates are
//! integrated in two circular grids indexed by block phase, with a one-pole
//! filter of weight `1/integ_len`. The running best cell gives the coarse
//! estimate; a parabolic fit through its neighbours along each axis gives
//! the precise one. The lock is declared stable only while the precise
//! estimate moves less than one cell per block and the S/N clears the
//! threshold; the per-block movement then feeds the drift-rate filters.

use crate::buffer::{CircularBuffer, LowPassFilter};
use crate::params::Parameters;
use crate::soft_decoder::SoftDecoder;
use crate::{SPECTRA_PER_BLOCK, SYMBOLS_PER_BLOCK};

/// Fit a parabola through three equidistant samples. Returns the peak
/// position relative to the centre sample and the peak value, or `None`
/// when the points do not bend downwards.
fn fit_peak(left: f32, center: f32, right: f32) -> Option<(f32, f32)> {
    let a = (right + left) / 2.0 - center;
    if a >= 0.0 {
        return None;
    }
    let b = (right - left) / 2.0;
    let pos = -b / (2.0 * a);
    Some((pos, a * pos * pos + b * pos + center))
}

pub struct Synchronizer {
    threshold: f32,
    filter_weight: f32,
    freq_offsets: usize,
    block_phases: usize,
    fft_bin_bandwidth: f32,
    block_period: f32,

    decoders: Vec<SoftDecoder>,
    sync_signal: CircularBuffer<LowPassFilter>,
    sync_noise: CircularBuffer<LowPassFilter>,

    /// Block phase of the slice being processed next.
    pub block_phase: usize,
    /// Highest integrated FEC signal seen on the grid.
    pub best_signal: f32,
    pub best_block_phase: usize,
    pub best_freq_offset: usize,
    /// S/N of the best cell, updated at each decode point.
    pub snr: f32,
    /// Zero when the current slice sits half a block past the best phase,
    /// the point where a settled block is about to leave the history.
    pub decode_reference: isize,
    /// True while the precise estimate is steady and above threshold.
    pub stable_lock: bool,

    precise_freq_offset: f32,
    precise_block_phase: f32,
    freq_drift: LowPassFilter,
    time_drift: LowPassFilter,
}

impl Synchronizer {
    pub fn new(params: &Parameters) -> Self {
        let freq_offsets = params.freq_offsets();
        let block_phases = SPECTRA_PER_BLOCK;
        let mut sync = Self {
            threshold: params.sync_threshold,
            filter_weight: 1.0 / params.sync_integ_len as f32,
            freq_offsets,
            block_phases,
            fft_bin_bandwidth: params.fft_bin_bandwidth(),
            block_period: params.block_period(),
            decoders: (0..freq_offsets)
                .map(|_| SoftDecoder::new(params.bits_per_symbol))
                .collect(),
            sync_signal: CircularBuffer::new(block_phases, freq_offsets),
            sync_noise: CircularBuffer::new(block_phases, freq_offsets),
            block_phase: 0,
            best_signal: 0.0,
            best_block_phase: 0,
            best_freq_offset: 0,
            snr: 0.0,
            decode_reference: 0,
            stable_lock: false,
            precise_freq_offset: 0.0,
            precise_block_phase: 0.0,
            freq_drift: LowPassFilter::default(),
            time_drift: LowPassFilter::default(),
        };
        sync.reset();
        sync
    }

    pub fn reset(&mut self) {
        for decoder in self.decoders.iter_mut() {
            decoder.reset();
        }
        self.sync_signal.clear();
        self.sync_noise.clear();
        self.block_phase = 0;
        self.best_signal = 0.0;
        self.best_block_phase = 0;
        self.best_freq_offset = 0;
        self.snr = 0.0;
        self.decode_reference = -((self.block_phases / 2) as isize);
        self.precise_freq_offset = 0.0;
        self.precise_block_phase = 0.0;
        self.stable_lock = false;
        self.freq_drift.reset();
        self.time_drift.reset();
    }

    /// Score one spectral slice (`decode_width` bin energies) against all
    /// frequency hypotheses and update the lock state.
    pub fn process(&mut self, spectra: &[f32]) {
        let mut best_slice_signal = 0.0f32;
        let mut best_slice_offset = 0usize;

        let signal_row = self.sync_signal.row_mut(self.block_phase);
        let noise_row = self.sync_noise.row_mut(self.block_phase);
        for (offset, decoder) in self.decoders.iter_mut().enumerate() {
            decoder.spectral_input(&spectra[offset..]);
            decoder.process();

            noise_row[offset].process(decoder.noise_energy, self.filter_weight);
            signal_row[offset].process(decoder.signal, self.filter_weight);

            let integrated = signal_row[offset].output();
            if integrated > best_slice_signal {
                best_slice_signal = integrated;
                best_slice_offset = offset;
            }
        }

        if self.block_phase == self.best_block_phase {
            // The reigning cell must re-win its own phase or yield.
            self.best_signal = best_slice_signal;
            self.best_freq_offset = best_slice_offset;
        } else if best_slice_signal > self.best_signal {
            self.best_signal = best_slice_signal;
            self.best_block_phase = self.block_phase;
            self.best_freq_offset = best_slice_offset;
        }

        let mut reference = self.block_phase as isize - self.best_block_phase as isize;
        if reference < 0 {
            reference += self.block_phases as isize;
        }
        reference -= (self.block_phases / 2) as isize;
        self.decode_reference = reference;

        if reference == 0 {
            self.update_precise_estimate();
        }

        self.block_phase = self.sync_signal.incr(self.block_phase, 1);
    }

    /// Integrated S/N at the best grid cell.
    pub fn fec_snr(&self) -> f32 {
        self.snr
    }

    /// Precise frequency offset [Hz], relative to the nominal tuning.
    pub fn frequency_offset(&self) -> f32 {
        (self.precise_freq_offset - (self.freq_offsets / 2) as f32) * self.fft_bin_bandwidth
    }

    /// Frequency drift rate [Hz/s].
    pub fn frequency_drift_rate(&self) -> f32 {
        self.freq_drift.output() * self.fft_bin_bandwidth / self.block_period
    }

    /// Sample-clock drift as a fraction (multiply by 1e6 for ppm).
    pub fn time_drift_rate(&self) -> f32 {
        self.time_drift.output()
    }

    fn update_precise_estimate(&mut self) {
        let best_noise = {
            let integrated =
                self.sync_noise.row(self.best_block_phase)[self.best_freq_offset].output();
            let noise = if integrated > 0.0 { integrated.sqrt() } else { 0.0 };
            noise.max(SYMBOLS_PER_BLOCK as f32 / 10000.0)
        };
        self.snr = self.best_signal / best_noise;

        // Parabolic interpolation along the frequency axis. A degenerate
        // search of fewer than three hypotheses cannot be interpolated.
        let new_freq_offset = if self.freq_offsets < 3 {
            self.best_freq_offset as f32
        } else {
            let signal_row = self.sync_signal.row(self.best_block_phase);
            let fit_idx = self.best_freq_offset.clamp(1, self.freq_offsets - 2);
            match fit_peak(
                signal_row[fit_idx - 1].output(),
                signal_row[fit_idx].output(),
                signal_row[fit_idx + 1].output(),
            ) {
                Some((pos, _)) => fit_idx as f32 + pos.clamp(-1.0, 1.0),
                None => self.best_freq_offset as f32,
            }
        };

        // And along the block-phase axis, with wraparound.
        let idx_left = self.sync_signal.decr(self.best_block_phase, 1);
        let idx_right = self.sync_signal.incr(self.best_block_phase, 1);
        let new_block_phase = match fit_peak(
            self.sync_signal.row(idx_left)[self.best_freq_offset].output(),
            self.sync_signal.row(self.best_block_phase)[self.best_freq_offset].output(),
            self.sync_signal.row(idx_right)[self.best_freq_offset].output(),
        ) {
            Some((pos, _)) => self
                .sync_signal
                .wrap_phase(self.best_block_phase as f32 + pos),
            None => self.best_block_phase as f32,
        };

        let freq_delta = new_freq_offset - self.precise_freq_offset;
        let phase_delta = self
            .sync_signal
            .wrap_diff_phase(new_block_phase - self.precise_block_phase);

        let delta_dist2 = freq_delta * freq_delta + phase_delta * phase_delta;
        if delta_dist2 <= 1.0 && self.snr >= self.threshold {
            self.stable_lock = true;
            self.freq_drift.process(freq_delta, self.filter_weight);
            self.time_drift
                .process(phase_delta / self.block_phases as f32, self.filter_weight);
        } else {
            self.stable_lock = false;
            self.freq_drift.reset();
            self.time_drift.reset();
        }

        self.precise_freq_offset = new_freq_offset;
        self.precise_block_phase = new_block_phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_peak_finds_the_vertex() {
        // Samples of -(x-0.25)^2 + 1 at x = -1, 0, 1.
        let value = |x: f32| -(x - 0.25) * (x - 0.25) + 1.0;
        let (pos, peak) = fit_peak(value(-1.0), value(0.0), value(1.0)).unwrap();
        assert!((pos - 0.25).abs() < 1e-5);
        assert!((peak - 1.0).abs() < 1e-5);
    }

    #[test]
    fn fit_peak_rejects_flat_and_rising_shapes() {
        assert!(fit_peak(1.0, 1.0, 1.0).is_none());
        assert!(fit_peak(0.0, 1.0, 3.0).is_none());
    }

    #[test]
    fn silence_never_locks() {
        let mut params = Parameters::default();
        params.preset().unwrap();
        let mut sync = Synchronizer::new(&params);
        let spectra = vec![0.0f32; params.decode_width()];
        for _ in 0..2 * SPECTRA_PER_BLOCK {
            sync.process(&spectra);
            assert!(!sync.stable_lock);
        }
        assert_eq!(sync.fec_snr(), 0.0);
    }

    #[test]
    fn stable_lock_implies_snr_above_threshold() {
        // Fabricated spectra with a consistent tone pattern: energy on the
        // centre hypothesis, noise elsewhere.
        let mut params = Parameters::default();
        params.sync_integ_len = 2;
        params.preset().unwrap();
        let mut sync = Synchronizer::new(&params);

        let width = params.decode_width();
        let centre = params.decode_margin();
        let mut slice = 0usize;
        for _ in 0..12 * SPECTRA_PER_BLOCK {
            let mut spectra = vec![0.01f32; width];
            // One strong carrier per symbol, stepping over the band.
            let symbol = (slice / crate::SPECTRA_PER_SYMBOL) % params.carriers;
            spectra[centre + symbol * crate::CARRIER_SEPAR] = 4.0;
            sync.process(&spectra);
            if sync.stable_lock {
                assert!(sync.fec_snr() >= params.sync_threshold);
            }
            slice += 1;
        }
    }
}
