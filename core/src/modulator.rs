//! MFSK modulator: synthesis of the tone-burst waveform.
//!
//! Each symbol adds one raised-cosine-shaped tone burst into a circular
//! output tap of one pulse length. The pulse is four symbol periods long,
//! so four bursts overlap at any instant (overlap-add). The tone phase is
//! a shared integer index into a one-cycle cosine table and is advanced so
//! that the pulse is centred on its symbol period.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::fht::gray_code;
use crate::params::Parameters;
use crate::shape::symbol_shape;
use crate::{CARRIER_SEPAR, PHASE_DITHER, USE_GRAY_CODE};

pub struct Modulator {
    symbol_len: usize,
    symbol_separ: usize,
    first_carrier: usize,
    wrap_mask: usize,
    cosine_table: Vec<f32>,
    symbol_shape: Vec<f32>,
    symbol_phase: i64,
    out_tap: Vec<f32>,
    tap_ptr: usize,
    dither_rng: SmallRng,
}

impl Modulator {
    pub fn new(params: &Parameters) -> Self {
        let symbol_len = params.symbol_len;
        let cosine_table = (0..symbol_len)
            .map(|idx| (2.0 * std::f64::consts::PI * idx as f64 / symbol_len as f64).cos() as f32)
            .collect();
        Self {
            symbol_len,
            symbol_separ: params.symbol_separ,
            first_carrier: params.first_carrier,
            wrap_mask: symbol_len - 1,
            cosine_table,
            symbol_shape: symbol_shape(symbol_len, 1.0 / (2 * CARRIER_SEPAR) as f64),
            symbol_phase: 0,
            out_tap: vec![0.0; symbol_len],
            tap_ptr: 0,
            dither_rng: SmallRng::seed_from_u64(1),
        }
    }

    /// Samples produced per transmitted symbol.
    pub fn output_len(&self) -> usize {
        self.symbol_separ
    }

    pub fn reset(&mut self) {
        for cell in self.out_tap.iter_mut() {
            *cell = 0.0;
        }
        self.tap_ptr = 0;
        self.symbol_phase = 0;
    }

    /// Accumulate the tone burst for one symbol into the output tap.
    pub fn send(&mut self, symbol: u8) {
        let symbol = if USE_GRAY_CODE { gray_code(symbol) } else { symbol };
        let freq = (self.first_carrier + CARRIER_SEPAR * symbol as usize) as i64;
        let mask = self.wrap_mask as i64;

        // Rewind the phase to the pulse start so the burst is centred on
        // the current symbol period.
        let to_pulse_start = self.symbol_separ as i64 / 2 - self.symbol_len as i64 / 2;
        self.symbol_phase = (self.symbol_phase + freq * to_pulse_start) & mask;

        self.add_symbol(freq as usize, self.symbol_phase as usize);

        let to_next_symbol = self.symbol_separ as i64 / 2 + self.symbol_len as i64 / 2;
        self.symbol_phase = (self.symbol_phase + freq * to_next_symbol) & mask;

        if PHASE_DITHER {
            let quarter = self.symbol_len as i64 / 4;
            let step = if self.dither_rng.gen::<bool>() { quarter } else { -quarter };
            self.symbol_phase = (self.symbol_phase + step) & mask;
        }
    }

    /// Drain one symbol period from the tap into `buffer`; drained cells
    /// are cleared so later pulses accumulate into silence.
    pub fn output(&mut self, buffer: &mut [f32]) -> usize {
        for out in buffer[..self.symbol_separ].iter_mut() {
            *out = self.out_tap[self.tap_ptr];
            self.out_tap[self.tap_ptr] = 0.0;
            self.tap_ptr = (self.tap_ptr + 1) & self.wrap_mask;
        }
        self.symbol_separ
    }

    fn add_symbol(&mut self, freq: usize, mut phase: usize) {
        let mut tap_ptr = self.tap_ptr;
        for &shape in self.symbol_shape.iter() {
            self.out_tap[tap_ptr] += self.cosine_table[phase] * shape;
            phase = (phase + freq) & self.wrap_mask;
            tap_ptr = (tap_ptr + 1) & self.wrap_mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> Parameters {
        let mut params = Parameters::default();
        params.preset().unwrap();
        params
    }

    #[test]
    fn idle_modulator_outputs_silence() {
        let params = test_params();
        let mut modulator = Modulator::new(&params);
        let mut buffer = vec![1.0f32; params.symbol_separ];
        modulator.output(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn output_energy_is_bounded() {
        let params = test_params();
        let mut modulator = Modulator::new(&params);
        let mut buffer = vec![0.0f32; params.symbol_separ];
        let mut peak = 0.0f32;
        for symbol in 0..64u8 {
            modulator.send(symbol % params.carriers as u8);
            modulator.output(&mut buffer);
            for &sample in buffer.iter() {
                peak = peak.max(sample.abs());
            }
        }
        assert!(peak > 0.1, "no signal produced");
        assert!(peak < 1.0, "overlap-add exceeded full scale: {peak}");
    }

    #[test]
    fn tap_is_clear_after_the_overlap_drains() {
        let params = test_params();
        let mut modulator = Modulator::new(&params);
        let mut buffer = vec![0.0f32; params.symbol_separ];
        modulator.send(3);
        // The pulse spans four symbol periods; afterwards the tap must be
        // silent again.
        for _ in 0..4 {
            modulator.output(&mut buffer);
        }
        modulator.output(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn constant_symbol_autocorrelation_shows_no_isi() {
        let params = test_params();
        let mut modulator = Modulator::new(&params);
        let separ = params.symbol_separ;

        let mut audio = Vec::new();
        let mut buffer = vec![0.0f32; separ];
        for _ in 0..64 {
            modulator.send(0);
            modulator.output(&mut buffer);
            audio.extend_from_slice(&buffer);
        }

        // Autocorrelation at a lag of one symbol period, over the
        // steady-state interior (clear of the ramp-up and the tail).
        let start = 8 * separ;
        let end = audio.len() - 8 * separ;
        let mut peak = 0.0f64;
        let mut isi = 0.0f64;
        for t in start..end {
            peak += audio[t] as f64 * audio[t] as f64;
            isi += audio[t] as f64 * audio[t + separ] as f64;
        }

        // The pulse shape is built so that neighbouring symbol periods do
        // not interfere: the lag-one-symbol correlation must sit at least
        // 40 dB under the zero-lag peak.
        let peak_to_isi_db = 20.0 * (peak / isi.abs()).log10();
        assert!(
            peak_to_isi_db >= 40.0,
            "peak-to-ISI ratio {peak_to_isi_db:.1} dB"
        );
    }

    #[test]
    fn tone_lands_on_the_assigned_carrier() {
        let params = test_params();
        let mut modulator = Modulator::new(&params);
        let mut audio = Vec::new();
        let mut buffer = vec![0.0f32; params.symbol_separ];
        for _ in 0..16 {
            modulator.send(0);
            modulator.output(&mut buffer);
            audio.extend_from_slice(&buffer);
        }
        // Goertzel probe at the first carrier and a few bins off.
        let freq_of = |bin: usize| bin as f32 * params.sample_rate as f32 / params.symbol_len as f32;
        let probe = |freq: f32| -> f32 {
            let omega = 2.0 * std::f32::consts::PI * freq / params.sample_rate as f32;
            let coeff = 2.0 * omega.cos();
            let (mut q1, mut q2) = (0.0f32, 0.0f32);
            for &sample in &audio {
                let q0 = coeff * q1 - q2 + sample;
                q2 = q1;
                q1 = q0;
            }
            q1 * q1 + q2 * q2 - coeff * q1 * q2
        };
        let on_tone = probe(freq_of(params.first_carrier));
        let off_tone = probe(freq_of(params.first_carrier + 2 * CARRIER_SEPAR));
        assert!(on_tone > 100.0 * off_tone);
    }
}
