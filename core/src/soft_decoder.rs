//! Soft MFSK demodulation and the lightweight per-hypothesis decoder.
//!
//! The free functions convert between per-carrier energies and per-bit
//! soft decisions; they are shared with the iterative decoder. The
//! `SoftDecoder` itself is the synchroniser's scorer: it keeps a rolling
//! block of soft bits and runs one FHT per bit plane, reporting the FEC
//! signal and noise energies. Its character output is never surfaced.

use crate::fht::{binary_code, fht};
use crate::{
    CARRIER_SEPAR, SCRAMBLE_STRIDE, SCRAMBLING_CODE, SPECTRA_PER_SYMBOL, SYMBOLS_PER_BLOCK,
    USE_GRAY_CODE,
};

/// The synchroniser scores on squared energies.
pub(crate) const SYNC_SQUARE_ENERGY: bool = true;

/// Soft-demodulate one symbol: fold per-carrier energies (strided by
/// `stride` bins) into a normalised soft decision per bit. Positive means
/// the bit is 0.
pub fn soft_demodulate(symbol_bits: &mut [f32], energies: &[f32], stride: usize, square: bool) {
    for bit in symbol_bits.iter_mut() {
        *bit = 0.0;
    }
    let carriers = 1usize << symbol_bits.len();

    let mut total = 0.0f32;
    let mut freq = 0;
    for carrier in 0..carriers {
        let symbol = if USE_GRAY_CODE {
            binary_code(carrier as u8)
        } else {
            carrier as u8
        };
        let mut energy = energies[freq];
        if square {
            energy *= energy;
        }
        total += energy;
        for (bit, acc) in symbol_bits.iter_mut().enumerate() {
            if symbol & (1 << bit) != 0 {
                *acc -= energy;
            } else {
                *acc += energy;
            }
        }
        freq += stride;
    }

    if total > 0.0 {
        for bit in symbol_bits.iter_mut() {
            *bit /= total;
        }
    }
}

/// Inverse of [`soft_demodulate`]: turn per-bit soft decisions back into
/// a probability for every carrier.
pub fn soft_modulate(carrier_prob: &mut [f32], symbol_bits: &[f32]) {
    for (carrier, prob_out) in carrier_prob.iter_mut().enumerate() {
        let symbol = if USE_GRAY_CODE {
            binary_code(carrier as u8)
        } else {
            carrier as u8
        };
        let mut prob = 1.0f32;
        for (bit, &soft) in symbol_bits.iter().enumerate() {
            let bit_prob = if symbol & (1 << bit) != 0 {
                1.0 - soft
            } else {
                1.0 + soft
            };
            prob *= bit_prob / 2.0;
        }
        *prob_out = prob;
    }
}

pub struct SoftDecoder {
    bits_per_symbol: usize,
    input_buffer: Vec<f32>,
    input_ptr: usize,
    fht_buffer: [f32; SYMBOLS_PER_BLOCK],
    pub signal: f32,
    pub noise_energy: f32,
}

impl SoftDecoder {
    pub fn new(bits_per_symbol: usize) -> Self {
        Self {
            bits_per_symbol,
            input_buffer: vec![0.0; SYMBOLS_PER_BLOCK * SPECTRA_PER_SYMBOL * bits_per_symbol],
            input_ptr: 0,
            fht_buffer: [0.0; SYMBOLS_PER_BLOCK],
            signal: 0.0,
            noise_energy: 0.0,
        }
    }

    pub fn reset(&mut self) {
        for cell in self.input_buffer.iter_mut() {
            *cell = 0.0;
        }
        self.input_ptr = 0;
        self.signal = 0.0;
        self.noise_energy = 0.0;
    }

    /// Feed the bin energies of one spectral slice at this decoder's
    /// frequency hypothesis.
    pub fn spectral_input(&mut self, energies: &[f32]) {
        let bits = self.bits_per_symbol;
        soft_demodulate(
            &mut self.input_buffer[self.input_ptr..self.input_ptr + bits],
            energies,
            CARRIER_SEPAR,
            SYNC_SQUARE_ENERGY,
        );
        self.input_ptr += bits;
        if self.input_ptr >= self.input_buffer.len() {
            self.input_ptr = 0;
        }
    }

    /// Decode all bit planes of the rolling block and integrate the FEC
    /// signal and noise estimates.
    pub fn process(&mut self) {
        self.signal = 0.0;
        self.noise_energy = 0.0;
        for freq_bit in 0..self.bits_per_symbol {
            self.decode_character(freq_bit);
        }
        self.signal /= self.bits_per_symbol as f32;
        self.noise_energy /= self.bits_per_symbol as f32;
    }

    fn decode_character(&mut self, freq_bit: usize) {
        let bits = self.bits_per_symbol;
        let slice_stride = bits * SPECTRA_PER_SYMBOL;
        let code_wrap = SYMBOLS_PER_BLOCK - 1;

        let mut ptr = self.input_ptr;
        let mut rotate = freq_bit;
        let mut code_bit = (freq_bit * SCRAMBLE_STRIDE) & code_wrap;
        for time_bit in 0..SYMBOLS_PER_BLOCK {
            let mut value = self.input_buffer[ptr + rotate];
            if SCRAMBLING_CODE & (1u64 << code_bit) != 0 {
                value = -value;
            }
            self.fht_buffer[time_bit] = value;
            code_bit = (code_bit + 1) & code_wrap;
            rotate += 1;
            if rotate >= bits {
                rotate = 0;
            }
            ptr += slice_stride;
            if ptr >= self.input_buffer.len() {
                ptr -= self.input_buffer.len();
            }
        }

        fht(&mut self.fht_buffer);
        let mut peak = 0.0f32;
        let mut sqr_sum = 0.0f32;
        for &value in self.fht_buffer.iter() {
            sqr_sum += value * value;
            if value.abs() > peak.abs() {
                peak = value;
            }
        }
        sqr_sum -= peak * peak;

        // The hard character (the peak position) is discarded here; only
        // the hypothesis score matters to the synchroniser.
        self.noise_energy += sqr_sum / (SYMBOLS_PER_BLOCK - 1) as f32;
        self.signal += peak.abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fht::gray_code;

    #[test]
    fn soft_demodulate_of_a_clean_tone_saturates_the_bits() {
        let bits = 5;
        let carriers = 1 << bits;
        let symbol = 11u8;
        let mut energies = vec![0.0f32; carriers];
        energies[gray_code(symbol) as usize] = 1.0;

        let mut soft = vec![0.0f32; bits];
        soft_demodulate(&mut soft, &energies, 1, false);
        for (bit, &value) in soft.iter().enumerate() {
            let expected = if symbol & (1 << bit) != 0 { -1.0 } else { 1.0 };
            assert!((value - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn soft_modulate_inverts_hard_decisions() {
        let bits = 5;
        let carriers = 1 << bits;
        for symbol in 0..carriers as u8 {
            let soft: Vec<f32> = (0..bits)
                .map(|bit| if symbol & (1 << bit) != 0 { -1.0 } else { 1.0 })
                .collect();
            let mut prob = vec![0.0f32; carriers];
            soft_modulate(&mut prob, &soft);
            for (carrier, &p) in prob.iter().enumerate() {
                let expected = if carrier == gray_code(symbol) as usize { 1.0 } else { 0.0 };
                assert!((p - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn probabilities_always_sum_to_one() {
        let bits = 4;
        let carriers = 1 << bits;
        let soft = [0.3f32, -0.7, 0.1, 0.95];
        let mut prob = vec![0.0f32; carriers];
        soft_modulate(&mut prob, &soft[..bits]);
        let sum: f32 = prob.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}
