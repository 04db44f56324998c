//! Iterative soft-input/soft-output FEC decoder.
//!
//! The decoder state is an extrinsic probability per tone and symbol
//! position, refined by shuttling information between the MFSK soft
//! demodulator and the Walsh-transform domain. Each iteration multiplies
//! the channel likelihood into the extrinsic distribution, collapses it to
//! per-bit soft decisions, de-interleaves and descrambles them into
//! codewords, transforms, takes the hard character decision off the
//! codeword peak, and feeds a sharpened soft replica back through the
//! inverse path.

use crate::buffer::CharFifo;
use crate::encoder::scramble_codeword;
use crate::fht::{fht, ifht};
use crate::params::Parameters;
use crate::soft_decoder::{soft_demodulate, soft_modulate};
use crate::{SCRAMBLE_STRIDE, SYMBOLS_PER_BLOCK};

/// Multiply the channel energies in squared (the raw bin energies are
/// already |X|^2, so the likelihood used is |X|^4).
pub(crate) const DECODE_SQUARE_ENERGY: bool = true;

/// Exponent of the feedback sharpening `x * |x|^(FEEDBACK_EXPONENT - 1)`
/// applied to the codeword before renormalisation. The sign-preserving
/// square outperforms the plain cube in simulation; change it here to
/// experiment.
const FEEDBACK_EXPONENT: f32 = 2.0;

pub struct IterDecoder {
    bits_per_symbol: usize,
    carriers: usize,

    /// Channel input: `SYMBOLS_PER_BLOCK x carriers` bin energies, filled
    /// by the demodulator's block picker.
    pub input: Vec<f32>,
    input_extrinsic: Vec<f32>,
    fht_codeword: Vec<f32>,
    output_block: [u8; 8],

    pub input_signal_energy: f32,
    pub input_noise_energy: f32,
    pub fec_signal_energy: f32,
    pub fec_noise_energy: f32,
}

impl IterDecoder {
    pub fn new(params: &Parameters) -> Self {
        let carriers = params.carriers;
        Self {
            bits_per_symbol: params.bits_per_symbol,
            carriers,
            input: vec![0.0; SYMBOLS_PER_BLOCK * carriers],
            input_extrinsic: vec![0.0; SYMBOLS_PER_BLOCK * carriers],
            fht_codeword: vec![0.0; SYMBOLS_PER_BLOCK * params.bits_per_symbol],
            output_block: [0; 8],
            input_signal_energy: 0.0,
            input_noise_energy: 0.0,
            fec_signal_energy: 0.0,
            fec_noise_energy: 0.0,
        }
    }

    /// The decoded characters of the last processed block, one per bit
    /// plane.
    pub fn output_block(&self) -> &[u8] {
        &self.output_block[..self.bits_per_symbol]
    }

    /// Push the decoded characters into an output queue; returns how many
    /// were accepted.
    pub fn write_output(&self, output: &mut CharFifo) -> usize {
        let mut written = 0;
        for &character in self.output_block().iter() {
            if !output.push(character) {
                break;
            }
            written += 1;
        }
        written
    }

    /// Estimated input S/N [dB] from the last iteration's energy split.
    pub fn input_snr_db(&self) -> f32 {
        10.0 * (self.input_signal_energy / self.input_noise_energy).log10()
    }

    /// Run up to `max_iter` refinement iterations over the current input.
    pub fn process(&mut self, max_iter: usize) {
        let bits = self.bits_per_symbol;
        let carriers = self.carriers;
        let block_size = bits * SYMBOLS_PER_BLOCK;
        let mut symbol_bits = [0.0f32; 8];

        for value in self.input_extrinsic.iter_mut() {
            *value = 1.0 / carriers as f32;
        }

        for _ in 0..max_iter {
            // Multiply the channel likelihood into the extrinsic
            // distribution.
            for (ext, &energy) in self.input_extrinsic.iter_mut().zip(self.input.iter()) {
                let mut likelihood = energy;
                if DECODE_SQUARE_ENERGY {
                    likelihood *= likelihood;
                }
                *ext *= likelihood;
            }

            // Collapse to per-bit soft decisions and de-interleave them
            // into the codeword planes. The rotation decrements by one
            // per symbol, undoing the encoder's diagonal.
            let mut rotate = 0usize;
            for time_bit in 0..SYMBOLS_PER_BLOCK {
                let inp_idx = time_bit * carriers;
                soft_demodulate(
                    &mut symbol_bits[..bits],
                    &self.input_extrinsic[inp_idx..inp_idx + carriers],
                    1,
                    false,
                );
                let mut block_idx = time_bit + rotate * SYMBOLS_PER_BLOCK;
                for &soft in symbol_bits[..bits].iter() {
                    self.fht_codeword[block_idx] = soft;
                    block_idx += SYMBOLS_PER_BLOCK;
                    if block_idx >= block_size {
                        block_idx -= block_size;
                    }
                }
                rotate = if rotate > 0 { rotate - 1 } else { bits - 1 };
            }

            // Transform each plane, take the hard decision, and build the
            // soft replica for the feedback path.
            self.fec_signal_energy = 0.0;
            self.fec_noise_energy = 0.0;
            for bit in 0..bits {
                let codeword =
                    &mut self.fht_codeword[bit * SYMBOLS_PER_BLOCK..(bit + 1) * SYMBOLS_PER_BLOCK];
                scramble_codeword(codeword, SCRAMBLE_STRIDE * bit);
                fht(codeword);

                let (character, signal_energy, noise_energy) = decode_character(codeword);
                self.output_block[bit] = character;
                self.fec_signal_energy += signal_energy;
                self.fec_noise_energy += noise_energy;

                feedback_power(codeword);
                normalize_abs_sum(codeword);
                ifht(codeword);
                scramble_codeword(codeword, SCRAMBLE_STRIDE * bit);
            }

            // Interleave back and soft-modulate into the next extrinsic
            // distribution.
            let mut rotate = 0usize;
            for time_bit in 0..SYMBOLS_PER_BLOCK {
                let inp_idx = time_bit * carriers;
                let mut block_idx = time_bit + rotate * SYMBOLS_PER_BLOCK;
                for soft in symbol_bits[..bits].iter_mut() {
                    *soft = self.fht_codeword[block_idx];
                    block_idx += SYMBOLS_PER_BLOCK;
                    if block_idx >= block_size {
                        block_idx -= block_size;
                    }
                }
                soft_modulate(
                    &mut self.input_extrinsic[inp_idx..inp_idx + carriers],
                    &symbol_bits[..bits],
                );
                rotate = if rotate > 0 { rotate - 1 } else { bits - 1 };
            }

            // Split the channel energy into signal and noise according to
            // the refined tone probabilities.
            self.input_signal_energy = 0.0;
            self.input_noise_energy = 0.0;
            for (&energy, &prob) in self.input.iter().zip(self.input_extrinsic.iter()) {
                self.input_signal_energy += prob * energy;
                self.input_noise_energy += (1.0 - prob) * energy;
            }
            self.input_signal_energy -= self.input_noise_energy / (carriers - 1) as f32;
            self.input_noise_energy *= carriers as f32 / (carriers - 1) as f32;
        }
    }
}

// Hard character decision off the codeword peak, with unbiased signal and
// noise energy estimates.
fn decode_character(codeword: &[f32]) -> (u8, f32, f32) {
    let mut peak = 0.0f32;
    let mut peak_pos = 0usize;
    let mut energy_sum = 0.0f32;
    for (pos, &value) in codeword.iter().enumerate() {
        energy_sum += value * value;
        if value.abs() > peak.abs() {
            peak = value;
            peak_pos = pos;
        }
    }

    let mut character = peak_pos as u8;
    if peak < 0.0 {
        character += SYMBOLS_PER_BLOCK as u8;
    }

    let mut signal_energy = peak * peak;
    let mut noise_energy = energy_sum - signal_energy;
    signal_energy -= noise_energy / (SYMBOLS_PER_BLOCK - 1) as f32;
    noise_energy *= SYMBOLS_PER_BLOCK as f32 / (SYMBOLS_PER_BLOCK - 1) as f32;

    (character, signal_energy, noise_energy)
}

fn feedback_power(codeword: &mut [f32]) {
    for value in codeword.iter_mut() {
        *value *= value.abs().powf(FEEDBACK_EXPONENT - 1.0);
    }
}

fn normalize_abs_sum(codeword: &mut [f32]) {
    let sum: f32 = codeword.iter().map(|value| value.abs()).sum();
    if sum > 0.0 {
        let corr = 1.0 / sum;
        for value in codeword.iter_mut() {
            *value *= corr;
        }
    }
}
