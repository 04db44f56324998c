//! Receiver: audio in, characters out.
//!
//! The input rate converter feeds a staging buffer; whole conditioner
//! windows are pulled from it, conditioned, demodulated symbol by symbol,
//! and every new spectral slice is offered to the synchroniser. At each
//! block decision point with a stable lock, the decoder searches a small
//! grid around the synchroniser's estimate (eight iterations per cell,
//! thirty-two on the winner) and the winning block's characters go to the
//! output FIFO.

use crate::buffer::CharFifo;
use crate::demodulator::Demodulator;
use crate::input_proc::InputProcessor;
use crate::iter_decoder::IterDecoder;
use crate::params::Parameters;
use crate::rateconv::RateConverter;
use crate::sync::Synchronizer;
use crate::{SPECTRA_PER_BLOCK, SPECTRA_PER_SYMBOL, SYMBOLS_PER_BLOCK};

const OUTPUT_FIFO_LEN: usize = 1024;

/// Conditioner window length in symbol periods.
const WINDOW_SYMBOLS: usize = 32;

pub struct Receiver {
    params: Parameters,
    rate_converter: RateConverter,
    input_buffer: Vec<f32>,
    input_processor: InputProcessor,
    demodulator: Demodulator,
    synchronizer: Synchronizer,
    decoder: IterDecoder,
    output: CharFifo,
}

impl Receiver {
    /// Build a receiver for preset parameters.
    pub fn new(params: &Parameters) -> Self {
        Self {
            params: params.clone(),
            rate_converter: RateConverter::new(
                params.sample_rate as f64 / params.input_sample_rate as f64,
            ),
            input_buffer: Vec::new(),
            input_processor: InputProcessor::new(WINDOW_SYMBOLS * params.symbol_separ),
            demodulator: Demodulator::new(params),
            synchronizer: Synchronizer::new(params),
            decoder: IterDecoder::new(params),
            output: CharFifo::new(OUTPUT_FIFO_LEN),
        }
    }

    /// Discard buffered audio and decoder state; keeps all allocations.
    pub fn reset(&mut self) {
        self.rate_converter.reset();
        self.input_buffer.clear();
        self.input_processor.reset();
        self.demodulator.reset();
        self.synchronizer.reset();
        self.output.clear();
    }

    /// Integrated FEC S/N at the synchroniser's best cell.
    pub fn sync_snr(&self) -> f32 {
        self.synchronizer.fec_snr()
    }

    /// Carrier frequency offset of the incoming signal [Hz].
    pub fn frequency_offset(&self) -> f32 {
        self.synchronizer.frequency_offset()
    }

    /// Carrier frequency drift rate [Hz/s].
    pub fn frequency_drift(&self) -> f32 {
        self.synchronizer.frequency_drift_rate()
    }

    /// Sample clock mismatch between the two ends, as a fraction.
    pub fn time_drift(&self) -> f32 {
        self.synchronizer.time_drift_rate()
    }

    /// True while the synchroniser estimate is steady and above threshold.
    pub fn stable_lock(&self) -> bool {
        self.synchronizer.stable_lock
    }

    /// Input S/N estimate [dB] from the iterative decoder.
    pub fn input_snr_db(&self) -> f32 {
        self.decoder.input_snr_db()
    }

    /// Feed received audio; any amount at a time.
    pub fn process(&mut self, samples: &[f32]) {
        self.rate_converter.process(samples, &mut self.input_buffer);
        self.process_input_buffer();
    }

    /// Take one decoded character.
    pub fn get_char(&mut self) -> Option<u8> {
        self.output.pop()
    }

    /// Push enough silence through the pipeline that every character still
    /// buffered in the decoding latency falls out.
    pub fn flush(&mut self) {
        self.process_input_buffer();

        let window_len = self.input_processor.window_len();
        if self.input_buffer.len() < window_len {
            self.input_buffer.resize(window_len, 0.0);
        }
        self.process_input_buffer();

        let flush_len =
            self.params.symbol_separ * SYMBOLS_PER_BLOCK * self.params.sync_integ_len * 2;
        let mut flushed = 0;
        while flushed < flush_len {
            self.input_buffer.clear();
            self.input_buffer.resize(window_len, 0.0);
            self.process_input_buffer();
            flushed += window_len;
        }
    }

    // Condition and demodulate every complete window in the staging
    // buffer.
    fn process_input_buffer(&mut self) {
        let window_len = self.input_processor.window_len();
        while self.input_buffer.len() >= window_len {
            self.input_processor.process(Some(&self.input_buffer[..window_len]));
            self.input_buffer.drain(..window_len);
            for start in (0..window_len).step_by(self.params.symbol_separ) {
                self.process_symbol(start);
            }
        }
    }

    // Run one symbol period of conditioned audio through the demodulator
    // and offer each new slice to the synchroniser.
    fn process_symbol(&mut self, start: usize) {
        let symbol_separ = self.params.symbol_separ;
        self.demodulator
            .process(&self.input_processor.output()[start..start + symbol_separ]);

        for hist_offset in -(SPECTRA_PER_SYMBOL as isize)..0 {
            self.synchronizer
                .process(self.demodulator.history_row(hist_offset));

            if self.synchronizer.decode_reference == 0 && self.synchronizer.stable_lock {
                self.decode_block(hist_offset);
            }
        }
    }

    // Decode the settled block about to leave the history: search a small
    // time/frequency grid around the synchroniser estimate, then decode
    // the best cell thoroughly.
    fn decode_block(&mut self, hist_offset: isize) {
        let integ_len = self.params.sync_integ_len as isize;
        let spectra_per_block = SPECTRA_PER_BLOCK as isize;
        let time_offset =
            hist_offset - ((integ_len + 1) * spectra_per_block + spectra_per_block / 2 - 1);
        let freq_offset = self.synchronizer.best_freq_offset as isize;

        let mut best_signal = 0.0f32;
        let mut best_time = 0isize;
        let mut best_freq = 0isize;
        for freq_search in -1..=1isize {
            for time_search in -2..=2isize {
                let picked = self.demodulator.pick_block(
                    &mut self.decoder.input,
                    time_offset + time_search,
                    freq_offset + freq_search,
                );
                if picked.is_err() {
                    continue;
                }
                self.decoder.process(8);
                let signal = self.decoder.input_signal_energy;
                if signal > best_signal {
                    best_signal = signal;
                    best_time = time_search;
                    best_freq = freq_search;
                }
            }
        }

        let picked = self.demodulator.pick_block(
            &mut self.decoder.input,
            time_offset + best_time,
            freq_offset + best_freq,
        );
        if picked.is_ok() {
            self.decoder.process(32);
            self.decoder.write_output(&mut self.output);
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
    fn empty_input_is_a_no_op() {
        let params = test_params();
        let mut receiver = Receiver::new(&params);
        receiver.process(&[]);
        assert_eq!(receiver.get_char(), None);
        assert_eq!(receiver.sync_snr(), 0.0);
        assert!(!receiver.stable_lock());
    }

    #[test]
    fn silence_produces_no_characters() {
        let params = test_params();
        let mut receiver = Receiver::new(&params);
        let silence = vec![0.0f32; 16 * 1024];
        receiver.process(&silence);
        assert_eq!(receiver.get_char(), None);
        assert!(!receiver.stable_lock());
    }

    #[test]
    fn flush_is_idempotent_after_the_second_call() {
        let params = test_params();
        let mut receiver = Receiver::new(&params);
        let silence = vec![0.0f32; 8192];
        receiver.process(&silence);
        receiver.flush();
        while receiver.get_char().is_some() {}
        receiver.flush();
        assert_eq!(receiver.get_char(), None);
    }
}
