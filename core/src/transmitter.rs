//! Transmitter: characters in, audio out.
//!
//! Chains the FEC block encoder, the MFSK modulator and the output rate
//! converter. Characters are queued in a bounded input FIFO and echoed to
//! a monitor FIFO as they enter the encoder. A stop request is honoured
//! only once the input queue is drained and the current block's 64 symbols
//! are out, so nothing queued is ever cut short.

use crate::buffer::CharFifo;
use crate::encoder::BlockEncoder;
use crate::modulator::Modulator;
use crate::params::Parameters;
use crate::rateconv::RateConverter;
use crate::SYMBOLS_PER_BLOCK;

const INPUT_FIFO_LEN: usize = 1024;
const MONITOR_FIFO_LEN: usize = 256;

pub struct Transmitter {
    params: Parameters,
    input: CharFifo,
    monitor: CharFifo,
    input_block: [u8; 8],
    encoder: BlockEncoder,
    symbol_ptr: usize,
    modulator: Modulator,
    modulator_output: Vec<f32>,
    rate_converter: RateConverter,
    converter_output: Vec<f32>,
    running: bool,
    stop_requested: bool,
}

impl Transmitter {
    /// Build a transmitter for preset parameters.
    pub fn new(params: &Parameters) -> Self {
        Self {
            params: params.clone(),
            input: CharFifo::new(INPUT_FIFO_LEN),
            monitor: CharFifo::new(MONITOR_FIFO_LEN),
            input_block: [0; 8],
            encoder: BlockEncoder::new(params.bits_per_symbol),
            symbol_ptr: 0,
            modulator: Modulator::new(params),
            modulator_output: vec![0.0; params.symbol_separ],
            rate_converter: RateConverter::new(
                params.output_sample_rate as f64 / params.sample_rate as f64,
            ),
            converter_output: Vec::with_capacity(Self::max_output_len(params)),
            running: false,
            stop_requested: false,
        }
    }

    /// Upper bound on the batch length [`Self::output`] can return.
    pub fn max_output_len(params: &Parameters) -> usize {
        (params.symbol_separ as f64 * params.output_sample_rate as f64
            / params.sample_rate as f64
            + 2.0)
            .ceil() as usize
    }

    /// Discard queued characters and in-flight audio.
    pub fn reset(&mut self) {
        self.input.clear();
        self.monitor.clear();
        self.symbol_ptr = 0;
        self.running = false;
        self.stop_requested = false;
        self.modulator.reset();
        self.rate_converter.reset();
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Request a stop; the transmitter keeps running until the queue and
    /// the current block are finished.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Queue a character; `false` when the input FIFO is full.
    pub fn put_char(&mut self, character: u8) -> bool {
        self.input.push(character)
    }

    /// Take one character from the monitor FIFO (characters echo here as
    /// they are encoded).
    pub fn get_char(&mut self) -> Option<u8> {
        self.monitor.pop()
    }

    /// Produce the next batch of output audio, one symbol period's worth
    /// at the device rate. Returns silence once stopped.
    pub fn output(&mut self) -> &[f32] {
        if self.symbol_ptr == 0 {
            if self.stop_requested && self.input.is_empty() {
                self.running = false;
                self.stop_requested = false;
            } else if self.running {
                let chars_per_block = self.params.chars_per_block();
                let mut filled = 0;
                while filled < chars_per_block {
                    match self.input.pop() {
                        Some(character) => {
                            self.input_block[filled] = character;
                            self.monitor.push(character);
                            filled += 1;
                        }
                        None => break,
                    }
                }
                // Unused character slots idle as NUL.
                for slot in self.input_block[filled..chars_per_block].iter_mut() {
                    *slot = 0;
                }
                self.encoder.encode_block(&self.input_block[..chars_per_block]);
            }
        }

        if self.running {
            self.modulator.send(self.encoder.output_block()[self.symbol_ptr]);
            self.symbol_ptr += 1;
            if self.symbol_ptr >= SYMBOLS_PER_BLOCK {
                self.symbol_ptr = 0;
            }
        }

        self.modulator.output(&mut self.modulator_output);
        self.converter_output.clear();
        self.rate_converter
            .process(&self.modulator_output, &mut self.converter_output);
        &self.converter_output
    }
}
