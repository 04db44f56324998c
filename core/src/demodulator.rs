//! Spectral demodulator: per-carrier energies at 4x oversampling in time.
//!
//! Consumes one symbol period per call and emits four spectral slices into
//! a circular history, each slice holding the bin energies of the tone
//! band plus the synchroniser search margin. Slices are computed by
//! sliding the input tap a quarter period at a time and windowing with the
//! same pulse shape the transmitter uses.

use rustfft::num_complex::Complex;

use crate::buffer::CircularBuffer;
use crate::error::{ModemError, Result};
use crate::fft::TwoChannelFft;
use crate::params::Parameters;
use crate::shape::symbol_shape;
use crate::{CARRIER_SEPAR, SPECTRA_PER_BLOCK, SPECTRA_PER_SYMBOL, SYMBOLS_PER_BLOCK};

pub struct Demodulator {
    symbol_separ: usize,
    symbol_len: usize,
    slice_separ: usize,
    wrap_mask: usize,
    first_carrier: usize,
    carriers: usize,
    decode_margin: usize,
    decode_width: usize,

    inp_tap: Vec<f32>,
    inp_tap_ptr: usize,
    symbol_shape: Vec<f32>,

    fft: TwoChannelFft,
    fft_buff: Vec<Complex<f32>>,
    spectra: [Vec<Complex<f32>>; 2],

    history: CircularBuffer<f32>,
}

impl Demodulator {
    pub fn new(params: &Parameters) -> Self {
        let symbol_len = params.symbol_len;
        let spectra_len = symbol_len / 2;
        let decode_width = params.decode_width();
        Self {
            symbol_separ: params.symbol_separ,
            symbol_len,
            slice_separ: params.symbol_separ / SPECTRA_PER_SYMBOL,
            wrap_mask: symbol_len - 1,
            first_carrier: params.first_carrier,
            carriers: params.carriers,
            decode_margin: params.decode_margin(),
            decode_width,
            inp_tap: vec![0.0; symbol_len],
            inp_tap_ptr: 0,
            symbol_shape: symbol_shape(symbol_len, 1.0 / symbol_len as f64),
            fft: TwoChannelFft::new(symbol_len),
            fft_buff: vec![Complex::new(0.0, 0.0); symbol_len],
            spectra: [
                vec![Complex::new(0.0, 0.0); spectra_len],
                vec![Complex::new(0.0, 0.0); spectra_len],
            ],
            history: CircularBuffer::new(
                (params.sync_integ_len + 2) * SPECTRA_PER_BLOCK,
                decode_width,
            ),
        }
    }

    /// Samples consumed per call to [`Self::process`].
    pub fn input_len(&self) -> usize {
        self.symbol_separ
    }

    pub fn decode_width(&self) -> usize {
        self.decode_width
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Spectral slice at a signed offset from the history cursor.
    pub fn history_row(&self, offset: isize) -> &[f32] {
        self.history.offset_row(offset)
    }

    /// Process one symbol period of conditioned audio: four new slices.
    pub fn process(&mut self, input: &[f32]) {
        debug_assert!(input.len() >= self.symbol_separ);
        let mut inp = 0;
        for _ in (0..SPECTRA_PER_SYMBOL).step_by(2) {
            self.slide_slice(&input[inp..inp + self.slice_separ]);
            inp += self.slice_separ;
            self.window_into_re();

            self.slide_slice(&input[inp..inp + self.slice_separ]);
            inp += self.slice_separ;
            self.window_into_im();

            self.fft.forward(&mut self.fft_buff);
            {
                let [spectra0, spectra1] = &mut self.spectra;
                self.fft.separ_two_reals(&self.fft_buff, spectra0, spectra1);
            }

            let base = self.first_carrier - self.decode_margin;
            for which in 0..2 {
                let spectra = &self.spectra[which];
                let row = self.history.offset_row_mut(which as isize);
                for (idx, cell) in row.iter_mut().enumerate() {
                    *cell = spectra[base + idx].norm_sqr();
                }
            }
            self.history.advance(2);
        }
    }

    /// Extract a `SYMBOLS_PER_BLOCK x carriers` energy matrix from the
    /// history at the given block phase and frequency offset.
    pub fn pick_block(
        &self,
        output: &mut [f32],
        time_offset: isize,
        freq_offset: isize,
    ) -> Result<()> {
        if time_offset > -(SPECTRA_PER_BLOCK as isize)
            || -time_offset > self.history.len() as isize
        {
            return Err(ModemError::BlockOutOfRange);
        }
        if freq_offset < 0
            || freq_offset as usize + (self.carriers - 1) * CARRIER_SEPAR >= self.decode_width
        {
            return Err(ModemError::BlockOutOfRange);
        }

        let mut out_idx = 0;
        let mut slice = time_offset;
        for _ in 0..SYMBOLS_PER_BLOCK {
            let row = self.history.offset_row(slice);
            let mut freq = freq_offset as usize;
            for _ in 0..self.carriers {
                output[out_idx] = row[freq];
                out_idx += 1;
                freq += CARRIER_SEPAR;
            }
            slice += SPECTRA_PER_SYMBOL as isize;
        }
        Ok(())
    }

    fn slide_slice(&mut self, input: &[f32]) {
        for &sample in input.iter() {
            self.inp_tap[self.inp_tap_ptr] = sample;
            self.inp_tap_ptr = (self.inp_tap_ptr + 1) & self.wrap_mask;
        }
    }

    fn window_into_re(&mut self) {
        for (bin, &shape) in self.fft_buff.iter_mut().zip(self.symbol_shape.iter()) {
            bin.re = self.inp_tap[self.inp_tap_ptr] * shape;
            self.inp_tap_ptr = (self.inp_tap_ptr + 1) & self.wrap_mask;
        }
    }

    fn window_into_im(&mut self) {
        for (bin, &shape) in self.fft_buff.iter_mut().zip(self.symbol_shape.iter()) {
            bin.im = self.inp_tap[self.inp_tap_ptr] * shape;
            self.inp_tap_ptr = (self.inp_tap_ptr + 1) & self.wrap_mask;
        }
    }
}
