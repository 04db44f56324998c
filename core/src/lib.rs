//! MFSK software modem for weak-signal text links over HF/VHF radio
//!
//! Converts a stream of 7-bit characters into a narrow-band audio waveform
//! and back. The transmit side is a Walsh-Hadamard FEC encoder feeding a
//! raised-cosine MFSK tone modulator; the receive side conditions the input
//! spectrum, demodulates it into a per-carrier energy history, synchronises
//! in frequency and block phase, and runs an iterative soft decoder.
//! Fractional rate converters at both ends absorb the soundcard clock error.

pub mod buffer;
pub mod demodulator;
pub mod encoder;
pub mod error;
pub mod fft;
pub mod fht;
pub mod input_proc;
pub mod iter_decoder;
pub mod modulator;
pub mod params;
pub mod pcm;
pub mod rateconv;
pub mod receiver;
pub mod shape;
pub mod soft_decoder;
pub mod sync;
pub mod transmitter;

pub use error::{ModemError, Result};
pub use params::Parameters;
pub use receiver::Receiver;
pub use transmitter::Transmitter;

// Wire-format constants. These are compatibility constants shared by both
// ends of the link, not tunables.

/// Bits per transmitted character (7-bit ASCII).
pub const BITS_PER_CHARACTER: usize = 7;

/// Tone symbols per FEC block: one Walsh codeword spans the whole block.
pub const SYMBOLS_PER_BLOCK: usize = 1 << (BITS_PER_CHARACTER - 1);

/// Tone spacing in FFT bins. Wide enough that adjacent tones do not
/// cross-talk through the sidelobes of the symbol pulse.
pub const CARRIER_SEPAR: usize = 4;

/// Spectral slices computed per symbol period (4x oversampling in time).
pub const SPECTRA_PER_SYMBOL: usize = 4;

/// Spectral slices per FEC block.
pub const SPECTRA_PER_BLOCK: usize = SPECTRA_PER_SYMBOL * SYMBOLS_PER_BLOCK;

/// Gray-code the tone numbers so adjacent-tone errors cost one bit.
pub const USE_GRAY_CODE: bool = true;

/// Add a random 90-degree phase step between symbols.
pub const PHASE_DITHER: bool = true;

/// Pseudo-random scrambling mask applied to every Walsh codeword.
pub const SCRAMBLING_CODE: u64 = 0xE257_E6D0_2915_74EC;

/// Per-bit-plane scrambler phase stride. Coprime with the block length, so
/// consecutive characters see distinct scrambler phases.
pub const SCRAMBLE_STRIDE: usize = 13;
