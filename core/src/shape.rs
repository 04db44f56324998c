//! The tone-burst pulse, synthesised from its frequency-domain prototype.

use std::f64::consts::PI;

/// Four-term frequency-domain prototype of the symbol pulse. Part of the
/// on-air format: both ends must window with the same shape.
pub const SYMBOL_FREQ_SHAPE: [f64; 4] = [1.0, 2.1373197349, 1.1207588117, -0.0165609232];

/// Expand the prototype into a time-domain pulse of `symbol_len` samples,
/// scaled by `scale`. Used as the transmit pulse and, with a different
/// scale, as the receive analysis window.
pub fn symbol_shape(symbol_len: usize, scale: f64) -> Vec<f32> {
    let mut shape = vec![SYMBOL_FREQ_SHAPE[0]; symbol_len];
    for (freq, &ampl) in SYMBOL_FREQ_SHAPE.iter().enumerate().skip(1) {
        let ampl = if freq & 1 == 1 { -ampl } else { ampl };
        for (time, acc) in shape.iter_mut().enumerate() {
            let phase = 2.0 * PI * (freq * time % symbol_len) as f64 / symbol_len as f64;
            *acc += ampl * phase.cos();
        }
    }
    shape.into_iter().map(|value| (value * scale) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_is_symmetric_and_tapers() {
        let shape = symbol_shape(1024, 1.0);
        for time in 1..1024 {
            assert!((shape[time] - shape[1024 - time]).abs() < 1e-5);
        }
        // Near-zero at the edges, maximum in the middle.
        assert!(shape[0].abs() < 0.01);
        assert!(shape[512] > 4.0);
        assert!(shape.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn scale_is_applied() {
        let unit = symbol_shape(256, 1.0);
        let eighth = symbol_shape(256, 0.125);
        for (a, b) in unit.iter().zip(&eighth) {
            assert!((a * 0.125 - b).abs() < 1e-6);
        }
    }
}
