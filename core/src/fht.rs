//! Fast Walsh-Hadamard transform and Gray-code mapping.
//!
//! The FEC code is the set of Walsh functions of length
//! [`crate::SYMBOLS_PER_BLOCK`]; the transform below is the whole codec
//! machinery, shared by the encoder and both decoders.

use std::ops::{Add, Sub};

/// In-place Walsh-Hadamard butterfly over a power-of-two length.
///
/// Orthogonal up to a factor of the length: `fht(fht(x)) == len * x`.
pub fn fht<T>(data: &mut [T])
where
    T: Copy + Add<Output = T> + Sub<Output = T>,
{
    let len = data.len();
    debug_assert!(len.is_power_of_two());
    let mut step = 1;
    while step < len {
        let mut group = 0;
        while group < len {
            for idx in group..group + step {
                let a = data[idx];
                let b = data[idx + step];
                data[idx] = a + b;
                data[idx + step] = a - b;
            }
            group += 2 * step;
        }
        step <<= 1;
    }
}

/// Inverse transform. The butterfly is involutory, so this is the same
/// operation; a separate name keeps encode and decode sites readable.
pub fn ifht<T>(data: &mut [T])
where
    T: Copy + Add<Output = T> + Sub<Output = T>,
{
    fht(data);
}

/// Map a tone number to its Gray code.
pub fn gray_code(code: u8) -> u8 {
    code ^ (code >> 1)
}

/// Inverse of [`gray_code`]: cumulative XOR fold.
pub fn binary_code(mut code: u8) -> u8 {
    code ^= code >> 1;
    code ^= code >> 2;
    code ^= code >> 4;
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SYMBOLS_PER_BLOCK;

    #[test]
    fn fht_round_trip_restores_scaled_input() {
        let mut data: Vec<i32> = (0..SYMBOLS_PER_BLOCK as i32)
            .map(|idx| (idx * 37 + 11) % 51 - 25)
            .collect();
        let original = data.clone();
        fht(&mut data);
        ifht(&mut data);
        for (out, inp) in data.iter().zip(&original) {
            assert_eq!(*out, inp * SYMBOLS_PER_BLOCK as i32);
        }
    }

    #[test]
    fn fht_of_delta_is_a_walsh_function() {
        let mut data = [0i32; SYMBOLS_PER_BLOCK];
        data[5] = 1;
        ifht(&mut data);
        assert!(data.iter().all(|&value| value == 1 || value == -1));
    }

    #[test]
    fn gray_code_round_trip() {
        for code in 0..=255u8 {
            assert_eq!(binary_code(gray_code(code)), code);
        }
    }

    #[test]
    fn gray_neighbours_differ_by_one_bit() {
        for code in 0..255u8 {
            let diff = gray_code(code) ^ gray_code(code + 1);
            assert_eq!(diff.count_ones(), 1);
        }
    }
}
