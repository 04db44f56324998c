//! Device-boundary sample conversion: f32 internal format, 16-bit PCM
//! outside, with hard saturation at the full-scale limits.

pub fn to_i16(sample: f32) -> i16 {
    let scaled = (sample * 32768.0).round();
    scaled.clamp(-32767.0, 32767.0) as i16
}

pub fn from_i16(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn to_i16_buffer(input: &[f32]) -> Vec<i16> {
    input.iter().map(|&sample| to_i16(sample)).collect()
}

pub fn from_i16_buffer(input: &[i16]) -> Vec<f32> {
    input.iter().map(|&sample| from_i16(sample)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_instead_of_wrapping() {
        assert_eq!(to_i16(2.0), 32767);
        assert_eq!(to_i16(-2.0), -32767);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn round_trip_is_close() {
        for &sample in &[-0.9, -0.25, 0.0, 0.125, 0.7] {
            let back = from_i16(to_i16(sample));
            assert!((back - sample).abs() < 1.0 / 32768.0);
        }
    }
}
