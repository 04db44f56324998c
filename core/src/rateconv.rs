//! Fractional sample-rate converter for the soundcard clock correction.
//!
//! A polyphase FIR: 16 input taps convolved with one of 16 sub-filters of
//! a 256-tap Blackman-Harris windowed sinc (cutoff 3/8 of the input rate),
//! with linear interpolation between the two sub-filter outputs either
//! side of the fractional phase. Good for the sub-percent ratios a
//! soundcard clock needs; the time cursor is double precision so the
//! ratio error does not accumulate over a transmission.

const TAP_LEN: usize = 16;
const OVER_SAMPLING: usize = 16;
const UPPER_FREQ: f64 = 3.0 / 8.0;

pub struct RateConverter {
    filter_shape: Vec<f32>,
    input_tap: [f32; TAP_LEN],
    input_tap_ptr: usize,
    output_period: f64,
    output_time: f64,
    output_before: f32,
    output_after: f32,
    pending: bool,
}

impl RateConverter {
    /// `output_rate` is the output rate in terms of the input rate.
    pub fn new(output_rate: f64) -> Self {
        let filter_len = TAP_LEN * OVER_SAMPLING;
        let mut filter_shape = Vec::with_capacity(filter_len);
        for idx in 0..filter_len {
            let phase = std::f64::consts::PI * (2 * idx as i64 - filter_len as i64) as f64
                / filter_len as f64;
            let window = 0.35875
                + 0.48829 * phase.cos()
                + 0.14128 * (2.0 * phase).cos()
                + 0.01168 * (3.0 * phase).cos();
            let filter = if phase != 0.0 {
                let sinc_phase = phase * UPPER_FREQ * TAP_LEN as f64;
                sinc_phase.sin() / sinc_phase
            } else {
                1.0
            };
            filter_shape.push((window * filter) as f32);
        }
        // Normalise the sinc to unity passband gain.
        for coeff in filter_shape.iter_mut() {
            *coeff *= (2.0 * UPPER_FREQ) as f32;
        }

        let mut converter = Self {
            filter_shape,
            input_tap: [0.0; TAP_LEN],
            input_tap_ptr: 0,
            output_period: OVER_SAMPLING as f64 / output_rate,
            output_time: 0.0,
            output_before: 0.0,
            output_after: 0.0,
            pending: false,
        };
        converter.reset();
        converter
    }

    pub fn reset(&mut self) {
        self.input_tap = [0.0; TAP_LEN];
        self.input_tap_ptr = 0;
        self.output_time = 0.0;
        self.output_before = 0.0;
        self.output_after = 0.0;
        self.pending = false;
    }

    /// Convert a batch, appending to `output`. Returns the number of
    /// samples appended.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> usize {
        let mut written = 0usize;
        let mut inp_idx = 0usize;
        loop {
            if self.pending {
                let mut idx = self.output_time.floor() as i64 + 1;
                if idx >= OVER_SAMPLING as i64 {
                    if inp_idx >= input.len() {
                        break;
                    }
                    self.push_input(input[inp_idx]);
                    inp_idx += 1;
                    idx -= OVER_SAMPLING as i64;
                    self.output_time -= OVER_SAMPLING as f64;
                }
                self.output_after = self.convolute(idx as usize);
                let weight = idx as f64 - self.output_time;
                output.push(
                    (weight * self.output_before as f64
                        + (1.0 - weight) * self.output_after as f64) as f32,
                );
                written += 1;
                self.pending = false;
            } else {
                let mut idx = (self.output_time + self.output_period).floor() as i64;
                if idx >= OVER_SAMPLING as i64 {
                    if inp_idx >= input.len() {
                        break;
                    }
                    self.push_input(input[inp_idx]);
                    inp_idx += 1;
                    idx -= OVER_SAMPLING as i64;
                    self.output_time -= OVER_SAMPLING as f64;
                }
                self.output_before = self.convolute(idx as usize);
                self.output_time += self.output_period;
                self.pending = true;
            }
        }
        written
    }

    fn push_input(&mut self, input: f32) {
        self.input_tap[self.input_tap_ptr] = input;
        self.input_tap_ptr = (self.input_tap_ptr + 1) & (TAP_LEN - 1);
    }

    // Convolve the tap with the polyphase sub-filter for `shift`.
    fn convolute(&self, shift: usize) -> f32 {
        let mut sum = 0.0f32;
        let mut shift = (OVER_SAMPLING - 1) - shift;
        let mut idx = self.input_tap_ptr;
        while shift < self.filter_shape.len() {
            sum += self.input_tap[idx] * self.filter_shape[shift];
            idx = (idx + 1) & (TAP_LEN - 1);
            shift += OVER_SAMPLING;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, cycles_per_sample: f32) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * std::f32::consts::PI * cycles_per_sample * n as f32).sin())
            .collect()
    }

    #[test]
    fn identity_ratio_preserves_a_sine_up_to_group_delay() {
        let mut converter = RateConverter::new(1.0);
        let input = sine(512, 0.03);
        let mut output = Vec::new();
        converter.process(&input, &mut output);
        assert!(output.len() >= 480, "only {} samples out", output.len());

        // Group delay of the windowed sinc is half the tap length.
        let delay = TAP_LEN / 2;
        let mut worst = 0.0f32;
        for n in 64..output.len() {
            let expected = input[n - delay];
            worst = worst.max((output[n] - expected).abs());
        }
        assert!(worst < 0.05, "worst-case deviation {worst}");
    }

    #[test]
    fn output_count_follows_the_ratio() {
        for &rate in &[0.95f64, 1.0, 1.05, 48000.0 / 44100.0] {
            let mut converter = RateConverter::new(rate);
            let input = vec![0.25f32; 4000];
            let mut output = Vec::new();
            converter.process(&input, &mut output);
            let expected = (4000.0 * rate) as isize;
            assert!(
                (output.len() as isize - expected).abs() <= 2,
                "rate {rate}: {} vs {expected}",
                output.len()
            );
        }
    }

    #[test]
    fn ppm_scale_ratio_accumulates_no_time_error() {
        // 100 ppm fast: over a million samples the extra output must be
        // right at 100 per million.
        let mut converter = RateConverter::new(1.0 + 100e-6);
        let mut output = Vec::new();
        let chunk = vec![0.0f32; 10_000];
        let mut total_out = 0usize;
        for _ in 0..100 {
            output.clear();
            total_out += converter.process(&chunk, &mut output);
        }
        let excess = total_out as i64 - 1_000_000;
        assert!((excess - 100).abs() <= 2, "excess {excess}");
    }

    #[test]
    fn empty_input_produces_no_output_and_no_state_change() {
        let mut converter = RateConverter::new(1.0);
        let mut output = Vec::new();
        assert_eq!(converter.process(&[], &mut output), 0);
        assert!(output.is_empty());
        let input = sine(64, 0.05);
        converter.process(&input, &mut output);
        let after_empty = output.clone();

        let mut fresh = RateConverter::new(1.0);
        let mut fresh_output = Vec::new();
        fresh.process(&[], &mut fresh_output);
        fresh.process(&input, &mut fresh_output);
        assert_eq!(after_empty, fresh_output);
    }
}
