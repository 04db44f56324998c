use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hound::{SampleFormat, WavSpec};
use toneweave_core::{pcm, Parameters, Receiver, Transmitter};

#[derive(Parser)]
#[command(name = "toneweave")]
#[command(about = "MFSK weak-signal text modem: text to WAV and WAV to text")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModemOptions {
    /// Number of tones: 4, 8, 16, 32, 64, 128, 256
    #[arg(short, long, default_value_t = 32)]
    tones: usize,

    /// Occupied bandwidth [Hz]: 125, 250, 500, 1000, 2000
    #[arg(short, long, default_value_t = 1000)]
    bandwidth: usize,

    /// Lower audio band edge [Hz]
    #[arg(short, long, default_value_t = 500.0)]
    edge: f32,

    /// Synchroniser S/N threshold
    #[arg(short = 's', long, default_value_t = 3.0)]
    threshold: f32,

    /// Frequency search margin [carrier spacings]
    #[arg(short, long, default_value_t = 4)]
    margin: usize,

    /// Synchroniser integration period [FEC blocks]
    #[arg(short, long, default_value_t = 8)]
    integration: usize,

    /// True soundcard output (Tx) sample rate [Hz]
    #[arg(long, default_value_t = 8000.0)]
    output_rate: f32,

    /// True soundcard input (Rx) sample rate [Hz]
    #[arg(long, default_value_t = 8000.0)]
    input_rate: f32,
}

impl ModemOptions {
    fn to_parameters(&self) -> Result<Parameters, Box<dyn std::error::Error>> {
        if !self.tones.is_power_of_two() || self.tones < 2 {
            return Err(format!("tone count {} is not a power of two", self.tones).into());
        }
        let mut params = Parameters {
            bits_per_symbol: self.tones.trailing_zeros() as usize,
            bandwidth: self.bandwidth,
            lower_band_edge: self.edge,
            sync_threshold: self.threshold,
            sync_margin: self.margin,
            sync_integ_len: self.integration,
            output_sample_rate: self.output_rate,
            input_sample_rate: self.input_rate,
            ..Parameters::default()
        };
        params.preset()?;
        Ok(params)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a text file into an MFSK audio WAV file
    Tx {
        /// Input text file
        #[arg(value_name = "INPUT.TXT")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[command(flatten)]
        options: ModemOptions,
    },

    /// Decode an MFSK audio WAV file into text
    Rx {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output text file (stdout when omitted)
        #[arg(value_name = "OUTPUT.TXT")]
        output: Option<PathBuf>,

        #[command(flatten)]
        options: ModemOptions,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Tx { input, output, options } => tx_command(&input, &output, &options),
        Commands::Rx { input, output, options } => rx_command(&input, output.as_deref(), &options),
    }
}

fn print_mode(params: &Parameters) {
    eprintln!(
        "Mode: {} tones, {} Hz ({:.1}-{:.1} Hz), {:.2} baud, {:.1} s/block, {:.2} chars/s",
        params.carriers,
        params.bandwidth,
        params.lower_band_edge,
        params.lower_band_edge + params.bandwidth as f32,
        params.baud_rate(),
        params.block_period(),
        params.characters_per_second()
    );
    eprintln!(
        "Synchroniser: +/-{} carriers = +/-{:.1} Hz, {} blocks = {:.1} s",
        params.sync_margin,
        params.tune_margin(),
        params.sync_integ_len,
        params.sync_integ_len as f32 * params.block_period()
    );
}

fn tx_command(
    input_path: &PathBuf,
    output_path: &PathBuf,
    options: &ModemOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let params = options.to_parameters()?;
    print_mode(&params);

    let text = std::fs::read(input_path)?;
    eprintln!("Read {} characters from {}", text.len(), input_path.display());

    let spec = WavSpec {
        channels: 1,
        sample_rate: params.output_sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let file = File::create(output_path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;

    let mut transmitter = Transmitter::new(&params);
    transmitter.start();

    let mut written = 0usize;
    let mut pending = text.iter().copied().peekable();
    loop {
        while let Some(&character) = pending.peek() {
            if transmitter.put_char(character) {
                pending.next();
            } else {
                break;
            }
        }
        if pending.peek().is_none() {
            transmitter.stop();
        }
        if !transmitter.is_running() {
            break;
        }

        let samples = transmitter.output();
        for &sample in samples {
            writer.write_sample(pcm::to_i16(sample))?;
        }
        written += samples.len();

        // Echo the characters as they go on the air.
        while let Some(character) = transmitter.get_char() {
            print_filtered(character);
        }
    }
    println!();
    writer.finalize()?;

    eprintln!(
        "Wrote {} samples ({:.1} s) to {}",
        written,
        written as f32 / params.output_sample_rate,
        output_path.display()
    );
    Ok(())
}

fn rx_command(
    input_path: &PathBuf,
    output_path: Option<&std::path::Path>,
    options: &ModemOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let params = options.to_parameters()?;
    print_mode(&params);

    let file = File::open(input_path)?;
    let mut reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    eprintln!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );
    if spec.channels != 1 {
        return Err("expected mono audio".into());
    }
    if spec.bits_per_sample != 16 {
        return Err(format!("unsupported bit depth: {}", spec.bits_per_sample).into());
    }

    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let audio = pcm::from_i16_buffer(&samples?);
    eprintln!("Extracted {} samples", audio.len());

    let mut receiver = Receiver::new(&params);
    let mut decoded = Vec::new();

    // Roughly one status line per second of audio.
    let status_stride = params.sample_rate.next_power_of_two();
    for (batch, chunk) in audio.chunks(1024).enumerate() {
        receiver.process(chunk);
        while let Some(character) = receiver.get_char() {
            decoded.push(character);
        }
        if (batch * 1024) % status_stride < 1024 {
            eprint!(
                "\rRx S/N {:5.1}, {:+5.1} dB, {:+5.1} Hz, {:+6.1} Hz/min, {:+5.0} ppm ",
                receiver.sync_snr(),
                receiver.input_snr_db(),
                receiver.frequency_offset(),
                60.0 * receiver.frequency_drift(),
                1e6 * receiver.time_drift()
            );
        }
    }
    receiver.flush();
    while let Some(character) = receiver.get_char() {
        decoded.push(character);
    }
    eprintln!();

    match output_path {
        Some(path) => {
            std::fs::write(path, &decoded)?;
            eprintln!("Wrote {} characters to {}", decoded.len(), path.display());
        }
        None => {
            for &character in &decoded {
                print_filtered(character);
            }
            println!();
            std::io::stdout().flush()?;
        }
    }
    Ok(())
}

// Keep the terminal sane: NUL is the idle character, other control codes
// besides CR/LF/BS print as spaces.
fn print_filtered(character: u8) {
    match character {
        0 => {}
        b'\r' | b'\n' | 0x08 => print!("{}", character as char),
        c if c >= 0x20 => print!("{}", c as char),
        _ => print!(" "),
    }
}
