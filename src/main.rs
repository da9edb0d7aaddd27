use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chirp_bridge::device::{
    record_utterance, AudioCapture, CpalSink, PlaybackScheduler, RingBuffer,
};
use chirp_bridge::media::OpenAiBackend;
use chirp_bridge::{wav, ApiServer, Config};

/// Chirp - real-time voice bridge between devices and speech backends
#[derive(Parser)]
#[command(name = "chirp", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long, env = "CHIRP_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server
    Serve,
    /// Record one utterance from the microphone to a WAV file
    Record {
        /// Output path
        #[arg(short, long, default_value = "utterance.wav")]
        output: PathBuf,
    },
    /// Play a WAV file through the buffered playback path
    Play {
        /// WAV file to play
        file: PathBuf,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,chirp_bridge=info",
        1 => "info,chirp_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = chirp_bridge::config::Port(port);
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Record { output } => record(&config, &output).await,
        Command::Play { file } => play(&config, &file),
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker(&config),
    }
}

/// Run the relay server until interrupted
async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(port = config.port.0, "starting chirp bridge");

    let backend = Arc::new(OpenAiBackend::new(&config.backend)?);
    let server = ApiServer::new(backend, config.audio, config.delivery, config.port.0);

    server.run().await?;
    Ok(())
}

/// Record one utterance to a WAV file
#[allow(clippy::future_not_send)]
async fn record(config: &Config, output: &PathBuf) -> anyhow::Result<()> {
    println!("Listening... speak into your microphone.");

    let pcm = record_utterance(config.vad, config.audio.sample_rate).await?;

    match pcm {
        Some(pcm) => {
            let format = wav::WavFormat {
                sample_rate: config.audio.sample_rate,
                ..wav::WavFormat::default()
            };
            let data = wav::encode_wav(&pcm, format)?;
            std::fs::write(output, &data)?;
            println!("Saved {} bytes to {}", data.len(), output.display());
        }
        None => {
            println!("No speech detected; nothing saved.");
        }
    }

    Ok(())
}

/// Play a WAV file through the ring buffer and playback scheduler
///
/// The file is fed in network-sized chunks from a producer thread, so this
/// exercises the same buffered path a streamed reply takes.
fn play(config: &Config, file: &PathBuf) -> anyhow::Result<()> {
    let data = std::fs::read(file)?;
    println!("Playing {} ({} bytes)...", file.display(), data.len());

    let ring = Arc::new(RingBuffer::new(config.playback.buffer_capacity));
    let chunk_size = config.audio.chunk_size;
    let audio = config.audio;
    let playback = config.playback;

    let producer_ring = Arc::clone(&ring);
    let producer = std::thread::spawn(move || {
        for chunk in data.chunks(chunk_size) {
            producer_ring.write(chunk);
        }
        producer_ring.finish();
    });

    // The speaker sink is thread-bound, so build it on the playback thread
    let player = std::thread::spawn(move || -> chirp_bridge::Result<()> {
        let sink = CpalSink::new(audio.sample_rate)?;
        PlaybackScheduler::new(ring, sink, &audio, &playback).run()
    });

    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    player
        .join()
        .map_err(|_| anyhow::anyhow!("playback thread panicked"))??;

    println!("Done.");
    Ok(())
}

/// Test microphone input with a level meter
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(config.audio.sample_rate)?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = ((energy / 32768.0) * 400.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:8.1} | Peak: {peak:5} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// RMS energy on the i16 scale
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| f32::from(s) * f32::from(s)).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
fn test_speaker(config: &Config) -> anyhow::Result<()> {
    use chirp_bridge::device::AudioSink;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = config.audio.sample_rate;
    let frequency = 440.0_f32;
    let num_samples = (sample_rate * 2) as usize;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let pcm: Vec<u8> = (0..num_samples)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
            ((sample * 32767.0) as i16).to_le_bytes()
        })
        .collect();

    println!("Playing {num_samples} samples at {sample_rate} Hz...");

    let mut sink = CpalSink::new(sample_rate)?;
    sink.write(&pcm)?;
    sink.close()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
