use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use parley::assistant::GeminiClient;
use parley::controller::{ControllerOptions, InteractionController};
use parley::voice::{
    AmplitudeTranscriber, AudioCapture, AudioPlayback, CloudSpeechEngine, CpalMicrophone,
    Microphone, SpeechEngine, narrow_sample,
};
use parley::{Config, Device, NetworkStatus, portal, transcript};

/// Phrase spoken once the speech engine is up
const READY_PHRASE: &str = "Ready";

/// Parley - push-to-talk voice assistant
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to config.toml (defaults to ~/.config/parley/config.toml)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configuration portal
    Portal,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Check that the configured API key is accepted
    CheckKey,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    let mut config = Config::load(config_path)?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Portal => Ok(portal::serve(config.portal.bind, config.settings_store()).await?),
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::CheckKey => check_key(&config).await,
        };
    }

    while !config.settings.has_api_key() {
        tracing::warn!("no API key configured, starting setup portal");
        portal::serve(config.portal.bind, config.settings_store()).await?;
        config = Config::load(config_path)?;
    }

    run_device(config).await
}

/// Wire up peripherals and run the main loop
async fn run_device(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        model = %config.assistant.model,
        record_ms = config.voice.record_duration.as_millis(),
        "starting parley"
    );

    let network = Arc::new(NetworkStatus::new(false));
    let http = reqwest::Client::new();
    network
        .probe(&http, &config.network.probe_url, config.network.probe_timeout)
        .await;
    let _monitor = Arc::clone(&network).spawn_monitor(
        http,
        config.network.probe_url.clone(),
        config.network.probe_interval,
        config.network.probe_timeout,
    );

    let gemini = GeminiClient::new(
        config.settings.api_key(),
        config.assistant.clone(),
        Arc::clone(&network),
    )?;
    if let Err(e) = gemini.validate_key().await {
        tracing::warn!(error = %e, "API key check failed, queries may not work");
    }

    let playback = Arc::new(start_playback(&config).await);

    let mic = CpalMicrophone::new(config.voice.sample_rate)?;
    let capture = AudioCapture::new(
        Box::new(mic),
        config.voice.sample_rate,
        config.voice.max_samples(),
        config.voice.read_chunk,
    );

    let transcriber = AmplitudeTranscriber::new(Arc::clone(&network), config.voice.speech_threshold);
    let (sink, log) = transcript::channel(
        config.transcript.queue_capacity,
        config.transcript.retained_lines,
    );

    let controller = InteractionController::new(
        capture,
        Arc::clone(&playback),
        Arc::new(transcriber),
        Arc::new(gemini),
        sink.clone(),
        ControllerOptions::from_config(&config),
    );

    let ready = Arc::clone(&playback);
    match tokio::task::spawn_blocking(move || ready.speak(READY_PHRASE)).await? {
        Ok(()) => sink.append("System", READY_PHRASE),
        Err(e) => tracing::warn!(error = %e, "could not speak ready phrase"),
    }

    let (trigger_tx, trigger_rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if trigger_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    let device = Device::new(controller, playback, log, network);
    device
        .run(trigger_rx, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

/// Start the speech engine, falling back to silent playback
async fn start_playback(config: &Config) -> AudioPlayback {
    let endpoint = config.voice.tts_endpoint.clone();
    let language = config.voice.tts_language.clone();

    let engine =
        tokio::task::spawn_blocking(move || CloudSpeechEngine::spawn(&endpoint, &language)).await;

    match engine {
        Ok(Ok(engine)) => AudioPlayback::new(
            Arc::new(engine) as Arc<dyn SpeechEngine>,
            config.voice.stop_timeout,
            config.voice.settle_delay,
        ),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "speech engine unavailable, replies will be silent");
            AudioPlayback::uninitialized()
        }
        Err(e) => {
            tracing::error!(error = %e, "speech engine startup panicked");
            AudioPlayback::uninitialized()
        }
    }
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut mic = CpalMicrophone::new(config.voice.sample_rate)?;
    mic.start()?;

    println!("Sample rate: {} Hz", config.voice.sample_rate);
    println!("---");

    let mut scratch = vec![0_i32; config.voice.read_chunk.max(1)];
    for i in 0..duration {
        let mut samples = Vec::new();
        let second = tokio::time::Instant::now() + Duration::from_secs(1);
        while tokio::time::Instant::now() < second {
            let read = mic.read(&mut scratch);
            samples.extend(scratch[..read].iter().copied().map(narrow_sample));
            tokio::time::sleep(config.voice.poll_interval).await;
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy / 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:7.1} | Peak: {:5} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    mic.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!(
        "Mean level above {} is treated as speech.",
        config.voice.speech_threshold
    );

    Ok(())
}

/// Calculate RMS energy of 16-bit samples
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s).powi(2)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let endpoint = config.voice.tts_endpoint.clone();
    let language = config.voice.tts_language.clone();
    let engine =
        tokio::task::spawn_blocking(move || CloudSpeechEngine::spawn(&endpoint, &language))
            .await??;

    let playback = Arc::new(AudioPlayback::new(
        Arc::new(engine) as Arc<dyn SpeechEngine>,
        config.voice.stop_timeout,
        config.voice.settle_delay,
    ));

    println!("Speaking...");
    let speaker = Arc::clone(&playback);
    let text = text.to_string();
    tokio::task::spawn_blocking(move || speaker.speak(&text)).await??;

    while playback.is_playing() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Validate the configured API key
async fn check_key(config: &Config) -> anyhow::Result<()> {
    let network = Arc::new(NetworkStatus::new(false));
    let http = reqwest::Client::new();
    if !network
        .probe(&http, &config.network.probe_url, config.network.probe_timeout)
        .await
    {
        anyhow::bail!("network not connected");
    }

    let gemini = GeminiClient::new(config.settings.api_key(), config.assistant.clone(), network)?;
    gemini.validate_key().await?;

    println!("API key accepted for model {}", config.assistant.model);
    Ok(())
}
