use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parlance::audio::{samples_to_wav, AudioSegment, CaptureSession, CpalSink, PlaybackQueue};
use parlance::{App, Config, QueryClient};

/// Parlance - Real-time voice interaction engine
#[derive(Parser)]
#[command(name = "parlance", version, about)]
struct Cli {
    /// Streaming server URL (ws:// or wss://)
    #[arg(long, env = "PARLANCE_SERVER_URL")]
    server: Option<String>,

    /// Text query endpoint URL
    #[arg(long, env = "PARLANCE_QUERY_URL")]
    query_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a one-off text query instead of starting the voice loop
    Query {
        /// Text to send
        text: String,
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
        0 => "info,parlance=info",
        1 => "info,parlance=debug",
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
    let mut config = Config::load()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(query_url) = cli.query_url {
        config.query_url = query_url;
    }
    config.validate()?;
    tracing::debug!(server = %config.server_url, query = %config.query_url, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Query { text } => cmd_query(&config, &text).await,
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    tracing::info!(server = %config.server_url, "starting voice engine");
    let app = App::connect(config).await?;
    app.run().await?;

    Ok(())
}

/// Send a one-off text query and print the response
async fn cmd_query(config: &Config, text: &str) -> anyhow::Result<()> {
    let client = QueryClient::new(config.query_url.clone());
    let started = std::time::Instant::now();
    let payload = client.send(text).await?;
    let elapsed = started.elapsed().as_secs_f64();

    println!("{}", payload.response);
    for link in &payload.links {
        println!("  link: {} -> {}", link.platform, link.url);
    }
    if payload.media_links.is_empty() {
        println!("  No media available.");
    } else {
        for media in &payload.media_links {
            println!("  media: {media}");
        }
    }
    for info in &payload.personal_info {
        println!("  {}: {}", info.kind, info.value);
    }
    println!("Response time: {elapsed:.2} seconds");

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CaptureSession::begin(&config.audio)?;
    println!("Sample rate: {} Hz", config.audio.sample_rate);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        capture.poll(std::time::Instant::now());

        let energy = capture.recent_energy();
        let meter_len = usize::from(energy).min(50);
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        let active = if energy >= config.audio.activity_threshold {
            "active"
        } else {
            "silent"
        };
        println!("[{:2}s] energy: {energy:3} ({active}) | [{meter}]", i + 1);
    }

    capture.abort();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If energy stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let wav = samples_to_wav(&samples, sample_rate)?;
    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    let (notices_tx, mut notices_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut queue = PlaybackQueue::new(CpalSink::new(notices_tx));
    queue.enqueue(AudioSegment(wav))?;
    notices_rx.recv().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
