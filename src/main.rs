use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use inside_client::audio::{
    AudioCapture, Resampler, SpeakerSink, WIRE_SAMPLE_RATE, calculate_rms, downsample,
    samples_to_wav,
};
use inside_client::auth::generate_user_id;
use inside_client::player::{MediaSink, NullSink};
use inside_client::{
    AuthClient, ClientCredentials, Config, CredentialStore, Session, StoredClient,
    TracingObserver,
};

/// Inside - Voice assistant client for the Inside device protocol
#[derive(Parser)]
#[command(name = "inside", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and handle voice commands (press Enter to talk)
    Run {
        /// Run without microphone or speaker
        #[arg(long, env = "INSIDE_NO_AUDIO")]
        no_audio: bool,
    },
    /// Register client credentials with the server
    Authorize {
        /// Client id
        #[arg(long)]
        id: String,
        /// Client key
        #[arg(long)]
        key: String,
        /// Client secret
        #[arg(long)]
        secret: String,
    },
    /// Unregister the stored client
    Deauthorize,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the capture as a 16 kHz WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,inside_client=info",
        1 => "info,inside_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run { no_audio: false }) {
        Command::Run { no_audio } => run_session(config, no_audio).await,
        Command::Authorize { id, key, secret } => {
            authorize(&config, ClientCredentials::new(id, key, secret)).await
        }
        Command::Deauthorize => deauthorize(&config).await,
        Command::TestMic { duration, output } => test_mic(&config, duration, output).await,
    }
}

/// Configured credentials win; otherwise use the stored registration
fn resolve_credentials(config: &Config) -> anyhow::Result<ClientCredentials> {
    let stored = CredentialStore::in_dir(&config.data_dir).load()?;
    match (config.credentials.clone(), stored) {
        (Some(mut creds), stored) => {
            if creds.uuid.is_none() {
                creds.uuid = stored
                    .filter(|s| s.client.id == creds.id)
                    .and_then(|s| s.client.uuid);
            }
            Ok(creds)
        }
        (None, Some(stored)) => Ok(stored.client),
        (None, None) => bail!("no client credentials; run `inside authorize` first"),
    }
}

#[allow(clippy::future_not_send)]
async fn run_session(config: Config, no_audio: bool) -> anyhow::Result<()> {
    let credentials = resolve_credentials(&config)?;
    tracing::info!(server = %config.server, id = %credentials.id, no_audio, "starting inside client");

    let block_size = config.audio.block_size;
    let (session, handle) = Session::new(
        config,
        credentials,
        Arc::new(TracingObserver),
        move |events| -> Box<dyn MediaSink> {
            if no_audio {
                Box::new(NullSink::new(Some(events)))
            } else {
                Box::new(SpeakerSink::new(events))
            }
        },
    );
    let session_task = tokio::spawn(session.run());
    handle.connect()?;

    // Keep the capture stream alive for the whole session
    let _capture = if no_audio {
        None
    } else {
        let mut capture = AudioCapture::new(block_size)?;
        let resampler = Resampler::to_wire(capture.sample_rate());
        let audio = handle.clone();
        capture.start(move |block| {
            audio.push_audio_frame(resampler.frame(block));
        })?;
        tracing::info!(sample_rate = resampler.source_rate(), "microphone ready");
        Some(capture)
    };

    println!("Press Enter to give a voice command, `c` + Enter to cancel, `q` + Enter to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line?.as_deref().map(str::trim) {
                Some("") => handle.start_voice_command()?,
                Some("c" | "cancel") => handle.cancel_voice_command()?,
                Some("q" | "quit") | None => break,
                Some(other) => println!("unknown input: {other}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("shutting down");
    handle.shutdown()?;
    session_task.await?;
    Ok(())
}

async fn authorize(config: &Config, mut credentials: ClientCredentials) -> anyhow::Result<()> {
    let store = CredentialStore::in_dir(&config.data_dir);
    let user_id = store
        .load()?
        .map_or_else(generate_user_id, |stored| stored.user_id);

    let client = AuthClient::new(&config.server, &config.client_type, &config.device_model);
    let response = client.authorize(&credentials, &user_id).await?;
    if !response.is_success() {
        bail!(
            "authorize rejected (rc {:?}): {}",
            response.rc,
            response.rcmsg.unwrap_or_default()
        );
    }

    credentials.uuid = response.uuid;
    store.save(&StoredClient {
        client: credentials,
        user_id,
    })?;
    println!("Authorized. Credentials saved to {}", store.path().display());
    Ok(())
}

async fn deauthorize(config: &Config) -> anyhow::Result<()> {
    let store = CredentialStore::in_dir(&config.data_dir);
    let stored = store
        .load()?
        .context("no stored client; nothing to deauthorize")?;

    let client = AuthClient::new(&config.server, &config.client_type, &config.device_model);
    let response = client.deauthorize(&stored.client).await?;
    if !response.is_success() {
        bail!(
            "deauthorize rejected (rc {:?}): {}",
            response.rc,
            response.rcmsg.unwrap_or_default()
        );
    }

    store.clear()?;
    println!("Deauthorized {}", stored.client.id);
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let recorded = Arc::new(Mutex::new(Vec::<f32>::new()));
    let latest = Arc::new(Mutex::new(Vec::<f32>::new()));

    let mut capture = AudioCapture::new(config.audio.block_size)?;
    {
        let recorded = Arc::clone(&recorded);
        let latest = Arc::clone(&latest);
        capture.start(move |block| {
            if let Ok(mut buf) = recorded.lock() {
                buf.extend_from_slice(block);
            }
            if let Ok(mut buf) = latest.lock() {
                buf.extend_from_slice(block);
            }
        })?;
    }

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = latest
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();
    println!("---");

    if let Some(path) = output {
        let samples = recorded.lock().map(|buf| buf.clone()).unwrap_or_default();
        let wire = downsample(&samples, sample_rate, WIRE_SAMPLE_RATE);
        std::fs::write(&path, samples_to_wav(&wire, WIRE_SAMPLE_RATE)?)?;
        println!("Saved {} samples to {}", wire.len(), path.display());
    }

    println!("Microphone test complete!");
    Ok(())
}
