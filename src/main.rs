use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use vast_interstitial::tracking::{HttpDispatcher, LoggingDispatcher, TrackingDispatcher};
use vast_interstitial::unwrap::{self, WrapperLoader};
use vast_interstitial::{start_session, Config, MediaPlayer, MediaReady, SessionEvent};

/// VAST wrapper-chain resolver and interstitial playback simulator
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a VAST file or URL through its wrapper chain
    Resolve {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Print the resolved ad as JSON
        #[arg(long)]
        json: bool,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Play a VAST ad against a simulated media layer
    Play {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Simulated video length in milliseconds
        #[arg(long, default_value_t = 15_000)]
        length_ms: u64,

        /// Start muted
        #[arg(long)]
        muted: bool,

        /// Log beacons instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

/// A media layer whose position advances with the clock while playing
struct SimulatedPlayer {
    length_ms: u64,
    played: Duration,
    playing_since: Option<Instant>,
}

impl SimulatedPlayer {
    fn new(length_ms: u64) -> Self {
        Self {
            length_ms,
            played: Duration::ZERO,
            playing_since: None,
        }
    }

    fn halt(&mut self) {
        if let Some(since) = self.playing_since.take() {
            self.played += since.elapsed();
        }
    }
}

impl MediaPlayer for SimulatedPlayer {
    fn prepare(&mut self, url: &str) {
        println!("Prepared media {}", url);
    }

    fn play(&mut self) {
        self.playing_since = Some(Instant::now());
    }

    fn pause(&mut self) {
        self.halt();
    }

    fn resume(&mut self) {
        self.play();
    }

    fn set_muted(&mut self, muted: bool) {
        println!("Muted: {}", muted);
    }

    fn current_position_ms(&self) -> u64 {
        let running = self.playing_since.map(|s| s.elapsed()).unwrap_or_default();
        let position = (self.played + running).as_millis() as u64;
        position.min(self.length_ms)
    }

    fn stop(&mut self) {
        self.halt();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Resolve {
            input,
            json,
            pretty,
        } => {
            let content = unwrap::fetch_vast_content(&input, &config.resolver).await?;
            let loader = WrapperLoader::new(config.resolver.clone())?;
            let document = loader.load(&content);
            let resolved = document.resolve().await;

            if json {
                if pretty {
                    println!("{}", serde_json::to_string_pretty(&resolved)?);
                } else {
                    println!("{}", serde_json::to_string(&resolved)?);
                }
            } else if pretty {
                println!("{:#?}", resolved);
            } else {
                println!("{:?}", resolved);
            }
        }
        Commands::Play {
            input,
            length_ms,
            muted,
            dry_run,
        } => {
            let mut player_config = config.player.clone();
            player_config.start_muted |= muted;

            let content = unwrap::fetch_vast_content(&input, &config.resolver).await?;
            let loader = WrapperLoader::new(config.resolver.clone())?;
            let document = Arc::new(loader.load(&content));

            let dispatcher: Arc<dyn TrackingDispatcher> = if dry_run {
                Arc::new(LoggingDispatcher)
            } else {
                Arc::new(HttpDispatcher::new(config.resolver.fetch_timeout())?)
            };

            let (handle, mut events) = start_session(
                document,
                SimulatedPlayer::new(length_ms),
                dispatcher,
                player_config,
            );

            let mut completion_sent = false;
            while let Some(event) = events.recv().await {
                println!("{}", serde_json::to_string(&event)?);
                match event {
                    SessionEvent::MediaResolved { .. } => {
                        handle.media_ready(MediaReady {
                            video_length_ms: Some(length_ms),
                            width: 1280,
                            height: 720,
                        })?;
                    }
                    SessionEvent::Progress { percent_played, .. }
                        if percent_played >= 100.0 && !completion_sent =>
                    {
                        handle.media_completed()?;
                        completion_sent = true;
                    }
                    _ => (),
                }
            }

            let state = handle.join().await?;
            println!("Session ended: {:?}", state);
        }
    }

    Ok(())
}
