use anyhow::{Context, Result};
use churchsight_core::{FaceStore, Journal, OnnxFaceEncoder, SightingTracker};
use churchsight_hw::{Camera, FrameSource, ImageDirSource};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod watch;

use config::Config;

#[derive(Parser)]
#[command(name = "churchsight", about = "Webcam face sighting tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames and sort faces into known and unknown
    Watch {
        /// Replay image files from this directory instead of the camera
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Stop after this many processed frames
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// File every pending unknown face image under a person's name
    Label {
        /// Person name (becomes known_faces/<NAME>)
        name: String,
    },
    /// List known identities
    Known {
        /// Print names and reference embeddings as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored face images
    Library,
    /// Print today's journal
    Log,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(?config, "configuration");

    match cli.command {
        Commands::Watch { replay, max_frames } => {
            let mut encoder = load_encoder(&config)?;
            let mut tracker = SightingTracker::new(&config.data_dir, config.tracker_config());
            tracker.load_known_identities(&mut encoder)?;

            let mut source: Box<dyn FrameSource> = match replay {
                Some(dir) => Box::new(
                    ImageDirSource::open(&dir)
                        .with_context(|| format!("opening replay directory {}", dir.display()))?,
                ),
                None => Box::new(Camera::open(&config.camera_device)?),
            };

            let options = watch::WatchOptions {
                tick: config.tick,
                max_frames,
            };
            watch::run(&mut tracker, &mut encoder, source.as_mut(), options).await?;
        }
        Commands::Label { name } => {
            let mut encoder = load_encoder(&config)?;
            let mut tracker = SightingTracker::new(&config.data_dir, config.tracker_config());
            let moved = tracker.label_unknowns_as(&name, &mut encoder)?;
            println!("labeled {moved} image(s) as {:?}", name.trim());
            println!("{} known identities", tracker.known().len());
        }
        Commands::Known { json } => {
            let mut encoder = load_encoder(&config)?;
            let mut tracker = SightingTracker::new(&config.data_dir, config.tracker_config());
            tracker.load_known_identities(&mut encoder)?;

            if json {
                println!("{}", serde_json::to_string_pretty(tracker.known())?);
            } else if tracker.known().is_empty() {
                println!("No known identities");
            } else {
                for name in tracker.known_names() {
                    println!("{name}");
                }
            }
        }
        Commands::Library => {
            for path in FaceStore::new(&config.data_dir).library()? {
                println!("{}", path.display());
            }
        }
        Commands::Log => {
            print!("{}", Journal::in_root(&config.data_dir).read_today()?);
        }
    }

    Ok(())
}

fn load_encoder(config: &Config) -> Result<OnnxFaceEncoder> {
    OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))
}
