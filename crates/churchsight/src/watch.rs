//! The capture loop: one frame per timer tick on a single thread, with
//! operator commands read from stdin between ticks.

use anyhow::Result;
use churchsight_core::{FaceEncoder, SightingOutcome, SightingTracker};
use churchsight_hw::FrameSource;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

/// A line typed by the operator while the loop runs.
#[derive(Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    Label(String),
    Known,
    Log,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match verb {
            "label" => Some(Self::Label(rest.trim().to_string())),
            "known" => Some(Self::Known),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

pub struct WatchOptions {
    pub tick: Duration,
    pub max_frames: Option<u64>,
}

pub async fn run(
    tracker: &mut SightingTracker,
    encoder: &mut dyn FaceEncoder,
    source: &mut dyn FrameSource,
    options: WatchOptions,
) -> Result<()> {
    let mut ticker = tokio::time::interval(options.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut processed = 0u64;

    tracing::info!(tick_ms = options.tick.as_millis() as u64, "watching");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if source.is_exhausted() {
                    tracing::info!("frame source exhausted");
                    break;
                }
                let Some(frame) = source.next_frame() else {
                    continue;
                };

                match tracker.process_frame(&frame.image, encoder) {
                    Ok(report) => {
                        let unknown = report
                            .outcomes
                            .iter()
                            .filter(|o| !matches!(o, SightingOutcome::Known { .. }))
                            .count();
                        tracing::debug!(
                            seq = frame.sequence,
                            faces = report.faces,
                            unknown,
                            session_secs = tracker.session_elapsed().as_secs(),
                            "frame processed"
                        );
                    }
                    Err(e) => tracing::warn!(seq = frame.sequence, error = %e, "frame skipped"),
                }

                processed += 1;
                if options.max_frames.is_some_and(|max| processed >= max) {
                    tracing::info!(processed, "frame limit reached");
                    break;
                }
            }
            line = commands.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_command(&line, tracker, encoder),
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin closed");
                        stdin_open = false;
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    tracing::info!(
        processed,
        session_secs = tracker.session_elapsed().as_secs(),
        unknown = tracker.unknown_sightings().len(),
        "watch finished"
    );
    Ok(())
}

fn handle_command(line: &str, tracker: &mut SightingTracker, encoder: &mut dyn FaceEncoder) {
    match OperatorCommand::parse(line) {
        Some(OperatorCommand::Label(name)) => match tracker.label_unknowns_as(&name, encoder) {
            Ok(moved) => println!("labeled {moved} image(s) as {name:?}"),
            Err(e) => tracing::warn!(name, error = %e, "label failed"),
        },
        Some(OperatorCommand::Known) => {
            for name in tracker.known_names() {
                println!("{name}");
            }
        }
        Some(OperatorCommand::Log) => match tracker.journal().read_today() {
            Ok(text) => print!("{text}"),
            Err(e) => tracing::warn!(error = %e, "failed to read journal"),
        },
        None if line.trim().is_empty() => {}
        None => println!("commands: label <name> | known | log"),
    }
}
