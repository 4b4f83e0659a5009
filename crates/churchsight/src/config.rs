use churchsight_core::tracker::DEFAULT_MAX_CAPTURES;
use churchsight_core::types::DEFAULT_TOLERANCE;
use churchsight_core::TrackerConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root holding `known_faces/`, `unknown_faces/` and `logs/` (default: current directory).
    pub data_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a positive match.
    pub tolerance: f32,
    /// Interval between capture ticks.
    pub tick: Duration,
    /// Images saved per unknown face before it is ignored.
    pub max_captures: u32,
}

impl Config {
    /// Load configuration from `CHURCHSIGHT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("CHURCHSIGHT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| churchsight_core::default_model_dir());

        Self {
            data_dir: std::env::var("CHURCHSIGHT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            camera_device: std::env::var("CHURCHSIGHT_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            tolerance: env_parse("CHURCHSIGHT_TOLERANCE", DEFAULT_TOLERANCE),
            tick: Duration::from_millis(env_parse("CHURCHSIGHT_TICK_MS", 30u64).max(1)),
            max_captures: env_parse("CHURCHSIGHT_MAX_CAPTURES", DEFAULT_MAX_CAPTURES),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            tolerance: self.tolerance,
            max_captures_per_sighting: self.max_captures,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
