//! Config Handler.

use serde::{Deserialize, Serialize};

/// Provides TOML config file handling.
pub mod toml {

    use super::DEFAULT_CONFIG;
    use crate::module::define;
    use crate::module::error::ViewerError;
    use std::fs::File;
    use std::io::prelude::*;
    use std::path::Path;

    /// Loads a configuration file from the given directory.
    /// If not found, generates a default config file.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file is located or should be created.
    ///
    pub fn load(dir: &str) -> Result<super::Config, ViewerError> {
        // Check if the config file exists
        let path = Path::new(dir).join(define::path::CONF_FILE);

        if !path.is_file() {
            // Create the default config if it doesn't exist
            let config: super::Config = toml::from_str(DEFAULT_CONFIG)?;
            save(dir, &config)?;
            log::info!("Default config written to {:?}", path);
        }

        // Load the config
        let conf_str: String = std::fs::read_to_string(&path)?;
        let conf: super::Config = toml::from_str(&conf_str)?;
        Ok(conf)
    }

    /// Saves a configuration file to the given directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file should be saved.
    /// * `conf` - The configuration data to be saved.
    ///
    pub fn save(dir: &str, conf: &super::Config) -> Result<(), ViewerError> {
        let toml_str = toml::to_string(conf)?;
        let path = crate::module::util::path::join(&[dir, define::path::CONF_FILE]);
        let mut file = File::create(path)?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }
}

/// Represents the configuration data structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub system: System,
    pub camera: Camera,
    pub vision: Vision,
    pub speech: Speech,
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default is part of the binary and always parses.
        ::toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| panic!("Broken default config: {e}"))
    }
}

/// Represents system-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct System {
    pub lang: String,
    pub log_level: String,
}

/// Represents camera-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Camera {
    pub device: String,
    pub facing: String,
    pub switch_policy: String,
    pub width: u16,
    pub height: u16,
    pub fps: u8,
    pub grab_times: u8,
}

/// Represents vision-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Vision {
    pub model: String,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub intra_threads: i16,
    pub refresh_hz: u32,
    pub label_font: String,
    pub label_size: f32,
    pub save_annotated: bool,
}

/// Represents speech-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Speech {
    pub engine: String,
    pub lang: String,
    pub cooldown_ms: u64,
}

// Default configuration data in TOML format
const DEFAULT_CONFIG: &str = r#"
[system]
  lang = 'en' # Language setting
  log_level = 'INFO' # Log level ('DEBUG', 'INFO', 'WARN', 'ERROR')

[camera]
  device = '' # Device id to open first ('' selects the first enumerated camera)
  facing = 'user' # Initial facing mode for toggle_facing ('user', 'environment')
  switch_policy = 'cycle_device' # Switch camera policy ('cycle_device', 'toggle_facing')
  width = 640 # Image width
  height = 480 # Image height
  fps = 30 # Capture rate
  grab_times = 1 # Number of grabs per frame, the last one is used

[vision]
  model = 'asset/model/yolov8n_coco_640_640.onnx' # COCO detection model
  input_size = 640 # Model input resolution
  confidence_threshold = 0.5 # Minimum score to draw and announce
  iou_threshold = 0.7 # Same-class boxes overlapping this much are merged
  intra_threads = 4 # Inference threads
  refresh_hz = 30 # Detection loop rate
  label_font = 'asset/font/DejaVuSans.ttf' # Label font
  label_size = 16.0 # Label font size in pixels
  save_annotated = false # Write the annotated frame to the ephemeral dir

[speech]
  engine = 'soloud' # Speech engine ('soloud', 'espeak')
  lang = 'en-us' # Voice for espeak
  cooldown_ms = 5000 # A phrase is not repeated within this window
"#;
