//! Configuration module for the live reception client
//!
//! Configuration is read from .env files, environment variables and an optional YAML file.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use live_reception::config::AppConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = AppConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config = AppConfig::from_file(&PathBuf::from("config.yaml"))?;
//! println!("Model: {}", config.model);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod merge;
mod validation;
mod yaml;

pub use validation::{MAX_FRAME_SIZE, MIN_FRAME_SIZE};
pub use yaml::YamlConfig;

/// Samples per capture frame.
pub const DEFAULT_FRAME_SIZE: usize = 2048;
/// Frames buffered between the capture device and the encoder.
pub const DEFAULT_CAPTURE_QUEUE_CAPACITY: usize = 32;
/// Messages buffered between the session and the WebSocket writer.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Receptionist persona sent as the system instruction.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = include_str!("../../assets/system_instruction.it.txt");

/// Client configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Gemini API key. Absence is reported when a session starts, not at load time.
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub live_url: String,
    pub system_instruction: String,

    /// Samples per capture frame at 16 kHz
    pub frame_size: usize,
    pub capture_queue_capacity: usize,
    pub outbound_queue_capacity: usize,

    /// Capture device name; system default when unset
    pub input_device: Option<String>,
    /// Playback device name; system default when unset
    pub output_device: Option<String>,
}

impl Drop for AppConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to environment variables
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded into the process environment by main before this runs
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_frame_size(self.frame_size)?;
        validation::validate_capacity("CAPTURE_QUEUE_CAPACITY", self.capture_queue_capacity)?;
        validation::validate_capacity("OUTBOUND_QUEUE_CAPACITY", self.outbound_queue_capacity)?;
        validation::validate_live_url(&self.live_url)?;
        Ok(())
    }

    /// Whether a non-empty API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}
