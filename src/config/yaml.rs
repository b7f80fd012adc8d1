use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in the
/// file override the ones read from the environment.
///
/// # Example YAML structure
/// ```yaml
/// service:
///   api_key: "your-gemini-key"
///   model: "gemini-2.5-flash-native-audio-preview-09-2025"
///   voice: "Fenrir"
///   live_url: "wss://generativelanguage.googleapis.com/ws/..."
///   system_instruction_path: "/etc/live-reception/instruction.txt"
///
/// audio:
///   frame_size: 2048
///   input_device: "USB Microphone"
///   output_device: "Speakers"
///
/// queues:
///   capture_capacity: 32
///   outbound_capacity: 256
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlConfig {
    #[serde(default)]
    pub service: Option<ServiceYaml>,
    #[serde(default)]
    pub audio: Option<AudioYaml>,
    #[serde(default)]
    pub queues: Option<QueuesYaml>,
}

/// Remote service settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub live_url: Option<String>,
    /// Inline instruction text. Takes precedence over `system_instruction_path`.
    pub system_instruction: Option<String>,
    pub system_instruction_path: Option<PathBuf>,
}

/// Audio device settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AudioYaml {
    pub frame_size: Option<usize>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// Queue capacities
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueuesYaml {
    pub capture_capacity: Option<usize>,
    pub outbound_capacity: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
