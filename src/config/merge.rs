use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::yaml::YamlConfig;
use super::{
    AppConfig, DEFAULT_CAPTURE_QUEUE_CAPACITY, DEFAULT_FRAME_SIZE, DEFAULT_OUTBOUND_QUEUE_CAPACITY,
    DEFAULT_SYSTEM_INSTRUCTION,
};
use crate::core::realtime::gemini::{DEFAULT_GEMINI_LIVE_MODEL, GEMINI_LIVE_URL, GeminiVoice};

/// Read a trimmed, non-empty environment variable.
fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("Invalid value for {key}: {raw}").into()),
        None => Ok(None),
    }
}

fn read_instruction(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read system instruction file {}: {e}",
            path.display()
        )
    })?;
    Ok(text.trim().to_string())
}

/// Merge environment variables (base) with optional YAML overrides.
///
/// Priority: YAML > environment (.env already loaded into it) > defaults.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    let service = yaml.service.unwrap_or_default();
    let audio = yaml.audio.unwrap_or_default();
    let queues = yaml.queues.unwrap_or_default();

    let api_key = service
        .api_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| env_string("GEMINI_API_KEY"))
        .or_else(|| env_string("API_KEY"));

    let model = service
        .model
        .or_else(|| env_string("GEMINI_MODEL"))
        .unwrap_or_else(|| DEFAULT_GEMINI_LIVE_MODEL.to_string());

    let voice = service
        .voice
        .or_else(|| env_string("GEMINI_VOICE"))
        .map(|v| GeminiVoice::from_str_or_default(&v).as_str().to_string())
        .unwrap_or_else(|| GeminiVoice::default().as_str().to_string());

    let live_url = service
        .live_url
        .or_else(|| env_string("GEMINI_LIVE_URL"))
        .unwrap_or_else(|| GEMINI_LIVE_URL.to_string());

    let instruction_path = service
        .system_instruction_path
        .or_else(|| env_string("SYSTEM_INSTRUCTION_PATH").map(PathBuf::from));
    let system_instruction = match (service.system_instruction, instruction_path) {
        (Some(text), _) => text,
        (None, Some(path)) => read_instruction(&path)?,
        (None, None) => DEFAULT_SYSTEM_INSTRUCTION.trim().to_string(),
    };

    let frame_size = match audio.frame_size {
        Some(size) => size,
        None => env_parse("CAPTURE_FRAME_SIZE")?.unwrap_or(DEFAULT_FRAME_SIZE),
    };
    let capture_queue_capacity = match queues.capture_capacity {
        Some(capacity) => capacity,
        None => env_parse("CAPTURE_QUEUE_CAPACITY")?.unwrap_or(DEFAULT_CAPTURE_QUEUE_CAPACITY),
    };
    let outbound_queue_capacity = match queues.outbound_capacity {
        Some(capacity) => capacity,
        None => env_parse("OUTBOUND_QUEUE_CAPACITY")?.unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY),
    };

    Ok(AppConfig {
        api_key,
        model,
        voice,
        live_url,
        system_instruction,
        frame_size,
        capture_queue_capacity,
        outbound_queue_capacity,
        input_device: audio.input_device.or_else(|| env_string("AUDIO_INPUT_DEVICE")),
        output_device: audio
            .output_device
            .or_else(|| env_string("AUDIO_OUTPUT_DEVICE")),
    })
}
