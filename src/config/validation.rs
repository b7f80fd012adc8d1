use url::Url;

/// Smallest capture frame accepted.
pub const MIN_FRAME_SIZE: usize = 256;
/// Largest capture frame accepted.
pub const MAX_FRAME_SIZE: usize = 16384;

/// Validate the capture frame size.
///
/// Frames must be a power of two between [`MIN_FRAME_SIZE`] and [`MAX_FRAME_SIZE`].
pub fn validate_frame_size(frame_size: usize) -> Result<(), Box<dyn std::error::Error>> {
    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&frame_size) || !frame_size.is_power_of_two() {
        return Err(format!(
            "Invalid capture frame size {frame_size}: must be a power of two between {MIN_FRAME_SIZE} and {MAX_FRAME_SIZE}"
        )
        .into());
    }
    Ok(())
}

/// Validate a queue capacity.
pub fn validate_capacity(name: &str, capacity: usize) -> Result<(), Box<dyn std::error::Error>> {
    if capacity == 0 {
        return Err(format!("{name} must be greater than zero").into());
    }
    Ok(())
}

/// Validate the live service endpoint.
pub fn validate_live_url(live_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(live_url).map_err(|e| format!("Invalid live URL '{live_url}': {e}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!("Invalid live URL scheme '{other}': expected ws or wss").into()),
    }
}
