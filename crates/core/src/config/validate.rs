use super::{types::Config, ConfigError};
use crate::instance::InstanceMode;

/// Validate configuration
/// Currently validates:
/// - Timeouts are not 0
/// - Queue size is not 0
/// - Instance URLs use http(s), and custom mode has a URL
/// - ImageMagick quality is at most 100
/// - The download name template is not empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let timeouts = [
        ("instance.probe_timeout_secs", config.instance.probe_timeout_secs),
        ("remote.request_timeout_secs", config.remote.request_timeout_secs),
        ("engines.readiness_timeout_secs", config.engines.readiness_timeout_secs),
        ("engines.handshake_timeout_secs", config.engines.handshake_timeout_secs),
        ("engines.load_timeout_secs", config.engines.load_timeout_secs),
        ("engines.conversion_timeout_secs", config.engines.conversion_timeout_secs),
    ];
    for (key, value) in timeouts {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{} cannot be 0", key)));
        }
    }

    if config.orchestrator.max_parallel == Some(0) {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_parallel cannot be 0".to_string(),
        ));
    }

    let custom_url = config.instance.custom_url.trim();
    if custom_url.is_empty() {
        if config.instance.mode == Some(InstanceMode::Custom) {
            return Err(ConfigError::ValidationError(
                "instance.custom_url is required in custom mode".to_string(),
            ));
        }
    } else {
        check_url("instance.custom_url", custom_url)?;
    }
    for endpoint in &config.instance.endpoints {
        check_url(&format!("instance.endpoints.{}", endpoint.name), &endpoint.base_url)?;
    }

    if config.engines.magick_quality > 100 {
        return Err(ConfigError::ValidationError(
            "engines.magick_quality must be between 0 and 100".to_string(),
        ));
    }

    if config.orchestrator.filename_format.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "orchestrator.filename_format cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn check_url(key: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{} must be an http(s) URL, got {}",
            key, url
        )))
    }
}
