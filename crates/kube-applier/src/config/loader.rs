use std::collections::HashSet;
use std::path::{Component, Path};

use crate::config::schema::{Settings, DIFF_URL_PLACEHOLDER};
use crate::error::ConfigError;

/// Loads settings from a YAML or JSON file (chosen by extension).
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        let settings: Settings = serde_json::from_str(&content)?;
        validate_settings(&settings)?;
        Ok(settings)
    } else {
        load_settings_from_str(&content)
    }
}

/// Parses and validates YAML settings. JSON is valid YAML, so this accepts both.
pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_yaml::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.repo_path.trim().is_empty() {
        return Err(validation("repo_path must not be empty"));
    }

    for (name, value) in [
        ("git_poll_interval_secs", settings.git_poll_interval_secs),
        ("default_poll_interval_secs", settings.default_poll_interval_secs),
        ("scheduler_tick_ms", settings.scheduler_tick_ms),
        ("exec_timeout_secs", settings.exec_timeout_secs),
    ] {
        if value == 0 {
            return Err(validation(&format!("{} must be greater than 0", name)));
        }
    }

    if settings.retry.max_attempts == 0 {
        return Err(validation("retry.max_attempts must be at least 1"));
    }
    if settings.retry.base_delay_ms > settings.retry.max_delay_ms {
        return Err(validation(
            "retry.base_delay_ms must not exceed retry.max_delay_ms",
        ));
    }

    if !settings.diff_url_format.is_empty()
        && settings.diff_url_format.matches(DIFF_URL_PLACEHOLDER).count() != 1
    {
        return Err(validation(&format!(
            "diff_url_format must contain exactly one '{}' placeholder",
            DIFF_URL_PLACEHOLDER
        )));
    }

    if settings.history_size == 0 {
        return Err(validation("history_size must be at least 1"));
    }

    validate_patterns(&settings.file_blacklist)?;

    let mut namespaces = HashSet::new();
    for target in &settings.targets {
        if target.namespace.trim().is_empty() {
            return Err(validation("target namespace must not be empty"));
        }
        if !namespaces.insert(target.namespace.as_str()) {
            return Err(ConfigError::InvalidTarget {
                namespace: target.namespace.clone(),
                reason: "Duplicate namespace".to_string(),
            });
        }
        if !is_relative_subpath(target.subpath()) {
            return Err(ConfigError::InvalidTarget {
                namespace: target.namespace.clone(),
                reason: format!(
                    "subpath '{}' must be relative and stay inside the repository",
                    target.subpath()
                ),
            });
        }
        if target.poll_interval_secs == Some(0) {
            return Err(ConfigError::InvalidTarget {
                namespace: target.namespace.clone(),
                reason: "poll_interval_secs must be greater than 0".to_string(),
            });
        }
        validate_patterns(&target.file_blacklist)?;
    }

    Ok(())
}

fn validate_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }
    Ok(())
}

fn is_relative_subpath(subpath: &str) -> bool {
    Path::new(subpath)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn validation(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}
