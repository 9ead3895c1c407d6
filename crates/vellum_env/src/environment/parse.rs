//! Parse and format callbacks shared by the typed descriptors.

use std::path::PathBuf;

use tracing::Level;

use super::value::{EnvVarFormatError, EnvVarParseError};

/// Presence-style flag: empty means off, anything but an explicit negative means on.
pub(crate) fn parse_truthy_flag(value: &str) -> Result<bool, EnvVarParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }
    Ok(!matches!(trimmed.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
}

/// Strict boolean: only the recognised spellings are accepted.
pub(crate) fn parse_bool(value: &str) -> Result<bool, EnvVarParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EnvVarParseError::new("value is not a recognised boolean")),
    }
}

pub(crate) fn format_bool(value: &bool) -> Result<String, EnvVarFormatError> {
    Ok(value.to_string())
}

pub(crate) fn parse_usize(value: &str) -> Result<usize, EnvVarParseError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| EnvVarParseError::new("value is not a valid usize"))
}

pub(crate) fn format_usize(value: &usize) -> Result<String, EnvVarFormatError> {
    Ok(value.to_string())
}

pub(crate) fn parse_u64(value: &str) -> Result<u64, EnvVarParseError> {
    value.trim().parse::<u64>().map_err(|_| EnvVarParseError::new("value is not a valid u64"))
}

pub(crate) fn format_u64(value: &u64) -> Result<String, EnvVarFormatError> {
    Ok(value.to_string())
}

pub(crate) fn parse_string(value: &str) -> Result<String, EnvVarParseError> {
    Ok(value.to_string())
}

// Signature must match `FormatFn<String>`.
#[allow(clippy::ptr_arg)]
pub(crate) fn format_string(value: &String) -> Result<String, EnvVarFormatError> {
    Ok(value.clone())
}

pub(crate) fn parse_path(value: &str) -> Result<PathBuf, EnvVarParseError> {
    if value.trim().is_empty() {
        return Err(EnvVarParseError::new("path must not be empty"));
    }
    Ok(PathBuf::from(value))
}

pub(crate) fn format_path(path: &PathBuf) -> Result<String, EnvVarFormatError> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| EnvVarFormatError::new("path is not valid UTF-8"))
}

pub(crate) fn parse_log_level(value: &str) -> Result<Level, EnvVarParseError> {
    value.trim().parse::<Level>().map_err(|_| EnvVarParseError::new("invalid tracing level"))
}

pub(crate) fn format_level(level: &Level) -> Result<String, EnvVarFormatError> {
    Ok(level.to_string())
}

pub(crate) fn parse_backend(value: &str) -> Result<String, EnvVarParseError> {
    let lowered = value.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "host" | "metal" | "auto" => Ok(lowered),
        _ => Err(EnvVarParseError::new("expected one of: host, metal, auto")),
    }
}

#[cfg(test)]
#[path = "parse.test.rs"]
mod tests;
