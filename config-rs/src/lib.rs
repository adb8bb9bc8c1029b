//! config-rs/lib.rs
//! Environment access shared by every crate of the orchestration engine.
//! Values come from the process environment, optionally seeded from a `.env`
//! file; malformed values fall back to the caller's default with a warning.

use std::env;
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

static DOTENV: Once = Once::new();

/// Loads `.env` from the working directory (or a parent) once per process.
/// A missing file is not an error.
pub fn load_env() {
    DOTENV.call_once(|| match dotenv::dotenv() {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("Failed to load .env file: {}", e),
    });
}

/// Raw, trimmed value of `name`; empty strings count as unset
pub fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses `name` into `T`
///
/// # Returns
/// `None` when unset; `None` with a warning when the value does not parse
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Invalid value {:?} in {}, ignoring", raw, name);
            None
        }
    }
}

/// Parses `name` into `T`, falling back to `default`
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env_parse(name).unwrap_or(default)
}

/// Parses a boolean flag; accepts 1/true/yes/on and 0/false/no/off
pub fn env_flag(name: &str) -> Option<bool> {
    let raw = env_string(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("Invalid boolean {:?} in {}, ignoring", raw, name);
            None
        }
    }
}

/// Comma separated list, blank items dropped
pub fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|raw| {
        raw.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

/// Millisecond duration
pub fn env_duration_ms(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}
