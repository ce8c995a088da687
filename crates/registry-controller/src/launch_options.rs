//! JVM launch options carried in the `JAVA_OPTIONS` variable
//!
//! The variable is a whitespace-separated list of `-Dkey=value` (or bare flag)
//! tokens. It is parsed into an ordered map so individual keys can be merged in
//! or removed without disturbing the rest of the user's options.

use indexmap::IndexMap;
use k8s_openapi::api::core::v1::EnvVar;

use crate::env::{EnvCache, EnvCacheEntry};

/// Name of the launch options variable
pub const JAVA_OPTIONS: &str = "JAVA_OPTIONS";

/// Ordered launch options; bare flags map to an empty value
pub type LaunchOptions = IndexMap<String, String>;

/// Parse a launch options string
pub fn parse(raw: &str) -> LaunchOptions {
    raw.split_whitespace()
        .map(|token| match token.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (token.to_string(), String::new()),
        })
        .collect()
}

/// Render launch options back into a single string
pub fn render(options: &LaunchOptions) -> String {
    options
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read launch options from the env cache, falling back to the live variables
///
/// The fallback covers the first tick of an instance, before the live
/// environment has been captured into the cache.
pub fn load(env: &EnvCache, live: Option<&[EnvVar]>) -> LaunchOptions {
    if let Some(entry) = env.get(JAVA_OPTIONS) {
        return parse(entry.value().unwrap_or_default());
    }
    live.and_then(|vars| vars.iter().find(|v| v.name == JAVA_OPTIONS))
        .and_then(|v| v.value.as_deref())
        .map(parse)
        .unwrap_or_default()
}

/// Store launch options into the env cache as an operator-managed variable
pub fn save(env: &mut EnvCache, options: &LaunchOptions) {
    env.set(EnvCacheEntry::managed(JAVA_OPTIONS, render(options)));
}

/// Whether every target key is present with exactly the target value
pub fn contains_all(options: &LaunchOptions, target: &LaunchOptions) -> bool {
    target
        .iter()
        .all(|(key, value)| options.get(key) == Some(value))
}
