#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::security::DEFAULT_ADMINS_FILE;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORTFOLIO_PORT: u16 = 8080;
pub const DEFAULT_PORTFOLIO_HOST: &str = "127.0.0.1";
pub const DEFAULT_RATINGS_API_BASE: &str = "https://youtube-channel-data-api-ecru.vercel.app";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 15;

/// Everything the server needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    pub admins_file: PathBuf,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// Optional so the public read-only routes keep working without a key.
    pub youtube_api_key: Option<String>,
    pub ratings_api_base: String,
    pub upstream_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admins_file: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let lookup = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| lookup_value(key, file_vars, &env_lookup))
    };

    let supabase_url = lookup(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"])
        .ok_or_else(|| anyhow!("SUPABASE_URL not set"))?;
    let supabase_anon_key = lookup(&["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"])
        .ok_or_else(|| anyhow!("SUPABASE_ANON_KEY not set"))?;
    let port = overrides
        .port
        .or_else(|| lookup(&["PORTFOLIO_PORT"]).and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORTFOLIO_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup(&["PORTFOLIO_HOST"]))
        .unwrap_or_else(|| DEFAULT_PORTFOLIO_HOST.to_string());
    let admins_file = overrides
        .admins_file
        .or_else(|| lookup(&["ADMINS_FILE"]).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ADMINS_FILE));
    let ratings_api_base = lookup(&["API_BASE", "NEXT_PUBLIC_API_BASE"])
        .unwrap_or_else(|| DEFAULT_RATINGS_API_BASE.to_string());
    let upstream_timeout = lookup(&["UPSTREAM_TIMEOUT_SECS"])
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);

    Ok(RuntimeSettings {
        host,
        port,
        admins_file,
        supabase_url: supabase_url.trim_end_matches('/').to_string(),
        supabase_anon_key,
        youtube_api_key: lookup(&["YOUTUBE_API_KEY"]),
        ratings_api_base: ratings_api_base.trim_end_matches('/').to_string(),
        upstream_timeout: Duration::from_secs(upstream_timeout),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

// Blank values count as unset so `KEY=""` in a .env file does not shadow
// the defaults.
fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
