#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_REGION: &str = "us";
/// Largest page the catalog API accepts; also the id batch size.
pub const DEFAULT_MAX_RESULTS: u32 = 50;

const CACHE_SUBDIR: &str = "youtube";
const RECORD_DB_FILE: &str = "cache.sqlite";
const CATEGORY_FILE: &str = "category_data.json";
const CHANNEL_REF_FILE: &str = "channel_data.json";

/// Everything the cache needs to know about its environment.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub profile_dir: PathBuf,
    pub api_key: String,
    pub api_base: String,
    pub region: String,
    pub max_results: u32,
    /// Raw integer settings, e.g. `video_quality`, keyed without the
    /// `CATALOG_` prefix and lowercased.
    pub integers: HashMap<String, String>,
}

impl CatalogSettings {
    pub fn cache_dir(&self) -> PathBuf {
        self.profile_dir.join(CACHE_SUBDIR)
    }

    pub fn record_db_path(&self) -> PathBuf {
        self.cache_dir().join(RECORD_DB_FILE)
    }

    pub fn category_path(&self) -> PathBuf {
        self.cache_dir().join(CATEGORY_FILE)
    }

    pub fn channel_ref_path(&self) -> PathBuf {
        self.cache_dir().join(CHANNEL_REF_FILE)
    }

    /// Looks up a named integer setting. Fails when the setting is not
    /// available or is not a number.
    pub fn setting_int(&self, name: &str) -> Result<i64> {
        let raw = self
            .integers
            .get(name)
            .ok_or_else(|| anyhow!("setting `{name}` is not available"))?;
        raw.trim()
            .parse::<i64>()
            .with_context(|| format!("setting `{name}` is not an integer: {raw}"))
    }

    /// HD flagging stays on unless the quality setting says otherwise. A
    /// missing or unreadable setting keeps the default.
    pub fn hd_enabled(&self) -> bool {
        match self.setting_int("video_quality") {
            Ok(quality) => quality != 0,
            Err(err) => {
                tracing::debug!("falling back to HD enabled: {err:#}");
                true
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub profile_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub region: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<CatalogSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<CatalogSettings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<CatalogSettings> {
    let profile_dir = overrides
        .profile_dir
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("CATALOG_PROFILE_DIR", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("CATALOG_PROFILE_DIR not set"))?;
    let api_key = non_blank(overrides.api_key)
        .or_else(|| lookup_value("CATALOG_API_KEY", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("CATALOG_API_KEY not set"))?;
    let api_base = lookup_value("CATALOG_API_BASE", file_vars, &env_lookup)
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let region = non_blank(overrides.region)
        .or_else(|| lookup_value("CATALOG_REGION", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let max_results = lookup_value("CATALOG_MAX_RESULTS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| (1..=DEFAULT_MAX_RESULTS).contains(value))
        .unwrap_or(DEFAULT_MAX_RESULTS);

    let mut integers = HashMap::new();
    if let Some(quality) = lookup_value("CATALOG_VIDEO_QUALITY", file_vars, &env_lookup) {
        integers.insert("video_quality".to_string(), quality);
    }

    Ok(CatalogSettings {
        profile_dir: PathBuf::from(profile_dir),
        api_key,
        api_base,
        region,
        max_results,
        integers,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
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
