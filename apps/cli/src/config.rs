//! Settings file and store construction

use anyhow::{Context, Result};
use bferry_core::{FsStore, HttpStore, ObjectStore};
use bferry_types::{Settings, StoreSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Location of the settings file
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .map(|d| d.join("bferry").join("settings.json"))
            .unwrap_or_else(|| PathBuf::from(".bferry/settings.json")),
    }
}

/// Load settings, falling back to defaults when the file doesn't exist
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Ok(Settings::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid settings file {}", path.display()))
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}

/// Store selection given on the command line
#[derive(Debug, Default)]
pub struct Overrides {
    pub store_root: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub token: Option<String>,
}

pub fn apply_overrides(settings: &mut Settings, overrides: Overrides) {
    let current_bucket = match settings.store {
        StoreSettings::Fs { ref bucket, .. } | StoreSettings::Http { ref bucket, .. } => {
            bucket.clone()
        }
    };
    let bucket = overrides.bucket.unwrap_or(current_bucket);

    if let Some(endpoint) = overrides.endpoint {
        let token = match settings.store {
            StoreSettings::Http { ref token, .. } => token.clone(),
            StoreSettings::Fs { .. } => None,
        };
        settings.store = StoreSettings::Http {
            endpoint,
            bucket,
            token: overrides.token.or(token),
        };
        return;
    }

    if let Some(root) = overrides.store_root {
        settings.store = StoreSettings::Fs { bucket, root };
        return;
    }

    match settings.store {
        StoreSettings::Fs {
            bucket: ref mut b, ..
        } => *b = bucket,
        StoreSettings::Http {
            bucket: ref mut b,
            ref mut token,
            ..
        } => {
            *b = bucket;
            if overrides.token.is_some() {
                *token = overrides.token;
            }
        }
    }
}

pub async fn build_store(settings: &StoreSettings) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match settings {
        StoreSettings::Fs { bucket, root } => {
            debug!("Using directory bucket {} at {:?}", bucket, root);
            Arc::new(FsStore::new(bucket.clone(), root.clone()).await?)
        }
        StoreSettings::Http {
            endpoint,
            bucket,
            token,
        } => {
            debug!("Using bucket {} at {}", bucket, endpoint);
            let mut store = HttpStore::new(endpoint, bucket.clone())?;
            if let Some(token) = token {
                store = store.with_token(token.clone());
            }
            Arc::new(store)
        }
    };
    Ok(store)
}
