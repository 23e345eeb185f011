//! Icon cache configuration.
//!
//! Populated from the `[icons]` section of the service settings.

use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_CACHE_DIR: &str = "icons";
const DEFAULT_FALLBACK_IMAGE: &str = "img/NoImage.jpg";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IconCacheConfig {
    /// Directory holding one blob file per user.
    pub cache_dir: PathBuf,
    /// Image served when a user never uploaded an icon.
    pub fallback_image: PathBuf,
}

impl Default for IconCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            fallback_image: PathBuf::from(DEFAULT_FALLBACK_IMAGE),
        }
    }
}

impl From<&crate::config::IconSettings> for IconCacheConfig {
    fn from(settings: &crate::config::IconSettings) -> Self {
        Self {
            cache_dir: settings.cache_dir.clone(),
            fallback_image: settings.fallback_image.clone(),
        }
    }
}
