//! Local model weight cache
//!
//! Resolves the XDG-compliant cache directory where exported model files
//! live and answers "are this model's weights present locally". Download
//! and checksum handling are deliberately outside this crate; callers
//! place files here themselves.

use crate::error::{InpaintError, Result};
use std::path::PathBuf;

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "HD_INPAINT_CACHE_DIR";

/// Weight cache rooted at an XDG-compliant directory
///
/// - Linux/macOS: `~/.cache/hd-inpaint/models/`
/// - Windows: `%LOCALAPPDATA%/hd-inpaint/models/`
#[derive(Debug, Clone)]
pub struct WeightCache {
    cache_dir: PathBuf,
}

impl WeightCache {
    /// Resolve the cache directory, honoring [`CACHE_DIR_ENV`]
    pub fn new() -> Result<Self> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(Self {
                cache_dir: PathBuf::from(cache_override).join("models"),
            });
        }

        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| {
                InpaintError::invalid_config(format!(
                    "failed to determine cache directory; set {CACHE_DIR_ENV}"
                ))
            })?
            .join("hd-inpaint")
            .join("models");
        Ok(Self { cache_dir })
    }

    /// Cache rooted at an explicit directory, mainly for tests
    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self {
            cache_dir: root.join("models"),
        }
    }

    /// Root directory models are looked up in
    #[must_use]
    pub fn cache_dir(&self) -> &std::path::Path {
        &self.cache_dir
    }

    /// Path a model file is expected at
    #[must_use]
    pub fn model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{model_id}.onnx"))
    }

    /// Whether a model's weights are present and non-empty
    #[must_use]
    pub fn is_model_present(&self, model_id: &str) -> bool {
        self.model_path(model_id)
            .metadata()
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Model IDs of every weight file found in the cache
    pub fn scan(&self) -> Result<Vec<String>> {
        let mut models = Vec::new();
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(models),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("onnx") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    models.push(stem.to_string());
                }
            }
        }
        models.sort();
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_model_presence() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::at(dir.path().to_path_buf());
        assert!(!cache.is_model_present("lama"));

        fs::create_dir_all(cache.cache_dir()).unwrap();
        fs::write(cache.model_path("lama"), b"onnx bytes").unwrap();
        assert!(cache.is_model_present("lama"));
    }

    #[test]
    fn test_empty_file_not_present() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::at(dir.path().to_path_buf());
        fs::create_dir_all(cache.cache_dir()).unwrap();
        fs::write(cache.model_path("truncated"), b"").unwrap();
        assert!(!cache.is_model_present("truncated"));
    }

    #[test]
    fn test_scan_lists_models_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::at(dir.path().to_path_buf());
        assert_eq!(cache.scan().unwrap(), Vec::<String>::new());

        fs::create_dir_all(cache.cache_dir()).unwrap();
        fs::write(cache.model_path("zits"), b"z").unwrap();
        fs::write(cache.model_path("lama"), b"l").unwrap();
        fs::write(cache.cache_dir().join("notes.txt"), b"ignored").unwrap();
        assert_eq!(cache.scan().unwrap(), vec!["lama", "zits"]);
    }
}
