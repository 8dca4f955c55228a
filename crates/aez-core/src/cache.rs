//! Persisted run state: sample coordinates, the trained model and the
//! cross-validation summary, each in its own file under the cache directory.
//!
//! Reads never fail. A missing entry is a miss; an unreadable or corrupt one
//! is logged and treated as a miss so the caller recomputes it.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub const SAMPLES_KEY: &str = "selected.json";
pub const MODEL_KEY: &str = "classifier.json";
pub const CV_KEY: &str = "cross_validation.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCache {
    dir: PathBuf,
}

impl RunCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn read(&self, key: &str) -> Option<String> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache miss: {}", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn load_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let text = self.read(key)?;
        match serde_json::from_str(&text) {
            Ok(value) => {
                debug!("Cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", self.path(key).display(), e);
                None
            }
        }
    }

    pub fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), serde_json::to_string(value)?)?;
        Ok(())
    }

    pub fn load_text(&self, key: &str) -> Option<String> {
        self.read(key).filter(|t| !t.trim().is_empty())
    }

    pub fn store_text(&self, key: &str, text: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::{PixelCoord, SampleSet};

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path().join("nested/.cache"));
        let samples = SampleSet::new(vec![PixelCoord::new(3, 1), PixelCoord::new(0, 2)]);
        cache.store(SAMPLES_KEY, &samples).unwrap();
        assert_eq!(cache.load_cached::<SampleSet>(SAMPLES_KEY), Some(samples));
    }

    #[test]
    fn missing_and_corrupt_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path());
        assert_eq!(cache.load_cached::<SampleSet>(SAMPLES_KEY), None);

        fs::write(cache.path(SAMPLES_KEY), "{ not json").unwrap();
        assert_eq!(cache.load_cached::<SampleSet>(SAMPLES_KEY), None);
    }

    #[test]
    fn text_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RunCache::new(dir.path());
        assert_eq!(cache.load_text(CV_KEY), None);
        cache.store_text(CV_KEY, "5-fold Cross Validation Accuracy: 80.00 (+/- 8.00)").unwrap();
        assert!(cache.load_text(CV_KEY).unwrap().starts_with("5-fold"));
    }
}
