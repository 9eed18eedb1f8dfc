//! Harness and review-server options.
//!
//! Resolution order: built-in defaults, then an optional JSON file, then the
//! `VSNAP_SCREENSHOT_PATH` environment variable for the store root. Command-line
//! flags are applied last by the binary.

use crate::compare::{Comparator, MagickComparator, PixelComparator};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SCREENSHOT_PATH_ENV: &str = "VSNAP_SCREENSHOT_PATH";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparatorKind {
    #[default]
    Pixel,
    Magick,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessOptions {
    pub screenshot_path: PathBuf,
    pub good_ext: String,
    pub new_ext: String,
    pub diff_ext: String,
    pub comparator: ComparatorKind,
    pub magick_bin: PathBuf,
    pub magick_timeout_secs: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            screenshot_path: PathBuf::from("tests/visual/screenshots"),
            good_ext: ".good.png".to_string(),
            new_ext: ".new.png".to_string(),
            diff_ext: ".diff.png".to_string(),
            comparator: ComparatorKind::Pixel,
            magick_bin: PathBuf::from("compare"),
            magick_timeout_secs: 60,
        }
    }
}

impl HarnessOptions {
    /// Defaults, overlaid with `path` when given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut options = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        options.apply_env(std::env::var_os(SCREENSHOT_PATH_ENV).map(PathBuf::from));
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            Error::Configuration(format!("cannot read config {}: {err}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn apply_env(&mut self, screenshot_path: Option<PathBuf>) {
        if let Some(root) = screenshot_path.filter(|p| !p.as_os_str().is_empty()) {
            self.screenshot_path = root;
        }
    }

    /// Suffixes must be non-empty and pairwise distinct, or artifacts would
    /// collide on disk.
    pub fn validate(&self) -> Result<()> {
        let exts = [&self.good_ext, &self.new_ext, &self.diff_ext];
        if exts.iter().any(|ext| ext.is_empty()) {
            return Err(Error::Configuration("artifact suffixes must not be empty".to_string()));
        }
        if self.good_ext == self.new_ext
            || self.good_ext == self.diff_ext
            || self.new_ext == self.diff_ext
        {
            return Err(Error::Configuration(format!(
                "artifact suffixes must differ (good={}, new={}, diff={})",
                self.good_ext, self.new_ext, self.diff_ext
            )));
        }
        Ok(())
    }

    pub fn build_comparator(&self) -> Box<dyn Comparator> {
        match self.comparator {
            ComparatorKind::Pixel => Box::new(PixelComparator),
            ComparatorKind::Magick => Box::new(MagickComparator::new(
                self.magick_bin.clone(),
                Duration::from_secs(self.magick_timeout_secs.max(1)),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7995,
        }
    }
}

impl ServerOptions {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vsnap.json");
        fs::write(&path, r#"{"screenshot_path":"shots","comparator":"magick"}"#).unwrap();

        let options = HarnessOptions::from_file(&path).unwrap();
        assert_eq!(options.screenshot_path, PathBuf::from("shots"));
        assert_eq!(options.comparator, ComparatorKind::Magick);
        assert_eq!(options.good_ext, ".good.png");
        assert_eq!(options.magick_timeout_secs, 60);
        assert_eq!(options.build_comparator().name(), "magick");
    }

    #[test]
    fn env_root_overrides_file_root() {
        let mut options = HarnessOptions::default();
        options.apply_env(Some(PathBuf::from("/from/env")));
        assert_eq!(options.screenshot_path, PathBuf::from("/from/env"));
        options.apply_env(Some(PathBuf::new()));
        assert_eq!(options.screenshot_path, PathBuf::from("/from/env"));
    }

    #[test]
    fn colliding_suffixes_are_rejected() {
        let options = HarnessOptions {
            new_ext: ".good.png".to_string(),
            ..HarnessOptions::default()
        };
        assert!(matches!(options.validate(), Err(Error::Configuration(_))));
        assert!(HarnessOptions::default().validate().is_ok());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(HarnessOptions::from_file(&path), Err(Error::Json(_))));
        assert!(matches!(
            HarnessOptions::from_file(&dir.path().join("absent.json")),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn server_defaults() {
        assert_eq!(ServerOptions::default().addr(), "localhost:7995");
    }
}
