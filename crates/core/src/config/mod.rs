use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    analysis::AnalysisSettings,
    presets::JsonFileStorage,
    record::{ExportOptions, DEFAULT_BITRATE},
    tier::SubscriptionTier,
    Result, VizError,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AnalysisSettings,
    pub render: RenderConfig,
    pub export: ExportConfig,
    pub presets: PresetConfig,
}

impl AppConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        if self.render.width == 0 || self.render.height == 0 {
            return Err(VizError::invalid("render size must be non-zero"));
        }
        if self.render.target_fps == 0 {
            return Err(VizError::invalid("target fps must be non-zero"));
        }
        if self.export.bitrate == 0 {
            return Err(VizError::invalid("export bitrate must be non-zero"));
        }
        Ok(())
    }

    /// Applies the coarse quality hint from the settings blob.
    pub fn apply_quality(&mut self, hint: QualityHint) {
        self.audio.fft_size = hint.fft_size;
        self.render.target_fps = hint.target_fps;
    }

    /// Export options for a job of `duration_seconds` at the render size.
    pub fn export_options(&self, duration_seconds: u32) -> ExportOptions {
        ExportOptions {
            width: self.render.width,
            height: self.render.height,
            frame_rate: self.render.target_fps,
            duration_seconds,
            bitrate: self.export.bitrate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            target_fps: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub tier: SubscriptionTier,
    pub bitrate: u32,
    pub output_dir: Option<PathBuf>,
    /// `ffmpeg` from `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            tier: SubscriptionTier::default(),
            bitrate: DEFAULT_BITRATE,
            output_dir: None,
            ffmpeg_path: None,
        }
    }
}

impl ExportConfig {
    /// Configured directory, else the current one.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    pub storage_path: Option<PathBuf>,
}

impl PresetConfig {
    /// Configured catalog file, else the per-user data directory.
    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage_path
            .clone()
            .or_else(JsonFileStorage::default_path)
    }
}

/// Coarse rendering quality derived from the settings blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityHint {
    pub fft_size: usize,
    pub target_fps: u32,
}

impl QualityHint {
    pub const LOW: QualityHint = QualityHint {
        fft_size: 512,
        target_fps: 30,
    };
    pub const MEDIUM: QualityHint = QualityHint {
        fft_size: 1024,
        target_fps: 60,
    };
    pub const HIGH: QualityHint = QualityHint {
        fft_size: 2048,
        target_fps: 60,
    };

    /// Reads `qualityPreset` from an opaque settings object. Everything
    /// else in the blob is ignored; anything unrecognised means high.
    pub fn from_settings(settings: &Value) -> Self {
        match settings.get("qualityPreset").and_then(Value::as_str) {
            Some("low") => Self::LOW,
            Some("medium") => Self::MEDIUM,
            _ => Self::HIGH,
        }
    }

    pub fn from_settings_str(settings: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(settings)?;
        Ok(Self::from_settings(&value))
    }
}

impl Default for QualityHint {
    fn default() -> Self {
        Self::HIGH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.audio.fft_size, 2048);
        assert_eq!(config.export.bitrate, 2_500_000);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "export": { "tier": "pro" }, "render": { "width": 640 } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.export.tier, SubscriptionTier::Pro);
        assert_eq!(config.render.width, 640);
        assert_eq!(config.render.height, 720);
        assert_eq!(config.audio, AnalysisSettings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.presets.storage_path = Some(dir.path().join("presets.json"));
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "audio": { "fft_size": 1000 } }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(VizError::InvalidInput(_))));

        let mut config = AppConfig::default();
        config.render.target_fps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn quality_hint_from_settings_blob() {
        let low = json!({ "theme": "dark", "qualityPreset": "low", "showFps": true });
        assert_eq!(QualityHint::from_settings(&low), QualityHint::LOW);
        assert_eq!(
            QualityHint::from_settings(&json!({ "qualityPreset": "medium" })),
            QualityHint::MEDIUM
        );
        assert_eq!(QualityHint::from_settings(&json!({})), QualityHint::HIGH);
        assert_eq!(
            QualityHint::from_settings(&json!({ "qualityPreset": 3 })),
            QualityHint::HIGH
        );

        let mut config = AppConfig::default();
        config.apply_quality(QualityHint::LOW);
        assert_eq!(config.audio.fft_size, 512);
        assert_eq!(config.render.target_fps, 30);
        assert!(config.validate().is_ok());
    }
}
