// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a partial file (or no file) still yields a
// usable configuration. Parse errors fall back to defaults; the error is
// handed back to the caller, which reports it once logging is up.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub camera: CameraConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Mesh Renderer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub max_frames_in_flight: usize,
    pub clear_color: [f32; 4],
    /// "counter_clockwise" or "clockwise"
    pub front_face: String,
    pub prefer_mailbox: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            clear_color: [0.6, 0.65, 0.4, 1.0],
            front_face: "counter_clockwise".to_string(),
            prefer_mailbox: true,
        }
    }
}

/// Pre-compiled SPIR-V paths
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vert.spv"),
            fragment: PathBuf::from("shaders/frag.spv"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub eye: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 45.0,
            near: 0.1,
            far: 100.0,
            eye: [0.0, 0.0, 2.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config.toml, falling back to defaults if it is missing or broken
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    /// Defaults plus the load error when `path` cannot be used
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Frames the CPU may run ahead of the GPU; never zero
    pub fn max_frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }

    /// Get front-face winding as Vulkan enum
    pub fn front_face(&self) -> vk::FrontFace {
        match self.graphics.front_face.to_lowercase().as_str() {
            "counter_clockwise" | "ccw" => vk::FrontFace::COUNTER_CLOCKWISE,
            "clockwise" | "cw" => vk::FrontFace::CLOCKWISE,
            other => {
                log::warn!(
                    "Unknown front face '{}', defaulting to COUNTER_CLOCKWISE",
                    other
                );
                vk::FrontFace::COUNTER_CLOCKWISE
            }
        }
    }

    /// Validation is only requested from debug builds
    pub fn enable_validation(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Parsed `debug.log_level`; read before the logger exists, so it
    /// reports failure instead of logging it
    pub fn log_level(&self) -> Result<log::LevelFilter, log::ParseLevelError> {
        self.debug.log_level.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.max_frames_in_flight(), 2);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/vert.spv"));
        assert_eq!(config.front_face(), vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(config.camera.eye, [0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            front_face = "clockwise"

            [camera]
            fov_degrees = 60.0
            "#,
        )
        .unwrap();

        assert_eq!(config.front_face(), vk::FrontFace::CLOCKWISE);
        assert!(config.graphics.prefer_mailbox);
        assert_eq!(config.camera.fov_degrees, 60.0);
        assert_eq!(config.camera.near, 0.1);
    }

    #[test]
    fn test_zero_frames_in_flight_clamped() {
        let config: Config = toml::from_str("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.max_frames_in_flight(), 1);
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            front_face = "sideways"
            [debug]
            log_level = "chatty"
            "#,
        )
        .unwrap();

        assert_eq!(config.front_face(), vk::FrontFace::COUNTER_CLOCKWISE);
        assert!(config.log_level().is_err());
    }

    #[test]
    fn test_log_level_parses() {
        let config: Config = toml::from_str("[debug]\nlog_level = \"debug\"").unwrap();
        assert_eq!(config.log_level().unwrap(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.window.title, "Vulkan Mesh Renderer");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("bad-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[window\nwidth = ").unwrap();
        let result = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_file_falls_back_and_reports() {
        let path = std::env::temp_dir().join(format!("broken-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[graphics]\nmax_frames_in_flight = \"three\"").unwrap();
        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.max_frames_in_flight(), 2);
        let message = format!("{:#}", error.expect("load error is reported"));
        assert!(message.contains("Failed to parse config file"));
    }

    #[test]
    fn test_missing_file_reports_nothing() {
        let (config, error) = Config::load_or_default("does/not/exist.toml");
        assert!(error.is_none());
        assert_eq!(config.window.width, 800);
    }
}
