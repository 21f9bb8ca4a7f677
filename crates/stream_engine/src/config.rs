//! Configuration system
//!
//! Serde-backed settings with TOML and RON file support.

use ash::vk;
pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Settings for the streaming and frame-synchronization layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Frames in flight; clamped to 2..=3 at use sites
    pub max_frames_in_flight: usize,
    /// Initial staging buffer size in bytes
    pub staging_size: u64,
    /// Initial vertex arena capacity in vertices
    pub vertex_arena_capacity: u32,
    /// Initial index arena capacity in indices
    pub index_arena_capacity: u32,
    /// Prefer mailbox presentation over FIFO when available
    pub prefer_mailbox: bool,
    /// MSAA sample count (1, 2, 4 or 8)
    pub msaa_samples: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            staging_size: 4 * 1024 * 1024,
            vertex_arena_capacity: 1 << 16,
            index_arena_capacity: 1 << 18,
            prefer_mailbox: true,
            msaa_samples: 1,
        }
    }
}

impl Config for RendererConfig {}

impl RendererConfig {
    /// Frames in flight clamped to the supported 2..=3 range
    pub fn clamped_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight.clamp(2, 3)
    }

    /// MSAA setting as a Vulkan sample count (invalid values fall back to 1)
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        match self.msaa_samples {
            2 => vk::SampleCountFlags::TYPE_2,
            4 => vk::SampleCountFlags::TYPE_4,
            8 => vk::SampleCountFlags::TYPE_8,
            1 => vk::SampleCountFlags::TYPE_1,
            other => {
                log::warn!("Unsupported MSAA sample count {other}, falling back to 1");
                vk::SampleCountFlags::TYPE_1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = RendererConfig::default();
        assert_eq!(config.clamped_frames_in_flight(), 2);
        assert_eq!(config.sample_count(), vk::SampleCountFlags::TYPE_1);
        assert!(config.staging_size > 0);
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        let mut config = RendererConfig::default();
        config.max_frames_in_flight = 0;
        assert_eq!(config.clamped_frames_in_flight(), 2);
        config.max_frames_in_flight = 7;
        assert_eq!(config.clamped_frames_in_flight(), 3);
    }

    #[test]
    fn test_invalid_msaa_falls_back() {
        let mut config = RendererConfig::default();
        config.msaa_samples = 3;
        assert_eq!(config.sample_count(), vk::SampleCountFlags::TYPE_1);
        config.msaa_samples = 4;
        assert_eq!(config.sample_count(), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RendererConfig {
            max_frames_in_flight: 3,
            staging_size: 1024,
            vertex_arena_capacity: 256,
            index_arena_capacity: 512,
            prefer_mailbox: false,
            msaa_samples: 4,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: RendererConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.max_frames_in_flight, 3);
        assert_eq!(parsed.staging_size, 1024);
        assert_eq!(parsed.vertex_arena_capacity, 256);
        assert!(!parsed.prefer_mailbox);
        assert_eq!(parsed.msaa_samples, 4);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: RendererConfig = toml::from_str("max_frames_in_flight = 3").unwrap();
        assert_eq!(parsed.max_frames_in_flight, 3);
        assert_eq!(parsed.staging_size, RendererConfig::default().staging_size);
    }
}
