//! Engine configuration, loaded from TOML or assembled with [`EngineConfigBuilder`].

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{texture::raw::MAX_ALIGNMENT, utils::error::SnnError};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Root folder for debug artifacts
    pub dump_dir: PathBuf,
    pub dump_outputs: bool,
    /// Enables per-stage device timers
    pub profiling: bool,
    /// Default byte alignment handed to `ImageDesc::reset`
    pub image_alignment: u32,
    /// SPIR-V resize shader used when none was compiled into the crate
    pub resize_shader: Option<PathBuf>,
    pub device_index: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("inferenceCoreDump"),
            dump_outputs: false,
            profiling: false,
            image_alignment: 4,
            resize_shader: None,
            device_index: 0,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load configuration from a TOML file. A missing file yields the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, SnnError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;

        log::info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), SnnError> {
        if self.image_alignment == 0 || !self.image_alignment.is_power_of_two() {
            return Err(SnnError::Config(format!(
                "image_alignment must be a power of two, got {}",
                self.image_alignment
            )));
        }
        if self.image_alignment > MAX_ALIGNMENT {
            return Err(SnnError::Config(format!(
                "image_alignment {} exceeds the supported maximum of {}",
                self.image_alignment, MAX_ALIGNMENT
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn dump_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.dump_dir = dir.into();
        self
    }

    pub fn dump_outputs(mut self, enabled: bool) -> Self {
        self.config.dump_outputs = enabled;
        self
    }

    pub fn profiling(mut self, enabled: bool) -> Self {
        self.config.profiling = enabled;
        self
    }

    pub fn image_alignment(mut self, alignment: u32) -> Self {
        self.config.image_alignment = alignment;
        self
    }

    pub fn resize_shader<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.resize_shader = Some(path.into());
        self
    }

    pub fn device_index(mut self, index: usize) -> Self {
        self.config.device_index = index;
        self
    }

    pub fn build(self) -> Result<EngineConfig, SnnError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let config = EngineConfig::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.dump_dir, PathBuf::from("inferenceCoreDump"));
        assert_eq!(config.image_alignment, 4);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: EngineConfig = toml::from_str("profiling = true\ndump_dir = \"out\"").unwrap();
        assert!(config.profiling);
        assert_eq!(config.dump_dir, PathBuf::from("out"));
        assert!(!config.dump_outputs);
        assert_eq!(config.device_index, 0);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let path = std::env::temp_dir().join(format!("snn_bad_config_{}.toml", std::process::id()));
        std::fs::write(&path, "profiling = \"yes please\"").unwrap();
        let err = EngineConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(err, SnnError::Config(_)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn builder_rejects_bad_alignment() {
        assert!(EngineConfig::builder().image_alignment(3).build().is_err());
        assert!(EngineConfig::builder().image_alignment(32).build().is_err());
        let config = EngineConfig::builder()
            .image_alignment(16)
            .dump_outputs(true)
            .build()
            .unwrap();
        assert_eq!(config.image_alignment, 16);
        assert!(config.dump_outputs);
    }
}
