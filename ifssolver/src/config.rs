use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};
use crate::feature_extractor::ExtractorParams;
use crate::feature_matcher::MatcherParams;
use crate::ifs_crop::CropParams;

/// Settings of the CPU backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub extractor: ExtractorParams,
    pub matcher: MatcherParams,
}

/// Adapter selection hint for the GPU backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    None,
    Low,
    #[default]
    High,
}

/// Settings of the GPU backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub extractor: ExtractorParams,
    pub matcher: MatcherParams,
    pub power_preference: PowerPreference,
}

impl Default for GpuConfig {
    fn default() -> Self {
        GpuConfig {
            extractor: ExtractorParams::default(),
            matcher: MatcherParams::gpu_default(),
            power_preference: PowerPreference::default(),
        }
    }
}

/// Glyph cell layout of the passcode image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasscodeStyle {
    pub char_size: u32,
    pub border: u32,
}

impl Default for PasscodeStyle {
    fn default() -> Self {
        PasscodeStyle {
            char_size: 80,
            border: 10,
        }
    }
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Contents of the YAML configuration file.
///
/// Only `ifs_image` and `column` are required. Relative paths are taken relative to the
/// directory holding the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub ifs_image: PathBuf,
    /// Number of portal columns in the IFS picture.
    pub column: usize,
    #[serde(default)]
    pub crop: CropParams,
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
    #[serde(default)]
    pub passcode: PasscodeStyle,
}

impl SolverConfig {
    /// Configuration with defaults for everything but the two required fields.
    pub fn new(ifs_image: impl Into<PathBuf>, column: usize) -> SolverConfig {
        SolverConfig {
            temp_dir: default_temp_dir(),
            output_dir: default_output_dir(),
            ifs_image: ifs_image.into(),
            column,
            crop: CropParams::default(),
            cpu: CpuConfig::default(),
            gpu: GpuConfig::default(),
            passcode: PasscodeStyle::default(),
        }
    }

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    /// [`SolverError::MissingInput`] when the file does not exist, YAML errors for malformed
    /// content and [`SolverError::InvalidConfig`] for out of range values.
    pub fn load(path: &Path) -> Result<SolverConfig> {
        if !path.exists() {
            return Err(SolverError::MissingInput(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let mut config = SolverConfig::from_yaml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<SolverConfig> {
        let config: SolverConfig = serde_yml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.column == 0 {
            return Err(SolverError::InvalidConfig("column must be at least 1".to_string()));
        }
        if self.passcode.char_size == 0 {
            return Err(SolverError::InvalidConfig("passcode.char_size must be at least 1".to_string()));
        }
        for (name, params) in [("cpu", &self.cpu.matcher), ("gpu", &self.gpu.matcher)] {
            if !(params.ratio_threshold > 0.0 && params.ratio_threshold <= 1.0) {
                return Err(SolverError::InvalidConfig(format!(
                    "{name}.matcher.ratio_threshold must be in (0, 1], got {}",
                    params.ratio_threshold
                )));
            }
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [&mut self.temp_dir, &mut self.output_dir, &mut self.ifs_image] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Checks that the IFS picture exists and creates the working directories.
    pub fn prepare_and_check(&self) -> Result<()> {
        if !self.ifs_image.exists() {
            return Err(SolverError::MissingInput(self.ifs_image.clone()));
        }
        fs::create_dir_all(self.portal_images_dir())?;
        fs::create_dir_all(self.portal_features_dir())?;
        fs::create_dir_all(self.output_sub_dir())?;
        Ok(())
    }

    pub fn ifs_stem(&self) -> String {
        self.ifs_image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ifs".to_string())
    }

    pub fn portal_images_dir(&self) -> PathBuf {
        self.temp_dir.join("images")
    }

    pub fn portal_features_dir(&self) -> PathBuf {
        self.temp_dir.join("features")
    }

    pub fn output_sub_dir(&self) -> PathBuf {
        self.output_dir.join(self.ifs_stem())
    }

    pub fn metadata_csv(&self) -> PathBuf {
        self.output_sub_dir().join("metadata.csv")
    }

    pub fn split_errors_txt(&self) -> PathBuf {
        self.output_sub_dir().join("split_errors.txt")
    }

    pub fn match_result_csv(&self) -> PathBuf {
        self.output_sub_dir().join("match_result.csv")
    }

    pub fn match_result_png(&self) -> PathBuf {
        self.output_sub_dir().join("match_result.png")
    }

    pub fn passcode_png(&self) -> PathBuf {
        self.output_sub_dir().join("passcode.png")
    }

    pub fn match_state_bin(&self) -> PathBuf {
        self.output_sub_dir().join("match_state.bin")
    }

    /// Where the cropped IFS picture of size `width` x `height` is written.
    pub fn cropped_ifs_png(&self, width: usize, height: usize) -> PathBuf {
        self.output_sub_dir().join(format!("{}_{width}_{height}.png", self.ifs_stem()))
    }
}
