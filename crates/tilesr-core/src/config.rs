//! Engine configuration.
//!
//! [`EngineConfig`] is an immutable value: build it with
//! [`EngineConfig::builder`], load it from JSON with
//! [`EngineConfig::from_json_file`], or derive a variant with the `with_*`
//! methods.  Validation runs before any device work, so an invalid scale
//! never reaches the executor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Environment variable overriding the models directory.
pub const MODELS_DIR_ENV: &str = "TILESR_MODELS_DIR";

/// Models directory used when neither the config nor the environment sets one.
pub const DEFAULT_MODELS_DIR: &str = "models";

/// Largest accepted scale factor.
pub const MAX_SCALE: u32 = 32;

/// Largest accepted prepadding, in source pixels per side.
pub const MAX_PREPADDING: u32 = 1024;

/// Schema version stamped into serialized configs.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

// ─── Scale factor ───────────────────────────────────────────────────────────

/// Spatial upscale factor.  Always a power of two in `1..=MAX_SCALE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ScaleFactor(u32);

impl ScaleFactor {
    pub const X1: Self = Self(1);
    pub const X2: Self = Self(2);
    pub const X4: Self = Self(4);

    pub fn new(scale: u32) -> Result<Self> {
        if scale == 0 || !scale.is_power_of_two() {
            return Err(EngineError::Config(format!(
                "scale should be a power of 2, got {scale}"
            )));
        }
        if scale > MAX_SCALE {
            return Err(EngineError::Config(format!(
                "scale {scale} exceeds the maximum of {MAX_SCALE}"
            )));
        }
        Ok(Self(scale))
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ScaleFactor {
    type Error = EngineError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ScaleFactor> for u32 {
    fn from(value: ScaleFactor) -> Self {
        value.0
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::X4
    }
}

// ─── Tile size ──────────────────────────────────────────────────────────────

/// Tile sizing policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileSize {
    /// Process the whole image as one tile.
    Disabled,
    /// Derive the tile edge from the device heap budget.
    Auto,
    /// Fixed tile edge in input pixels.
    Fixed(u32),
}

impl TileSize {
    /// Binding-style integer form: `0` disables tiling.
    pub const fn from_pixels(pixels: u32) -> Self {
        if pixels == 0 {
            Self::Disabled
        } else {
            Self::Fixed(pixels)
        }
    }

    /// Tile edge for a heap budget, in input pixels.  Thresholds are sized
    /// for a 4x network.
    pub fn for_heap_budget(budget_bytes: usize) -> u32 {
        let mib = budget_bytes / (1024 * 1024);
        match mib {
            m if m > 1900 => 200,
            m if m > 550 => 100,
            m if m > 190 => 64,
            _ => 32,
        }
    }

    /// Concrete tile edge (`0` = untiled) for a device with `heap_budget` bytes.
    pub fn resolve(self, heap_budget: usize) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Auto => Self::for_heap_budget(heap_budget),
            Self::Fixed(px) => px,
        }
    }
}

impl Default for TileSize {
    fn default() -> Self {
        Self::Fixed(200)
    }
}

// ─── Device selection ───────────────────────────────────────────────────────

/// Which compute device to run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// Best available device (largest heap budget).
    #[default]
    Auto,
    /// The host CPU device.
    Cpu,
    /// A device by enumeration index.
    Index(usize),
}

// ─── Engine config ──────────────────────────────────────────────────────────

/// Full engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_schema_version")]
    pub config_schema_version: u32,
    /// Compute device selection.
    #[serde(default)]
    pub device: DeviceSelector,
    /// Output = input × scale.
    #[serde(default)]
    pub scale: ScaleFactor,
    /// Tile sizing policy.
    #[serde(default)]
    pub tile_size: TileSize,
    /// Border pixels added around every tile and discarded after upscaling.
    #[serde(default)]
    pub prepadding: u32,
    /// 8-way test-time augmentation.
    #[serde(default)]
    pub tta: bool,
    /// Directory holding `<name>.param` / `<name>.bin` pairs.
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
    /// Override for the device memory budget in bytes.
    #[serde(default)]
    pub memory_limit_bytes: Option<usize>,
}

fn default_schema_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_schema_version: CONFIG_SCHEMA_VERSION,
            device: DeviceSelector::Auto,
            scale: ScaleFactor::X4,
            tile_size: TileSize::default(),
            prepadding: 0,
            tta: false,
            models_dir: None,
            memory_limit_bytes: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(data)
            .map_err(|err| EngineError::Config(format!("Invalid engine config JSON: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| EngineError::Config(format!("Failed to serialize config: {err}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.config_schema_version != CONFIG_SCHEMA_VERSION {
            return Err(EngineError::Config(format!(
                "config schema mismatch: expected {CONFIG_SCHEMA_VERSION}, got {}",
                self.config_schema_version
            )));
        }
        // Re-check in case the value was constructed field-by-field.
        ScaleFactor::new(self.scale.get())?;
        if let TileSize::Fixed(px) = self.tile_size {
            if px == 0 {
                return Err(EngineError::Config(
                    "fixed tile size must be > 0; use TileSize::Disabled for untiled runs".into(),
                ));
            }
        }
        if self.prepadding > MAX_PREPADDING {
            return Err(EngineError::Config(format!(
                "prepadding {} exceeds the maximum of {MAX_PREPADDING}",
                self.prepadding
            )));
        }
        if self.memory_limit_bytes == Some(0) {
            return Err(EngineError::Config(
                "memory_limit_bytes must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// The models directory: config value, then `TILESR_MODELS_DIR`, then
    /// [`DEFAULT_MODELS_DIR`].
    pub fn resolved_models_dir(&self) -> PathBuf {
        if let Some(dir) = &self.models_dir {
            return dir.clone();
        }
        match std::env::var_os(MODELS_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(DEFAULT_MODELS_DIR),
        }
    }

    /// `(<dir>/<name>.param, <dir>/<name>.bin)`.
    pub fn model_paths(&self, name: &str) -> (PathBuf, PathBuf) {
        let dir = self.resolved_models_dir();
        (
            dir.join(format!("{name}.param")),
            dir.join(format!("{name}.bin")),
        )
    }

    pub fn with_scale(&self, scale: u32) -> Result<Self> {
        Ok(Self {
            scale: ScaleFactor::new(scale)?,
            ..self.clone()
        })
    }

    pub fn with_tile_size(&self, tile_size: TileSize) -> Result<Self> {
        let cfg = Self {
            tile_size,
            ..self.clone()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_prepadding(&self, prepadding: u32) -> Result<Self> {
        let cfg = Self {
            prepadding,
            ..self.clone()
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

// ─── Builder ────────────────────────────────────────────────────────────────

/// Builder for [`EngineConfig`].  Scale validation is deferred to
/// [`build`](Self::build) so the builder stays infallible until then.
#[derive(Clone, Debug, Default)]
pub struct EngineConfigBuilder {
    device: DeviceSelector,
    scale: Option<u32>,
    tile_size: Option<TileSize>,
    prepadding: u32,
    tta: bool,
    models_dir: Option<PathBuf>,
    memory_limit_bytes: Option<usize>,
}

impl EngineConfigBuilder {
    pub fn device(mut self, device: DeviceSelector) -> Self {
        self.device = device;
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Binding-style tile size (`0` disables tiling).
    pub fn tile_size(mut self, pixels: u32) -> Self {
        self.tile_size = Some(TileSize::from_pixels(pixels));
        self
    }

    pub fn tile_policy(mut self, tile_size: TileSize) -> Self {
        self.tile_size = Some(tile_size);
        self
    }

    pub fn prepadding(mut self, prepadding: u32) -> Self {
        self.prepadding = prepadding;
        self
    }

    pub fn tta(mut self, enabled: bool) -> Self {
        self.tta = enabled;
        self
    }

    pub fn models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(dir.into());
        self
    }

    pub fn memory_limit_bytes(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let scale = match self.scale {
            Some(s) => ScaleFactor::new(s)?,
            None => ScaleFactor::default(),
        };
        let cfg = EngineConfig {
            config_schema_version: CONFIG_SCHEMA_VERSION,
            device: self.device,
            scale,
            tile_size: self.tile_size.unwrap_or_default(),
            prepadding: self.prepadding,
            tta: self.tta,
            models_dir: self.models_dir,
            memory_limit_bytes: self.memory_limit_bytes,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
