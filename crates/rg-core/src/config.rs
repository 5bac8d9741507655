//! Configuration system for retro-gba

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default guest context stack budget
pub const DEFAULT_GUEST_STACK_SIZE: usize = 0x20000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub cpu: CpuConfig,
    pub cache: CacheConfig,
    pub paths: PathConfig,
    pub debug: DebugConfig,
}

/// General engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Write dirty backup memory to disk on unload and reset
    pub flush_backup: bool,
    /// Load an existing backup file when a game is loaded
    pub load_backup: bool,
}

/// CPU execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Use the dynamic recompiler (overridden by the host option at load)
    pub translation: bool,
    /// Stack budget of the guest execution context in bytes
    pub guest_stack_size: usize,
}

/// Translation cache sizing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub rom_cache_size: usize,
    pub ram_cache_size: usize,
    pub bios_cache_size: usize,
    pub max_translation_gates: usize,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// BIOS file name looked up in the system directory
    pub bios_file_name: String,
    /// Fallback system directory when the host does not provide one
    pub system_dir: Option<PathBuf>,
    /// Fallback save directory when the host does not provide one
    pub save_dir: Option<PathBuf>,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            flush_backup: true,
            load_backup: true,
        }
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            translation: true,
            guest_stack_size: DEFAULT_GUEST_STACK_SIZE,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            rom_cache_size: 1024 * 512 * 4,
            ram_cache_size: 1024 * 384,
            bios_cache_size: 1024 * 128,
            max_translation_gates: 8,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            bios_file_name: "gba_bios.bin".to_string(),
            system_dir: None,
            save_dir: None,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retro-gba")
            .join("config.toml")
    }
}
