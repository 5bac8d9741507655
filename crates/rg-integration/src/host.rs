//! Host frontend boundary
//!
//! The frontend owns audio, video, input and the capability queries. The
//! engine reaches it only through the [`Host`] trait.

use std::path::PathBuf;

/// Severity passed to the host log sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Framebuffer pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 15-bit with the top bit unused
    Rgb0555,
    /// 16-bit, 5/6/5
    Rgb565,
    /// 32-bit
    Xrgb8888,
}

/// Video standard reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Ntsc,
    Pal,
}

/// Host-visible memory regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryId {
    SaveRam,
    Rtc,
    SystemRam,
    VideoRam,
}

/// A user-configurable option declared to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreOption {
    pub key: &'static str,
    pub description: &'static str,
    /// First value is the default
    pub values: &'static [&'static str],
}

impl CoreOption {
    /// `"<description>; <v1>|<v2>|..."`, the form hosts display
    pub fn declaration(&self) -> String {
        format!("{}; {}", self.description, self.values.join("|"))
    }

    pub fn default_value(&self) -> &'static str {
        self.values.first().copied().unwrap_or("")
    }
}

/// Static description of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemInfo {
    pub library_name: &'static str,
    pub library_version: &'static str,
    pub need_fullpath: bool,
    pub block_extract: bool,
    pub valid_extensions: &'static str,
}

/// Output geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub base_width: u32,
    pub base_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// 0.0 lets the host derive it from width/height
    pub aspect_ratio: f32,
}

/// Output timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub fps: f64,
    pub sample_rate: f64,
}

/// Audio/video description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvInfo {
    pub geometry: Geometry,
    pub timing: Timing,
}

/// One emitted video frame
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub pixels: &'a [u16],
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub pitch: usize,
}

/// Named timing counter reported at shutdown
#[derive(Debug, Clone, PartialEq)]
pub struct PerfCounter {
    pub name: &'static str,
    pub calls: u64,
    pub total: std::time::Duration,
}

/// Frontend capabilities the engine consumes
pub trait Host {
    /// Log sink. Hosts without one ignore messages.
    fn log(&mut self, _level: HostLogLevel, _message: &str) {}

    /// Request a framebuffer layout; `false` if unsupported
    fn set_pixel_format(&mut self, _format: PixelFormat) -> bool {
        true
    }

    fn system_directory(&self) -> Option<PathBuf> {
        None
    }

    fn save_directory(&self) -> Option<PathBuf> {
        None
    }

    /// Declare the engine's options
    fn set_variables(&mut self, _options: &[CoreOption]) {}

    /// Current value of an option
    fn variable(&self, _key: &str) -> Option<String> {
        None
    }

    /// Whether any option changed since the last call
    fn variables_updated(&mut self) -> bool {
        false
    }

    /// Receive the engine's performance counters
    fn perf_log(&mut self, _counters: &[PerfCounter]) {}

    /// Latch controller state for this frame
    fn poll_input(&mut self);

    /// Pressed buttons, one bit per key, active high
    fn joypad_state(&self) -> u16 {
        0
    }

    fn video_refresh(&mut self, frame: &VideoFrame<'_>);

    fn audio_sample_batch(&mut self, _samples: &[i16]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_declaration() {
        let option = CoreOption {
            key: "test_opt",
            description: "Test option (restart)",
            values: &["enabled", "disabled"],
        };
        assert_eq!(option.declaration(), "Test option (restart); enabled|disabled");
        assert_eq!(option.default_value(), "enabled");
    }
}
