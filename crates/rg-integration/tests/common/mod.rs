//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use rg_core::Config;
use rg_integration::host::{CoreOption, Host, HostLogLevel, PerfCounter, PixelFormat, VideoFrame};
use rg_integration::loader::{BIOS_SIZE, GAMEPAK_HEADER_SIZE};
use rg_integration::{Engine, NullCore, DRC_OPTION_KEY};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One frame as received by the host
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub pixels: Vec<u16>,
}

/// Host double that records everything the engine sends it
#[derive(Default)]
pub struct RecordingHost {
    pub system_dir: Option<PathBuf>,
    pub save_dir: Option<PathBuf>,
    pub vars: HashMap<String, String>,
    pub vars_updated: bool,
    pub declared: Vec<String>,
    pub refuse_rgb565: bool,
    pub pixel_format: Option<PixelFormat>,
    pub buttons: u16,
    pub polls: usize,
    pub frames: Vec<RecordedFrame>,
    pub audio: Vec<i16>,
    pub logs: Vec<(HostLogLevel, String)>,
    pub perf: Vec<PerfCounter>,
}

impl RecordingHost {
    pub fn has_log(&self, level: HostLogLevel, needle: &str) -> bool {
        self.logs
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl Host for RecordingHost {
    fn log(&mut self, level: HostLogLevel, message: &str) {
        self.logs.push((level, message.to_string()));
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> bool {
        if self.refuse_rgb565 && format == PixelFormat::Rgb565 {
            return false;
        }
        self.pixel_format = Some(format);
        true
    }

    fn system_directory(&self) -> Option<PathBuf> {
        self.system_dir.clone()
    }

    fn save_directory(&self) -> Option<PathBuf> {
        self.save_dir.clone()
    }

    fn set_variables(&mut self, options: &[CoreOption]) {
        self.declared = options
            .iter()
            .map(|option| format!("{}={}", option.key, option.declaration()))
            .collect();
    }

    fn variable(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn variables_updated(&mut self) -> bool {
        std::mem::take(&mut self.vars_updated)
    }

    fn perf_log(&mut self, counters: &[PerfCounter]) {
        self.perf = counters.to_vec();
    }

    fn poll_input(&mut self) {
        self.polls += 1;
    }

    fn joypad_state(&self) -> u16 {
        self.buttons
    }

    fn video_refresh(&mut self, frame: &VideoFrame<'_>) {
        self.frames.push(RecordedFrame {
            width: frame.width,
            height: frame.height,
            pitch: frame.pitch,
            pixels: frame.pixels.to_vec(),
        });
    }

    fn audio_sample_batch(&mut self, samples: &[i16]) {
        self.audio.extend_from_slice(samples);
    }
}

/// BIOS and game image on disk
pub struct Fixture {
    pub dir: TempDir,
    pub game: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_bios_first_byte(0x18)
    }

    pub fn with_bios_first_byte(first: u8) -> Self {
        let fixture = Self::without_bios();
        let mut bios = vec![0u8; BIOS_SIZE];
        bios[0] = first;
        fs::write(fixture.dir.path().join("gba_bios.bin"), bios).unwrap();
        fixture
    }

    pub fn without_bios() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path().join("demo.gba");

        let mut rom = vec![0u8; GAMEPAK_HEADER_SIZE + 0x40];
        rom[0xA0..0xAB].copy_from_slice(b"POCKET DEMO");
        rom[0xAC..0xB0].copy_from_slice(b"APDE");
        rom[0xB0..0xB2].copy_from_slice(b"01");
        fs::write(&game, rom).unwrap();

        Self { dir, game }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Host pointed at the fixture directory with the recompiler option set
    pub fn host(&self, translation: bool) -> RecordingHost {
        let mut host = RecordingHost {
            system_dir: Some(self.path().to_path_buf()),
            save_dir: Some(self.path().to_path_buf()),
            ..Default::default()
        };
        host.vars.insert(
            DRC_OPTION_KEY.to_string(),
            if translation { "enabled" } else { "disabled" }.to_string(),
        );
        host
    }

    pub fn engine(&self, translation: bool) -> Engine<RecordingHost, NullCore> {
        let mut engine = Engine::new(Config::default(), self.host(translation), NullCore::new());
        engine.init();
        engine.set_environment();
        engine
    }

    /// Engine with the game already loaded
    pub fn loaded_engine(&self, translation: bool) -> Engine<RecordingHost, NullCore> {
        let mut engine = self.engine(translation);
        assert!(engine.load_game(&self.game));
        engine
    }
}

/// Full snapshot of the engine's guest
pub fn snapshot(engine: &Engine<RecordingHost, NullCore>) -> Vec<u8> {
    let mut blob = vec![0u8; engine.serialize_size()];
    assert!(engine.serialize(&mut blob));
    blob
}
